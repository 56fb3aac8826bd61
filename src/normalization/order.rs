//! Ordering and de-duplication helpers shared by the entity migrators.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

/// Parse the creation timestamps the two API versions emit: RFC 3339, the
/// legacy `YYYY-MM-DD HH:MM:SS`, or a bare unix-seconds number.
pub fn parse_created_at(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(naive.and_utc());
            }
            None
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        _ => None,
    }
}

/// Sort records oldest-source-first by creation date. Records whose date is
/// missing or unparsable always sort last, in their incoming order.
pub fn sort_oldest_first<F>(records: &mut [Value], date_of: F)
where
    F: Fn(&Value) -> Option<DateTime<Utc>>,
{
    records.sort_by_key(|r| match date_of(r) {
        Some(dt) => (false, dt),
        None => (true, DateTime::<Utc>::MAX_UTC),
    });
}

/// De-duplicate generated SKUs within one parent's variant list: the first
/// occurrence keeps its SKU unmodified, later collisions get `-2`, `-3`, …
pub fn dedupe_skus(skus: &[String]) -> Vec<String> {
    use std::collections::HashSet;
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(skus.len());
    for sku in skus {
        if seen.insert(sku.clone()) {
            out.push(sku.clone());
            continue;
        }
        let mut n = 2u32;
        loop {
            let candidate = format!("{sku}-{n}");
            if seen.insert(candidate.clone()) {
                out.push(candidate);
                break;
            }
            n += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date_of(v: &Value) -> Option<DateTime<Utc>> {
        v.get("created_at").and_then(parse_created_at)
    }

    #[test]
    fn parses_all_known_date_shapes() {
        assert!(parse_created_at(&json!("2023-05-01T10:00:00Z")).is_some());
        assert!(parse_created_at(&json!("2023-05-01 10:00:00")).is_some());
        assert!(parse_created_at(&json!(1_683_000_000)).is_some());
        assert!(parse_created_at(&json!("not a date")).is_none());
    }

    #[test]
    fn oldest_first_with_unparsable_last() {
        let mut records = vec![
            json!({"id": "b", "created_at": "2024-01-02T00:00:00Z"}),
            json!({"id": "x", "created_at": "garbage"}),
            json!({"id": "a", "created_at": "2024-01-01T00:00:00Z"}),
            json!({"id": "y"}),
        ];
        sort_oldest_first(&mut records, date_of);
        let ids: Vec<&str> = records.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b", "x", "y"]);
    }

    #[test]
    fn sku_collisions_get_numeric_suffixes() {
        let skus = vec![
            "SHIRT".to_string(),
            "SHIRT".to_string(),
            "SHIRT".to_string(),
            "HAT".to_string(),
        ];
        assert_eq!(dedupe_skus(&skus), vec!["SHIRT", "SHIRT-2", "SHIRT-3", "HAT"]);
    }

    #[test]
    fn suffix_itself_colliding_keeps_scanning() {
        let skus = vec![
            "A".to_string(),
            "A-2".to_string(),
            "A".to_string(), // wants A-2, taken, must take A-3
        ];
        assert_eq!(dedupe_skus(&skus), vec!["A", "A-2", "A-3"]);
    }
}
