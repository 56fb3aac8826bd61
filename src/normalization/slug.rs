//! Slug derivation and collision-free regeneration.

use std::collections::HashSet;

use super::text::MAX_SLUG_LEN;

/// Upper bound on `-N` suffixes tried before giving up on a base slug.
pub const MAX_SLUG_SUFFIX: u32 = 9999;

/// Platform-safe slug from arbitrary display text: ascii-lowercased, every
/// non-alphanumeric run folded into a single `-`, trimmed, length-capped.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_dash = true; // suppress leading dashes
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    let trimmed = out.trim_matches('-');
    trimmed.chars().take(MAX_SLUG_LEN).collect::<String>()
        .trim_end_matches('-')
        .to_string()
}

/// First free slug for `base` given the set of slugs the destination already
/// holds: `base`, else `base-2`, `base-3`, … up to [`MAX_SLUG_SUFFIX`].
/// Suffixed candidates stay within the length cap by shortening the base.
pub fn next_free_slug(base: &str, taken: &HashSet<String>) -> Option<String> {
    if !taken.contains(base) {
        return Some(base.to_string());
    }
    for n in 2..=MAX_SLUG_SUFFIX {
        let suffix = format!("-{n}");
        let room = MAX_SLUG_LEN.saturating_sub(suffix.len());
        let head: String = base.chars().take(room).collect();
        let candidate = format!("{}{}", head.trim_end_matches('-'), suffix);
        if !taken.contains(&candidate) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_basics() {
        assert_eq!(slugify("Running Shoes!"), "running-shoes");
        assert_eq!(slugify("  --Weird   input__here-- "), "weird-input-here");
        assert_eq!(slugify("Déjà vu"), "d-j-vu");
    }

    #[test]
    fn slugify_caps_length() {
        let long = "a".repeat(3 * MAX_SLUG_LEN);
        assert_eq!(slugify(&long).len(), MAX_SLUG_LEN);
    }

    #[test]
    fn next_free_slug_prefers_base() {
        let taken = HashSet::new();
        assert_eq!(next_free_slug("shoes", &taken).as_deref(), Some("shoes"));
    }

    #[test]
    fn next_free_slug_increments_past_collisions() {
        let mut taken = HashSet::new();
        taken.insert("shoes".to_string());
        assert_eq!(next_free_slug("shoes", &taken).as_deref(), Some("shoes-2"));
        taken.insert("shoes-2".to_string());
        taken.insert("shoes-3".to_string());
        assert_eq!(next_free_slug("shoes", &taken).as_deref(), Some("shoes-4"));
    }

    #[test]
    fn next_free_slug_gives_up_at_bound() {
        let mut taken = HashSet::new();
        taken.insert("s".to_string());
        for n in 2..=MAX_SLUG_SUFFIX {
            taken.insert(format!("s-{n}"));
        }
        assert_eq!(next_free_slug("s", &taken), None);
    }

    #[test]
    fn suffixed_slug_stays_within_cap() {
        let base = "b".repeat(MAX_SLUG_LEN);
        let mut taken = HashSet::new();
        taken.insert(base.clone());
        let got = next_free_slug(&base, &taken).unwrap();
        assert!(got.len() <= MAX_SLUG_LEN);
        assert!(got.ends_with("-2"));
    }
}
