//! Fulfillment reconciliation.
//!
//! Source line items are matched to destination line items by SKU first and
//! product name second. The already-fulfilled quantity per destination line
//! is accumulated across every existing destination fulfillment, and only the
//! remaining delta is requested, clamped so a line can never be fulfilled
//! beyond its ordered quantity on any number of reruns.

use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

/// Destination line item with its running fulfillment tally.
#[derive(Debug, Clone)]
pub struct DestLine {
    pub id: String,
    pub sku: Option<String>,
    pub name: Option<String>,
    pub ordered: i64,
    pub fulfilled: i64,
}

impl DestLine {
    pub fn remaining(&self) -> i64 {
        (self.ordered - self.fulfilled).max(0)
    }
}

fn line_str(line: &Value, field: &str) -> Option<String> {
    line.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
}

/// Build the destination-line view from the created order and its existing
/// fulfillments.
pub fn index_dest_lines(order: &Value, fulfillments: &[Value]) -> Vec<DestLine> {
    let mut lines: Vec<DestLine> = order
        .get("line_items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let id = super::super::context::record_id(item)?;
                    Some(DestLine {
                        id,
                        sku: line_str(item, "sku"),
                        name: line_str(item, "name"),
                        ordered: item.get("quantity").and_then(Value::as_i64).unwrap_or(0),
                        fulfilled: 0,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let mut tally: HashMap<String, i64> = HashMap::new();
    for fulfillment in fulfillments {
        let Some(items) = fulfillment.get("line_items").and_then(Value::as_array) else {
            continue;
        };
        for item in items {
            let Some(line_id) = item
                .get("line_item_id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| super::super::context::record_id(item))
            else {
                continue;
            };
            let qty = item.get("quantity").and_then(Value::as_i64).unwrap_or(0);
            *tally.entry(line_id).or_default() += qty;
        }
    }
    for line in &mut lines {
        if let Some(done) = tally.get(&line.id) {
            line.fulfilled = *done;
        }
    }
    lines
}

/// Quantities to request now: (destination line id, quantity). Lines with no
/// remaining capacity are omitted entirely.
pub fn plan_fulfillments(source_lines: &[Value], dest_lines: &mut [DestLine]) -> Vec<(String, i64)> {
    let mut plan: Vec<(String, i64)> = Vec::new();
    for source in source_lines {
        let sku = line_str(source, "sku");
        let name = line_str(source, "name");
        let wanted = source.get("quantity").and_then(Value::as_i64).unwrap_or(0);
        if wanted <= 0 {
            continue;
        }
        // SKU first; when no destination line carries that SKU (renamed on
        // import, e.g. a collision suffix), fall back to the product name.
        let matched = dest_lines
            .iter()
            .position(|line| sku.is_some() && line.sku == sku)
            .or_else(|| {
                dest_lines
                    .iter()
                    .position(|line| name.is_some() && line.name == name)
            });
        let Some(line) = matched.map(|i| &mut dest_lines[i]) else {
            warn!(?sku, ?name, "no destination line item matches source line");
            continue;
        };
        let delta = wanted.min(line.remaining());
        if delta > 0 {
            line.fulfilled += delta;
            plan.push((line.id.clone(), delta));
        }
    }
    plan
}
