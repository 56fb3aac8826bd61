//! Payment reconciliation by content signature.
//!
//! Destination payment ids mean nothing across stores, so "already attached"
//! is decided by a derived fingerprint: provider transaction id when present,
//! then gateway transaction id, then receipt id, and as a last resort a hash
//! of the amount and the timestamp truncated to the minute.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::normalization::money::Money;

/// Stable fingerprint of one payment record (either store's shape).
pub fn signature(payment: &Value) -> String {
    for field in [
        "provider_transaction_id",
        "gateway_transaction_id",
        "receipt_id",
    ] {
        if let Some(id) = payment.get(field).and_then(Value::as_str) {
            let id = id.trim();
            if !id.is_empty() {
                return format!("{field}:{id}");
            }
        }
    }
    // Amount + minute-truncated timestamp. Coarse, but the only content left.
    let amount = payment
        .get("amount")
        .and_then(Money::parse)
        .map(|m| format!("{} {}", m.amount_str(), m.currency))
        .unwrap_or_default();
    let minute = payment
        .get("created_at")
        .or_else(|| payment.get("timestamp"))
        .and_then(Value::as_str)
        .map(|ts| {
            // "2024-05-01T10:32:17Z" -> "2024-05-01T10:32"
            ts.get(..16).unwrap_or(ts).to_string()
        })
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(amount.as_bytes());
    hasher.update(b"|");
    hasher.update(minute.as_bytes());
    format!("content:{:x}", hasher.finalize())
}

/// Source payments whose signature the destination order does not carry yet,
/// in source order.
pub fn plan_payments(existing: &[Value], source: &[Value]) -> Vec<Value> {
    let seen: Vec<String> = existing.iter().map(signature).collect();
    source
        .iter()
        .filter(|p| !seen.contains(&signature(p)))
        .cloned()
        .collect()
}
