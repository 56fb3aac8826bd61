//! Per-entity migration drivers and the machinery they share: the
//! destination upsert engine, the order reconstruction pipeline, import/export
//! transfer documents, run context and tallies.

pub mod categories;
pub mod contacts;
pub mod context;
pub mod discounts;
pub mod orders;
pub mod products;
pub mod summary;
pub mod transfer;
pub mod upsert;

#[cfg(test)]
pub mod testutil;

use anyhow::{bail, Result};
use serde_json::{json, Value};
use tracing::info;

use crate::platform::client::{ApiResponse, CommerceApi};
use crate::platform::pager::{walk_cursor_from, walk_offset};

/// Ledger diagnostics keep at most this much raw response text.
pub const MAX_DIAG_BYTES: usize = 2048;

/// List a source collection, preferring the current API and falling back to
/// the legacy offset endpoint when the store only speaks the old dialect.
pub async fn list_source(
    api: &dyn CommerceApi,
    store_id: &str,
    path_v3: &str,
    path_v1: &str,
) -> Result<Vec<Value>> {
    let probe = api.get(store_id, path_v3, &[]).await?;
    if probe.ok() {
        // The probe already holds page one; continue the walk from it.
        return walk_cursor_from(api, store_id, path_v3, &[], probe).await;
    }
    if probe.not_found() {
        info!(store_id, path_v3, "current API listing absent; using legacy endpoint");
        return walk_offset(api, store_id, path_v1, &[]).await;
    }
    bail!(
        "listing {path_v3} for store {store_id} failed ({}): {}",
        probe.status,
        probe.raw_clipped(256)
    )
}

/// Ledger-ready failure detail for a rejected destination write.
pub fn write_failure_detail(stage: &str, payload: &Value, resp: &ApiResponse) -> Value {
    json!({
        "stage": stage,
        "status": resp.status,
        "request": clip_value(payload, MAX_DIAG_BYTES),
        "response": resp.raw_clipped(MAX_DIAG_BYTES),
    })
}

/// Serialize a payload for diagnostics, truncated so oversized bodies never
/// bloat the ledger.
pub fn clip_value(value: &Value, max: usize) -> Value {
    let s = value.to_string();
    if s.len() <= max {
        value.clone()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        Value::String(format!("{}…", &s[..end]))
    }
}
