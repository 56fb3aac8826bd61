//! Explicit per-run state. Everything a component needs — tokens already
//! resolved into the client, destination caches, the rate gate, settings —
//! lives here and is passed by reference. No hidden shared mutable state.

use anyhow::Result;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::ledger::EntityKind;
use crate::platform::client::CommerceApi;
use crate::platform::gate::RateGate;
use crate::platform::pager::walk_cursor;

/// Pre-built view of what the destination already holds for one kind:
/// lowercased natural key (slug, name, sku, email, code) -> destination id,
/// plus every slug seen (feeds slug-collision regeneration).
#[derive(Debug, Default, Clone)]
pub struct DestIndex {
    pub by_key: HashMap<String, String>,
    pub taken_slugs: HashSet<String>,
}

impl DestIndex {
    pub fn lookup(&self, key: &str) -> Option<&String> {
        self.by_key.get(&key.to_lowercase())
    }

    pub fn register(&mut self, keys: &[&str], slug: Option<&str>, dest_id: &str) {
        for key in keys {
            if !key.is_empty() {
                self.by_key.insert(key.to_lowercase(), dest_id.to_string());
            }
        }
        if let Some(slug) = slug {
            if !slug.is_empty() {
                self.taken_slugs.insert(slug.to_string());
            }
        }
    }

    /// Fold one destination listing record into the index.
    pub fn absorb_record(&mut self, record: &Value) {
        let Some(id) = record_id(record) else {
            return;
        };
        let mut keys: Vec<&str> = Vec::new();
        for field in ["slug", "name", "email", "code", "sku"] {
            if let Some(v) = record.get(field).and_then(Value::as_str) {
                keys.push(v);
            }
        }
        let slug = record.get("slug").and_then(Value::as_str);
        self.register(&keys, slug, &id);
        // Variant SKUs count as natural keys too.
        if let Some(variants) = record.get("variants").and_then(Value::as_array) {
            for variant in variants {
                if let Some(sku) = variant.get("sku").and_then(Value::as_str) {
                    if !sku.is_empty() {
                        self.by_key.insert(sku.to_lowercase(), id.clone());
                    }
                }
            }
        }
    }
}

pub fn record_id(record: &Value) -> Option<String> {
    match record.get("id") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

pub struct MigrationContext {
    pub owner_id: i64,
    pub source_store_id: String,
    pub destination_store_id: String,
    pub dry_run: bool,
    pub gate: RateGate,
    indexes: HashMap<EntityKind, DestIndex>,
    tag_index: Option<HashMap<String, String>>,
    manual_numbering: Option<bool>,
}

impl MigrationContext {
    pub fn new(
        owner_id: i64,
        source_store_id: impl Into<String>,
        destination_store_id: impl Into<String>,
        gate: RateGate,
        dry_run: bool,
    ) -> Self {
        Self {
            owner_id,
            source_store_id: source_store_id.into(),
            destination_store_id: destination_store_id.into(),
            dry_run,
            gate,
            indexes: HashMap::new(),
            tag_index: None,
            manual_numbering: None,
        }
    }

    /// Build (once) and return the destination natural-key index for `kind`.
    pub async fn dest_index(
        &mut self,
        api: &dyn CommerceApi,
        kind: EntityKind,
    ) -> Result<&mut DestIndex> {
        if !self.indexes.contains_key(&kind) {
            let records = walk_cursor(api, &self.destination_store_id, kind.doc_key(), &[]).await?;
            let mut index = DestIndex::default();
            for record in &records {
                index.absorb_record(record);
            }
            info!(
                kind = %kind,
                keys = index.by_key.len(),
                slugs = index.taken_slugs.len(),
                "destination index built"
            );
            self.indexes.insert(kind, index);
        }
        Ok(self
            .indexes
            .get_mut(&kind)
            .unwrap_or_else(|| unreachable!()))
    }

    /// Destination tag display name (lowercased) -> tag id, built on first use.
    pub async fn tag_index(
        &mut self,
        api: &dyn CommerceApi,
    ) -> Result<&mut HashMap<String, String>> {
        if self.tag_index.is_none() {
            let records = walk_cursor(api, &self.destination_store_id, "tags", &[]).await?;
            let mut index = HashMap::new();
            for record in &records {
                if let (Some(id), Some(name)) = (
                    record_id(record),
                    record.get("name").and_then(Value::as_str),
                ) {
                    index.insert(name.to_lowercase(), id);
                }
            }
            debug!(tags = index.len(), "destination tag index built");
            self.tag_index = Some(index);
        }
        Ok(self.tag_index.as_mut().unwrap_or_else(|| unreachable!()))
    }

    /// Whether the destination honors explicit order numbers. Fetched from
    /// the numbering-configuration endpoint once per run, defaulting to
    /// "not honored" when the endpoint is missing or vague — the safe side,
    /// since a failed manual attempt can advance the auto-counter.
    pub async fn manual_numbering_honored(&mut self, api: &dyn CommerceApi) -> Result<bool> {
        if let Some(cached) = self.manual_numbering {
            return Ok(cached);
        }
        let resp = api
            .get(&self.destination_store_id, "settings/order-numbering", &[])
            .await?;
        let honored = resp.ok()
            && resp
                .body
                .get("manual_numbering_honored")
                .and_then(Value::as_bool)
                .unwrap_or(false);
        info!(honored, "destination order numbering settings resolved");
        self.manual_numbering = Some(honored);
        Ok(honored)
    }

    #[cfg(test)]
    pub fn seed_index(&mut self, kind: EntityKind, index: DestIndex) {
        self.indexes.insert(kind, index);
    }

    #[cfg(test)]
    pub fn seed_tag_index(&mut self, index: HashMap<String, String>) {
        self.tag_index = Some(index);
    }
}
