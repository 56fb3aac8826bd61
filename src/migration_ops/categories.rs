//! Category migration: raw source records (either API version) are
//! normalized, claimed against the ledger, and upserted into the destination
//! catalog tree. The platform's fixed root category ("All Products") is a
//! system singleton and is only ever updated, never created.

use anyhow::{anyhow, Result};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::{info, warn};

use super::context::{record_id, MigrationContext};
use super::summary::RunSummary;
use super::upsert::{upsert_entity, SingletonTarget, UpsertOutcome, UpsertRequest};
use super::{list_source, MAX_DIAG_BYTES};
use crate::ledger::{EntityKind, Ledger};
use crate::normalization::order::{parse_created_at, sort_oldest_first};
use crate::normalization::slug::slugify;
use crate::normalization::text::{clean_meta, clean_name};
use crate::platform::client::CommerceApi;

pub const ROOT_CATEGORY_SLUG: &str = "all-products";
pub const ROOT_CATEGORY_NAME: &str = "All Products";

/// Tagged view of a raw source category: the two API versions shape the same
/// entity differently and each normalizer pattern-matches on its variant
/// instead of probing keys at every call site.
#[derive(Debug, Clone)]
pub enum RawCategory {
    V1(Value),
    V3(Value),
}

impl RawCategory {
    /// The legacy schema calls the display name `title` and the slug
    /// `url_key`; the current one uses `name`/`slug`.
    pub fn detect(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| anyhow!("category record is not an object"))?;
        if obj.contains_key("title") || obj.contains_key("url_key") {
            return Ok(RawCategory::V1(value.clone()));
        }
        if obj.contains_key("name") || obj.contains_key("slug") {
            return Ok(RawCategory::V3(value.clone()));
        }
        Err(anyhow!("unrecognized category schema"))
    }

    pub fn raw(&self) -> &Value {
        match self {
            RawCategory::V1(v) | RawCategory::V3(v) => v,
        }
    }

    pub fn source_id(&self) -> Option<String> {
        record_id(self.raw())
    }

    /// The platform's built-in root category must not be re-created.
    pub fn is_system_root(&self) -> bool {
        let v = self.raw();
        if v.get("system").and_then(Value::as_bool) == Some(true)
            || v.get("default").and_then(Value::as_bool) == Some(true)
        {
            return true;
        }
        let slug = match self {
            RawCategory::V1(v) => v.get("url_key"),
            RawCategory::V3(v) => v.get("slug"),
        };
        slug.and_then(Value::as_str) == Some(ROOT_CATEGORY_SLUG)
    }

    pub fn source_parent_id(&self) -> Option<String> {
        let field = match self {
            RawCategory::V1(_) => "parent",
            RawCategory::V3(_) => "parent_id",
        };
        match self.raw().get(field) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Allow-listed, destination-ready payload. Server-assigned fields
    /// (ids, timestamps, product counts) never survive this.
    pub fn normalize(&self) -> Value {
        let v = self.raw();
        let (name_field, slug_field) = match self {
            RawCategory::V1(_) => ("title", "url_key"),
            RawCategory::V3(_) => ("name", "slug"),
        };
        let name = v
            .get(name_field)
            .and_then(Value::as_str)
            .map(clean_name)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Untitled category".to_string());
        let slug = v
            .get(slug_field)
            .and_then(Value::as_str)
            .map(slugify)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| slugify(&name));

        let mut out = Map::new();
        out.insert("name".into(), Value::String(name));
        out.insert("slug".into(), Value::String(slug));
        if let Some(desc) = v.get("description").and_then(Value::as_str) {
            out.insert("description".into(), Value::String(clean_meta(desc)));
        }
        if let Some(meta) = v
            .pointer("/meta/description")
            .or_else(|| v.get("meta_description"))
            .and_then(Value::as_str)
        {
            out.insert("meta_description".into(), Value::String(clean_meta(meta)));
        }
        if let Some(enabled) = v
            .get("enabled")
            .or_else(|| v.get("is_active"))
            .and_then(Value::as_bool)
        {
            out.insert("enabled".into(), Value::Bool(enabled));
        }
        Value::Object(out)
    }
}

fn created_at_of(v: &Value) -> Option<chrono::DateTime<chrono::Utc>> {
    v.get("created_at")
        .or_else(|| v.get("created"))
        .and_then(parse_created_at)
}

pub async fn migrate(
    api: &dyn CommerceApi,
    ledger: &Ledger,
    ctx: &mut MigrationContext,
) -> Result<RunSummary> {
    let mut records =
        list_source(api, &ctx.source_store_id, "categories", "legacy/categories").await?;
    sort_oldest_first(&mut records, created_at_of);
    migrate_records(api, ledger, ctx, records).await
}

/// Shared by the live migration and file imports.
pub async fn migrate_records(
    api: &dyn CommerceApi,
    ledger: &Ledger,
    ctx: &mut MigrationContext,
    records: Vec<Value>,
) -> Result<RunSummary> {
    ctx.dest_index(api, EntityKind::Category).await?;
    // Parents resolve through already-migrated categories; oldest-first order
    // gets most parents in before their children.
    let mut parent_map = ledger
        .reference_map(
            EntityKind::Category,
            ctx.owner_id,
            &ctx.source_store_id,
            &ctx.destination_store_id,
        )
        .await?;

    let mut summary = RunSummary::default();
    info!(count = records.len(), "migrating categories");
    for record in records {
        match migrate_one(api, ledger, ctx, &record, &mut parent_map).await {
            Ok(outcome) => match outcome {
                UpsertOutcome::Created(_) => summary.created += 1,
                UpsertOutcome::Recreated(_) => summary.recreated += 1,
                UpsertOutcome::Updated(_) => summary.updated += 1,
                UpsertOutcome::Skipped(_) => summary.skipped += 1,
                UpsertOutcome::Failed(_) => summary.failed += 1,
            },
            Err(e) => {
                // The error already landed on the ledger row where possible;
                // the run itself continues.
                warn!(error = %e, "category migration failed");
                summary.failed += 1;
            }
        }
    }
    info!(%summary, "category migration finished");
    Ok(summary)
}

async fn migrate_one(
    api: &dyn CommerceApi,
    ledger: &Ledger,
    ctx: &mut MigrationContext,
    record: &Value,
    parent_map: &mut HashMap<String, String>,
) -> Result<UpsertOutcome> {
    let kind = EntityKind::Category;
    let raw = RawCategory::detect(record)?;
    let source_id = raw.source_id();
    let mut payload = raw.normalize();
    let natural_key = payload.get("slug").and_then(Value::as_str).map(str::to_string);

    // Idempotent re-run: reuse (and overwrite) the terminal row for this
    // logical migration instead of growing a duplicate.
    if let Some(id) = &source_id {
        if let Some(prior) = ledger
            .find_for_rerun(
                kind,
                ctx.owner_id,
                &ctx.source_store_id,
                &ctx.destination_store_id,
                id,
            )
            .await?
        {
            ledger.reopen(kind, prior.id).await?;
        }
    }

    let claimed = ledger
        .claim(
            kind,
            ctx.owner_id,
            &ctx.source_store_id,
            source_id.as_deref(),
            natural_key.as_deref(),
        )
        .await?;
    let row = ledger
        .resolve(
            kind,
            &claimed,
            &ctx.source_store_id,
            &ctx.destination_store_id,
            source_id.as_deref(),
        )
        .await?;

    // Parent reference: same-kind remap through the ledger map, refreshed as
    // this run creates categories.
    if let Some(src_parent) = raw.source_parent_id() {
        match parent_map.get(&src_parent) {
            Some(dest_parent) => {
                payload
                    .as_object_mut()
                    .map(|o| o.insert("parent_id".into(), Value::String(dest_parent.clone())));
            }
            None => {
                warn!(
                    source_parent = src_parent,
                    "parent category not yet migrated; attaching to root"
                );
            }
        }
    }

    if ctx.dry_run {
        info!(source_id = ?source_id, "dry-run: would upsert category");
        return Ok(UpsertOutcome::Skipped(json!({"reason": "dry run"})));
    }

    let singleton = raw.is_system_root().then(|| SingletonTarget {
        lookup_keys: vec![ROOT_CATEGORY_SLUG.into(), ROOT_CATEGORY_NAME.into()],
    });
    let dest_store = ctx.destination_store_id.clone();
    let index = ctx.dest_index(api, kind).await?;
    let outcome = upsert_entity(
        api,
        &dest_store,
        index,
        UpsertRequest {
            collection: "categories",
            payload,
            known_destination_id: row.destination_entity_id.clone(),
            singleton,
        },
    )
    .await?;

    match &outcome {
        UpsertOutcome::Created(dest_id)
        | UpsertOutcome::Recreated(dest_id)
        | UpsertOutcome::Updated(dest_id) => {
            ledger
                .mark_success(kind, row.id, &dest_store, dest_id)
                .await?;
            if let Some(src) = &source_id {
                parent_map.insert(src.clone(), dest_id.clone());
            }
        }
        UpsertOutcome::Skipped(detail) => {
            ledger.mark_skipped(kind, row.id, detail).await?;
        }
        UpsertOutcome::Failed(detail) => {
            ledger
                .mark_failed(
                    kind,
                    row.id,
                    Some(&dest_store),
                    &super::clip_value(detail, MAX_DIAG_BYTES),
                )
                .await?;
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_both_schema_versions() {
        let v1 = json!({"id": 3, "title": "Shoes", "url_key": "shoes"});
        assert!(matches!(
            RawCategory::detect(&v1).unwrap(),
            RawCategory::V1(_)
        ));
        let v3 = json!({"id": "c3", "name": "Shoes", "slug": "shoes"});
        assert!(matches!(
            RawCategory::detect(&v3).unwrap(),
            RawCategory::V3(_)
        ));
        assert!(RawCategory::detect(&json!({"foo": 1})).is_err());
        assert!(RawCategory::detect(&json!("nope")).is_err());
    }

    #[test]
    fn normalize_allow_lists_fields() {
        let raw = RawCategory::detect(&json!({
            "id": "c1",
            "name": "Shoes <b>Sale</b>",
            "slug": "shoes",
            "product_count": 42,
            "created_at": "2024-01-01T00:00:00Z",
            "description": "<p>All the   shoes</p>"
        }))
        .unwrap();
        let out = raw.normalize();
        assert_eq!(out["name"], json!("Shoes Sale"));
        assert_eq!(out["description"], json!("All the shoes"));
        assert!(out.get("id").is_none());
        assert!(out.get("product_count").is_none());
        assert!(out.get("created_at").is_none());
    }

    #[test]
    fn v1_fields_map_onto_current_names() {
        let raw = RawCategory::detect(&json!({
            "id": 9,
            "title": "Hats & Caps",
            "url_key": "Hats Caps!!",
            "parent": 2
        }))
        .unwrap();
        let out = raw.normalize();
        assert_eq!(out["name"], json!("Hats & Caps"));
        assert_eq!(out["slug"], json!("hats-caps"));
        assert_eq!(raw.source_parent_id(), Some("2".into()));
    }

    #[test]
    fn slug_derives_from_name_when_missing() {
        let raw = RawCategory::detect(&json!({"id": "c2", "name": "Summer Wear"})).unwrap();
        assert_eq!(raw.normalize()["slug"], json!("summer-wear"));
    }

    #[test]
    fn system_root_detection() {
        assert!(RawCategory::detect(&json!({"name": "All Products", "slug": "all-products"}))
            .unwrap()
            .is_system_root());
        assert!(RawCategory::detect(&json!({"title": "Root", "url_key": "x", "default": true}))
            .unwrap()
            .is_system_root());
        assert!(!RawCategory::detect(&json!({"name": "Shoes", "slug": "shoes"}))
            .unwrap()
            .is_system_root());
    }
}
