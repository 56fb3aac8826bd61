//! Product migration: the densest normalizer. Variants, SKU de-duplication,
//! product-type coercion, money conversion and category reference remapping
//! all happen before the payload reaches the upsert engine.

use anyhow::{anyhow, Result};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::{info, warn};

use super::context::{record_id, MigrationContext};
use super::summary::RunSummary;
use super::upsert::{upsert_entity, UpsertOutcome, UpsertRequest};
use super::{list_source, MAX_DIAG_BYTES};
use crate::ledger::{EntityKind, Ledger};
use crate::normalization::money::Money;
use crate::normalization::order::{dedupe_skus, parse_created_at, sort_oldest_first};
use crate::normalization::slug::slugify;
use crate::normalization::text::{clean_meta, clean_name};
use crate::platform::client::CommerceApi;

/// The destination accepts a closed set of product types; free-text source
/// values are coerced, defaulting to the overwhelmingly common case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductType {
    Physical,
    Digital,
    Service,
}

impl ProductType {
    pub fn coerce(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "digital" | "download" | "downloadable" | "virtual" => ProductType::Digital,
            "service" | "appointment" | "booking" => ProductType::Service,
            _ => ProductType::Physical,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProductType::Physical => "physical",
            ProductType::Digital => "digital",
            ProductType::Service => "service",
        }
    }
}

#[derive(Debug, Clone)]
pub enum RawProduct {
    V1(Value),
    V3(Value),
}

impl RawProduct {
    /// Legacy products carry integer `price_cents` and `variations`; current
    /// ones a `price` object and `variants`.
    pub fn detect(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| anyhow!("product record is not an object"))?;
        if obj.contains_key("price_cents")
            || obj.contains_key("variations")
            || obj.contains_key("title")
            || obj.contains_key("url_key")
        {
            return Ok(RawProduct::V1(value.clone()));
        }
        if obj.contains_key("name") || obj.contains_key("slug") || obj.contains_key("price") {
            return Ok(RawProduct::V3(value.clone()));
        }
        Err(anyhow!("unrecognized product schema"))
    }

    pub fn raw(&self) -> &Value {
        match self {
            RawProduct::V1(v) | RawProduct::V3(v) => v,
        }
    }

    pub fn source_id(&self) -> Option<String> {
        record_id(self.raw())
    }

    /// Source category ids referenced by this product (remapped later).
    pub fn source_category_ids(&self) -> Vec<String> {
        let field = match self {
            RawProduct::V1(_) => "categories",
            RawProduct::V3(_) => "category_ids",
        };
        self.raw()
            .get(field)
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| match id {
                        Value::String(s) if !s.is_empty() => Some(s.clone()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn price(&self) -> Option<Money> {
        let v = self.raw();
        match self {
            RawProduct::V1(v) => {
                let cents = v.get("price_cents").and_then(Value::as_i64)?;
                let currency = v
                    .get("currency")
                    .and_then(Value::as_str)
                    .unwrap_or("USD");
                Some(Money::from_minor_units(cents, currency))
            }
            RawProduct::V3(_) => v.get("price").and_then(Money::parse),
        }
    }

    pub fn normalize(&self) -> Value {
        let v = self.raw();
        let (name_field, slug_field) = match self {
            RawProduct::V1(_) => ("title", "url_key"),
            RawProduct::V3(_) => ("name", "slug"),
        };
        let name = v
            .get(name_field)
            .and_then(Value::as_str)
            .map(clean_name)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Untitled product".to_string());
        let slug = v
            .get(slug_field)
            .and_then(Value::as_str)
            .map(slugify)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| slugify(&name));

        let mut out = Map::new();
        out.insert("name".into(), Value::String(name.clone()));
        out.insert("slug".into(), Value::String(slug.clone()));
        let kind = v
            .get("type")
            .and_then(Value::as_str)
            .map(ProductType::coerce)
            .unwrap_or(ProductType::Physical);
        out.insert("type".into(), Value::String(kind.as_str().into()));
        if let Some(price) = self.price() {
            out.insert("price".into(), price.to_value());
        }
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
        if let Some(enabled) = v.get("enabled").and_then(Value::as_bool) {
            out.insert("enabled".into(), Value::Bool(enabled));
        }
        out.insert("variants".into(), Value::Array(self.normalize_variants(&slug)));
        Value::Object(out)
    }

    fn normalize_variants(&self, parent_slug: &str) -> Vec<Value> {
        let field = match self {
            RawProduct::V1(_) => "variations",
            RawProduct::V3(_) => "variants",
        };
        let raw_variants = self
            .raw()
            .get(field)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        // First pass: shape each variant and collect SKUs (generating one from
        // the parent slug when a variant arrives without one).
        let fallback_sku = slugify(parent_slug).to_uppercase();
        let mut shaped: Vec<Map<String, Value>> = Vec::with_capacity(raw_variants.len());
        let mut skus: Vec<String> = Vec::with_capacity(raw_variants.len());
        for variant in &raw_variants {
            let mut out = Map::new();
            let sku = variant
                .get("sku")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| fallback_sku.clone());
            skus.push(sku);
            if let Some(vname) = variant
                .get("name")
                .or_else(|| variant.get("title"))
                .and_then(Value::as_str)
            {
                let cleaned = clean_name(vname);
                if !cleaned.is_empty() {
                    out.insert("name".into(), Value::String(cleaned));
                }
            }
            let price = match variant.get("price") {
                Some(p) => Money::parse(p),
                None => variant.get("price_cents").and_then(Value::as_i64).map(|c| {
                    let currency = self
                        .raw()
                        .get("currency")
                        .and_then(Value::as_str)
                        .unwrap_or("USD");
                    Money::from_minor_units(c, currency)
                }),
            };
            if let Some(price) = price {
                out.insert("price".into(), price.to_value());
            }
            if let Some(enabled) = variant.get("enabled").and_then(Value::as_bool) {
                out.insert("enabled".into(), Value::Bool(enabled));
            }
            shaped.push(out);
        }

        // Second pass: first SKU occurrence wins unmodified, collisions get
        // numeric suffixes.
        let unique = dedupe_skus(&skus);
        shaped
            .into_iter()
            .zip(unique)
            .map(|(mut variant, sku)| {
                variant.insert("sku".into(), Value::String(sku));
                Value::Object(variant)
            })
            .collect()
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
        list_source(api, &ctx.source_store_id, "products", "legacy/products").await?;
    sort_oldest_first(&mut records, created_at_of);
    migrate_records(api, ledger, ctx, records).await
}

pub async fn migrate_records(
    api: &dyn CommerceApi,
    ledger: &Ledger,
    ctx: &mut MigrationContext,
    records: Vec<Value>,
) -> Result<RunSummary> {
    ctx.dest_index(api, EntityKind::Product).await?;
    let category_map = ledger
        .reference_map(
            EntityKind::Category,
            ctx.owner_id,
            &ctx.source_store_id,
            &ctx.destination_store_id,
        )
        .await?;

    let mut summary = RunSummary::default();
    info!(count = records.len(), "migrating products");
    for record in records {
        match migrate_one(api, ledger, ctx, &record, &category_map).await {
            Ok(outcome) => match outcome {
                UpsertOutcome::Created(_) => summary.created += 1,
                UpsertOutcome::Recreated(_) => summary.recreated += 1,
                UpsertOutcome::Updated(_) => summary.updated += 1,
                UpsertOutcome::Skipped(_) => summary.skipped += 1,
                UpsertOutcome::Failed(_) => summary.failed += 1,
            },
            Err(e) => {
                warn!(error = %e, "product migration failed");
                summary.failed += 1;
            }
        }
    }
    info!(%summary, "product migration finished");
    Ok(summary)
}

async fn migrate_one(
    api: &dyn CommerceApi,
    ledger: &Ledger,
    ctx: &mut MigrationContext,
    record: &Value,
    category_map: &HashMap<String, String>,
) -> Result<UpsertOutcome> {
    let kind = EntityKind::Product;
    let raw = RawProduct::detect(record)?;
    let source_id = raw.source_id();
    let mut payload = raw.normalize();
    let natural_key = payload.get("slug").and_then(Value::as_str).map(str::to_string);

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

    // Category attachment is best-effort: a product without its category is
    // still a product, so unresolved references are dropped with a warning
    // rather than failing the record.
    let source_categories = raw.source_category_ids();
    if !source_categories.is_empty() {
        let mut mapped: Vec<Value> = Vec::new();
        let mut dropped: Vec<&String> = Vec::new();
        for src in &source_categories {
            match category_map.get(src) {
                Some(dest) => mapped.push(Value::String(dest.clone())),
                None => dropped.push(src),
            }
        }
        if !dropped.is_empty() {
            warn!(?dropped, "product references unmigrated categories; dropping");
        }
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("category_ids".into(), Value::Array(mapped));
        }
    }

    if ctx.dry_run {
        info!(source_id = ?source_id, "dry-run: would upsert product");
        return Ok(UpsertOutcome::Skipped(json!({"reason": "dry run"})));
    }

    let dest_store = ctx.destination_store_id.clone();
    let index = ctx.dest_index(api, kind).await?;
    let outcome = upsert_entity(
        api,
        &dest_store,
        index,
        UpsertRequest {
            collection: "products",
            payload,
            known_destination_id: row.destination_entity_id.clone(),
            singleton: None,
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
        }
        UpsertOutcome::Skipped(detail) => ledger.mark_skipped(kind, row.id, detail).await?,
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
    fn coerces_free_text_product_types() {
        assert_eq!(ProductType::coerce("DIGITAL"), ProductType::Digital);
        assert_eq!(ProductType::coerce("downloadable"), ProductType::Digital);
        assert_eq!(ProductType::coerce("booking"), ProductType::Service);
        assert_eq!(ProductType::coerce("weird thing"), ProductType::Physical);
        assert_eq!(ProductType::coerce(""), ProductType::Physical);
    }

    #[test]
    fn detects_legacy_by_price_cents() {
        let v1 = json!({"id": 1, "title": "Mug", "price_cents": 899, "currency": "USD"});
        assert!(matches!(RawProduct::detect(&v1).unwrap(), RawProduct::V1(_)));
        let v3 = json!({"id": "p1", "name": "Mug", "price": {"amount": "8.99", "currency": "USD"}});
        assert!(matches!(RawProduct::detect(&v3).unwrap(), RawProduct::V3(_)));
    }

    #[test]
    fn legacy_price_cents_become_decimal_strings() {
        let raw = RawProduct::detect(
            &json!({"id": 1, "title": "Mug", "url_key": "mug", "price_cents": 899, "currency": "EUR"}),
        )
        .unwrap();
        let out = raw.normalize();
        assert_eq!(out["price"], json!({"amount": "8.99", "currency": "EUR"}));
    }

    #[test]
    fn variant_skus_are_deduplicated_first_wins() {
        let raw = RawProduct::detect(&json!({
            "id": "p1",
            "name": "Shirt",
            "slug": "shirt",
            "variants": [
                {"sku": "SH-1", "name": "Small"},
                {"sku": "SH-1", "name": "Medium"},
                {"name": "No sku"},
                {"sku": "SH-1", "name": "Large"}
            ]
        }))
        .unwrap();
        let out = raw.normalize();
        let skus: Vec<&str> = out["variants"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["sku"].as_str().unwrap())
            .collect();
        assert_eq!(skus, vec!["SH-1", "SH-1-2", "SHIRT", "SH-1-3"]);
    }

    #[test]
    fn server_aggregates_are_dropped() {
        let raw = RawProduct::detect(&json!({
            "id": "p1",
            "name": "Mug",
            "slug": "mug",
            "rating": 4.9,
            "sales_count": 1234,
            "created_at": "2020-01-01T00:00:00Z"
        }))
        .unwrap();
        let out = raw.normalize();
        assert!(out.get("id").is_none());
        assert!(out.get("rating").is_none());
        assert!(out.get("sales_count").is_none());
    }

    #[test]
    fn source_category_ids_read_from_both_schemas() {
        let v1 = RawProduct::detect(
            &json!({"id": 1, "title": "Mug", "price_cents": 1, "categories": [3, 4]}),
        )
        .unwrap();
        assert_eq!(v1.source_category_ids(), vec!["3", "4"]);
        let v3 =
            RawProduct::detect(&json!({"id": "p", "name": "Mug", "category_ids": ["a"]})).unwrap();
        assert_eq!(v3.source_category_ids(), vec!["a"]);
    }
}
