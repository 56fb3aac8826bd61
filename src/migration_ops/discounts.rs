//! Discount-rule migration. Rules embed cross-entity references (the product
//! and category ids their triggers fire on), so every record passes through a
//! strict reference remap before it may be sent: a rule with even one
//! unresolvable id is failed on the ledger and never reaches the destination.

use anyhow::{anyhow, Result};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::context::{record_id, MigrationContext};
use super::summary::RunSummary;
use super::upsert::{upsert_entity, UpsertOutcome, UpsertRequest};
use super::{list_source, MAX_DIAG_BYTES};
use crate::ledger::refmap::{remap_references, ReferenceMaps};
use crate::ledger::{EntityKind, Ledger};
use crate::normalization::money::Money;
use crate::normalization::order::{parse_created_at, sort_oldest_first};
use crate::normalization::text::clean_name;
use crate::platform::client::CommerceApi;

#[derive(Debug, Clone)]
pub enum RawDiscount {
    V1(Value),
    V3(Value),
}

impl RawDiscount {
    /// Legacy rules carry flat `product_ids`/`category_ids` lists and cent
    /// amounts; current ones a composite `trigger` tree.
    pub fn detect(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| anyhow!("discount record is not an object"))?;
        if obj.contains_key("product_ids")
            || obj.contains_key("category_ids")
            || obj.contains_key("amount_cents")
        {
            return Ok(RawDiscount::V1(value.clone()));
        }
        if obj.contains_key("code") || obj.contains_key("trigger") {
            return Ok(RawDiscount::V3(value.clone()));
        }
        Err(anyhow!("unrecognized discount schema"))
    }

    pub fn raw(&self) -> &Value {
        match self {
            RawDiscount::V1(v) | RawDiscount::V3(v) => v,
        }
    }

    pub fn source_id(&self) -> Option<String> {
        record_id(self.raw())
    }

    pub fn code(&self) -> Option<String> {
        self.raw()
            .get("code")
            .and_then(Value::as_str)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
    }

    /// Destination-ready payload with the trigger tree still carrying SOURCE
    /// ids; `migrate_one` remaps them before sending.
    pub fn normalize(&self) -> Value {
        let v = self.raw();
        let mut out = Map::new();
        if let Some(code) = self.code() {
            out.insert("code".into(), Value::String(code));
        }
        let name = v
            .get("name")
            .or_else(|| v.get("title"))
            .and_then(Value::as_str)
            .map(clean_name)
            .filter(|s| !s.is_empty());
        if let Some(name) = name {
            out.insert("name".into(), Value::String(name));
        }
        self.normalize_value(&mut out);
        if let Some(starts) = v
            .get("starts_at")
            .or_else(|| v.get("starts"))
            .and_then(Value::as_str)
        {
            out.insert("starts_at".into(), Value::String(starts.to_string()));
        }
        if let Some(ends) = v
            .get("ends_at")
            .or_else(|| v.get("ends"))
            .and_then(Value::as_str)
        {
            out.insert("ends_at".into(), Value::String(ends.to_string()));
        }
        if let Some(enabled) = v
            .get("enabled")
            .or_else(|| v.get("is_active"))
            .and_then(Value::as_bool)
        {
            out.insert("enabled".into(), Value::Bool(enabled));
        }
        if let Some(trigger) = self.trigger_tree() {
            out.insert("trigger".into(), trigger);
        }
        Value::Object(out)
    }

    fn normalize_value(&self, out: &mut Map<String, Value>) {
        let v = self.raw();
        let kind = v
            .get("discount_type")
            .or_else(|| v.get("value_type"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let is_percent = matches!(kind, "percent" | "percentage");
        match self {
            RawDiscount::V1(v) => {
                if is_percent {
                    if let Some(pct) = v.get("amount").and_then(Value::as_i64) {
                        out.insert("value_type".into(), Value::String("percentage".into()));
                        out.insert("value".into(), json!(pct));
                    }
                } else if let Some(cents) = v.get("amount_cents").and_then(Value::as_i64) {
                    let currency = v.get("currency").and_then(Value::as_str).unwrap_or("USD");
                    out.insert("value_type".into(), Value::String("fixed_amount".into()));
                    out.insert(
                        "value".into(),
                        Money::from_minor_units(cents, currency).to_value(),
                    );
                }
            }
            RawDiscount::V3(v) => {
                if is_percent {
                    if let Some(pct) = v.get("value") {
                        out.insert("value_type".into(), Value::String("percentage".into()));
                        out.insert("value".into(), pct.clone());
                    }
                } else if let Some(money) = v.get("value").and_then(Money::parse) {
                    out.insert("value_type".into(), Value::String("fixed_amount".into()));
                    out.insert("value".into(), money.to_value());
                }
            }
        }
    }

    /// Current rules already carry a composite tree; legacy flat id lists are
    /// lifted into the equivalent single-level `any` node (a legacy rule
    /// applied to its products OR its categories).
    fn trigger_tree(&self) -> Option<Value> {
        match self {
            RawDiscount::V3(v) => v.get("trigger").cloned(),
            RawDiscount::V1(v) => {
                let mut branches: Vec<Value> = Vec::new();
                for (field, kind) in [("product_ids", "product"), ("category_ids", "category")] {
                    if let Some(ids) = v.get(field).and_then(Value::as_array) {
                        if !ids.is_empty() {
                            branches
                                .push(json!({"scope": {"kind": kind, "ids": ids.clone()}}));
                        }
                    }
                }
                match branches.len() {
                    0 => None,
                    1 => Some(json!({"all": branches})),
                    _ => Some(json!({"any": branches})),
                }
            }
        }
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
        list_source(api, &ctx.source_store_id, "discounts", "legacy/discounts").await?;
    sort_oldest_first(&mut records, created_at_of);
    migrate_records(api, ledger, ctx, records).await
}

pub async fn migrate_records(
    api: &dyn CommerceApi,
    ledger: &Ledger,
    ctx: &mut MigrationContext,
    records: Vec<Value>,
) -> Result<RunSummary> {
    ctx.dest_index(api, EntityKind::Discount).await?;
    // Rules only resolve against entities this run (or a prior one) already
    // migrated, which is why discounts come after products and categories.
    let mut maps = ReferenceMaps::new();
    for (label, kind) in [("product", EntityKind::Product), ("category", EntityKind::Category)] {
        let map = ledger
            .reference_map(
                kind,
                ctx.owner_id,
                &ctx.source_store_id,
                &ctx.destination_store_id,
            )
            .await?;
        maps.insert(label.to_string(), map);
    }

    let mut summary = RunSummary::default();
    info!(count = records.len(), "migrating discount rules");
    for record in records {
        match migrate_one(api, ledger, ctx, &record, &maps).await {
            Ok(outcome) => match outcome {
                UpsertOutcome::Created(_) => summary.created += 1,
                UpsertOutcome::Recreated(_) => summary.recreated += 1,
                UpsertOutcome::Updated(_) => summary.updated += 1,
                UpsertOutcome::Skipped(_) => summary.skipped += 1,
                UpsertOutcome::Failed(_) => summary.failed += 1,
            },
            Err(e) => {
                warn!(error = %e, "discount migration failed");
                summary.failed += 1;
            }
        }
    }
    info!(%summary, "discount migration finished");
    Ok(summary)
}

async fn migrate_one(
    api: &dyn CommerceApi,
    ledger: &Ledger,
    ctx: &mut MigrationContext,
    record: &Value,
    maps: &ReferenceMaps,
) -> Result<UpsertOutcome> {
    let kind = EntityKind::Discount;
    let raw = RawDiscount::detect(record)?;
    let source_id = raw.source_id();
    let payload = raw.normalize();
    let natural_key = raw.code();

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

    // Strict remap: a partially-mapped trigger would change which carts the
    // rule fires on, so any unresolved id fails the record outright.
    let remap = remap_references(&payload, maps, true);
    if !remap.ok {
        let detail = json!({
            "stage": "reference_remap",
            "unresolved": remap.unresolved,
        });
        warn!(
            source_id = ?source_id,
            unresolved = ?detail["unresolved"],
            "discount references unmigrated entities"
        );
        ledger
            .mark_failed(
                kind,
                row.id,
                Some(&ctx.destination_store_id),
                &super::clip_value(&detail, MAX_DIAG_BYTES),
            )
            .await?;
        return Ok(UpsertOutcome::Failed(detail));
    }

    if ctx.dry_run {
        info!(source_id = ?source_id, "dry-run: would upsert discount");
        return Ok(UpsertOutcome::Skipped(json!({"reason": "dry run"})));
    }

    let dest_store = ctx.destination_store_id.clone();
    let index = ctx.dest_index(api, kind).await?;
    let outcome = upsert_entity(
        api,
        &dest_store,
        index,
        UpsertRequest {
            collection: "discounts",
            payload: remap.payload,
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
