//! Contact (buyer) migration. Email is the natural key throughout: dedupe on
//! the destination, ledger natural-key storage, and later order-to-buyer
//! linking all go through the lowercased address.

use anyhow::{anyhow, Result};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::context::{record_id, MigrationContext};
use super::summary::RunSummary;
use super::upsert::{upsert_entity, UpsertOutcome, UpsertRequest};
use super::{list_source, MAX_DIAG_BYTES};
use crate::ledger::{EntityKind, Ledger};
use crate::normalization::order::{parse_created_at, sort_oldest_first};
use crate::normalization::text::clean_name;
use crate::platform::client::CommerceApi;

#[derive(Debug, Clone)]
pub enum RawContact {
    V1(Value),
    V3(Value),
}

impl RawContact {
    /// The current schema nests person fields under `profile`; the legacy one
    /// carries a flat `full_name`.
    pub fn detect(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| anyhow!("contact record is not an object"))?;
        if obj.contains_key("profile") {
            return Ok(RawContact::V3(value.clone()));
        }
        if obj.contains_key("full_name") || obj.contains_key("email") {
            return Ok(RawContact::V1(value.clone()));
        }
        Err(anyhow!("unrecognized contact schema"))
    }

    pub fn raw(&self) -> &Value {
        match self {
            RawContact::V1(v) | RawContact::V3(v) => v,
        }
    }

    pub fn source_id(&self) -> Option<String> {
        record_id(self.raw())
    }

    pub fn email(&self) -> Option<String> {
        self.raw()
            .get("email")
            .and_then(Value::as_str)
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
    }

    pub fn normalize(&self) -> Value {
        let v = self.raw();
        let mut out = Map::new();
        if let Some(email) = self.email() {
            out.insert("email".into(), Value::String(email));
        }

        let (first, last) = match self {
            RawContact::V3(v) => (
                v.pointer("/profile/first_name")
                    .and_then(Value::as_str)
                    .map(clean_name),
                v.pointer("/profile/last_name")
                    .and_then(Value::as_str)
                    .map(clean_name),
            ),
            RawContact::V1(v) => split_full_name(
                v.get("full_name").and_then(Value::as_str).unwrap_or(""),
            ),
        };
        if let Some(first) = first.filter(|s| !s.is_empty()) {
            out.insert("first_name".into(), Value::String(first));
        }
        if let Some(last) = last.filter(|s| !s.is_empty()) {
            out.insert("last_name".into(), Value::String(last));
        }
        if let Some(phone) = v.get("phone").and_then(Value::as_str) {
            let cleaned = clean_name(phone);
            if !cleaned.is_empty() {
                out.insert("phone".into(), Value::String(cleaned));
            }
        }
        // Addresses: allow-list the shippable fields, drop server bookkeeping.
        let addresses = match self {
            RawContact::V3(v) => v.get("addresses").and_then(Value::as_array).cloned(),
            RawContact::V1(v) => v
                .get("billing_address")
                .filter(|a| a.is_object())
                .map(|a| vec![a.clone()]),
        };
        if let Some(addresses) = addresses {
            let cleaned: Vec<Value> = addresses.iter().map(normalize_address).collect();
            if !cleaned.is_empty() {
                out.insert("addresses".into(), Value::Array(cleaned));
            }
        }
        if let Some(accepts) = v
            .get("accepts_marketing")
            .or_else(|| v.get("newsletter"))
            .and_then(Value::as_bool)
        {
            out.insert("accepts_marketing".into(), Value::Bool(accepts));
        }
        Value::Object(out)
    }
}

fn split_full_name(full: &str) -> (Option<String>, Option<String>) {
    let cleaned = clean_name(full);
    let mut parts = cleaned.splitn(2, ' ');
    let first = parts.next().map(str::to_string).filter(|s| !s.is_empty());
    let last = parts.next().map(str::to_string).filter(|s| !s.is_empty());
    (first, last)
}

fn normalize_address(addr: &Value) -> Value {
    let mut out = Map::new();
    for field in [
        "line1", "line2", "city", "region", "postal_code", "country", "name", "phone",
    ] {
        if let Some(v) = addr.get(field).and_then(Value::as_str) {
            let cleaned = clean_name(v);
            if !cleaned.is_empty() {
                out.insert(field.into(), Value::String(cleaned));
            }
        }
    }
    Value::Object(out)
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
        list_source(api, &ctx.source_store_id, "contacts", "legacy/contacts").await?;
    sort_oldest_first(&mut records, created_at_of);
    migrate_records(api, ledger, ctx, records).await
}

pub async fn migrate_records(
    api: &dyn CommerceApi,
    ledger: &Ledger,
    ctx: &mut MigrationContext,
    records: Vec<Value>,
) -> Result<RunSummary> {
    ctx.dest_index(api, EntityKind::Contact).await?;
    let mut summary = RunSummary::default();
    info!(count = records.len(), "migrating contacts");
    for record in records {
        match migrate_one(api, ledger, ctx, &record).await {
            Ok(outcome) => match outcome {
                UpsertOutcome::Created(_) => summary.created += 1,
                UpsertOutcome::Recreated(_) => summary.recreated += 1,
                UpsertOutcome::Updated(_) => summary.updated += 1,
                UpsertOutcome::Skipped(_) => summary.skipped += 1,
                UpsertOutcome::Failed(_) => summary.failed += 1,
            },
            Err(e) => {
                warn!(error = %e, "contact migration failed");
                summary.failed += 1;
            }
        }
    }
    info!(%summary, "contact migration finished");
    Ok(summary)
}

async fn migrate_one(
    api: &dyn CommerceApi,
    ledger: &Ledger,
    ctx: &mut MigrationContext,
    record: &Value,
) -> Result<UpsertOutcome> {
    let kind = EntityKind::Contact;
    let raw = RawContact::detect(record)?;
    let source_id = raw.source_id();
    let email = raw.email();
    let payload = raw.normalize();

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
            email.as_deref(),
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

    if email.is_none() {
        let detail = json!({"stage": "normalize", "reason": "contact has no email"});
        ledger
            .mark_failed(kind, row.id, Some(&ctx.destination_store_id), &detail)
            .await?;
        return Ok(UpsertOutcome::Failed(detail));
    }

    if ctx.dry_run {
        info!(source_id = ?source_id, "dry-run: would upsert contact");
        return Ok(UpsertOutcome::Skipped(json!({"reason": "dry run"})));
    }

    let dest_store = ctx.destination_store_id.clone();
    let index = ctx.dest_index(api, kind).await?;
    let outcome = upsert_entity(
        api,
        &dest_store,
        index,
        UpsertRequest {
            collection: "contacts",
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
    fn detects_profile_shape_as_current() {
        let v3 = json!({"id": "u1", "email": "A@B.com", "profile": {"first_name": "Ada"}});
        assert!(matches!(
            RawContact::detect(&v3).unwrap(),
            RawContact::V3(_)
        ));
        let v1 = json!({"id": 2, "email": "x@y.z", "full_name": "Grace Hopper"});
        assert!(matches!(
            RawContact::detect(&v1).unwrap(),
            RawContact::V1(_)
        ));
    }

    #[test]
    fn email_is_lowercased_and_trimmed() {
        let raw = RawContact::detect(&json!({"email": "  Ada@Example.COM ", "full_name": "Ada"}))
            .unwrap();
        assert_eq!(raw.email(), Some("ada@example.com".into()));
        assert_eq!(raw.normalize()["email"], json!("ada@example.com"));
    }

    #[test]
    fn legacy_full_name_splits_into_parts() {
        let raw =
            RawContact::detect(&json!({"email": "g@h.io", "full_name": "Grace Brewster Hopper"}))
                .unwrap();
        let out = raw.normalize();
        assert_eq!(out["first_name"], json!("Grace"));
        assert_eq!(out["last_name"], json!("Brewster Hopper"));
    }

    #[test]
    fn addresses_are_allow_listed() {
        let raw = RawContact::detect(&json!({
            "email": "a@b.c",
            "profile": {},
            "addresses": [{
                "line1": "1 Main St",
                "city": "Springfield",
                "country": "US",
                "internal_id": 999,
                "verified_at": "2024-01-01"
            }]
        }))
        .unwrap();
        let out = raw.normalize();
        let addr = &out["addresses"][0];
        assert_eq!(addr["line1"], json!("1 Main St"));
        assert!(addr.get("internal_id").is_none());
        assert!(addr.get("verified_at").is_none());
    }

    #[test]
    fn server_fields_are_dropped() {
        let raw = RawContact::detect(&json!({
            "id": "u9",
            "email": "a@b.c",
            "profile": {"first_name": "Ada"},
            "order_count": 12,
            "total_spent": "102.00"
        }))
        .unwrap();
        let out = raw.normalize();
        assert!(out.get("id").is_none());
        assert!(out.get("order_count").is_none());
        assert!(out.get("total_spent").is_none());
    }
}
