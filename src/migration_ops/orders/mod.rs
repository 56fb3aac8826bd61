//! Order reconstruction pipeline, the most stateful migrator.
//!
//! An order moves through: not-created -> created -> payments reconciled ->
//! fulfillments reconciled -> refunds reconciled. Only creation can fail the
//! ledger row; once the destination order exists, every sub-step is
//! independently retryable and logs-but-continues so a rerun can finish what
//! an earlier run left half done.

pub mod fulfillments;
pub mod numbering;
pub mod payments;
pub mod refunds;

use anyhow::{anyhow, Result};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::context::{record_id, MigrationContext};
use super::summary::RunSummary;
use super::upsert::UpsertOutcome;
use super::{list_source, write_failure_detail, MAX_DIAG_BYTES};
use crate::ledger::{EntityKind, Ledger};
use crate::normalization::money::Money;
use crate::normalization::order::{parse_created_at, sort_oldest_first};
use crate::normalization::text::clean_name;
use crate::platform::client::CommerceApi;

use fulfillments::{index_dest_lines, plan_fulfillments};
use numbering::{apply_attempt, creation_plan};
use payments::plan_payments;
use refunds::plan_refunds;

#[derive(Debug, Clone)]
pub enum RawOrder {
    V1(Value),
    V3(Value),
}

impl RawOrder {
    /// Legacy orders carry `order_no`/`items`/cent totals; current ones
    /// `number`/`line_items`.
    pub fn detect(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| anyhow!("order record is not an object"))?;
        if obj.contains_key("order_no") || obj.contains_key("items") {
            return Ok(RawOrder::V1(value.clone()));
        }
        if obj.contains_key("number") || obj.contains_key("line_items") {
            return Ok(RawOrder::V3(value.clone()));
        }
        Err(anyhow!("unrecognized order schema"))
    }

    pub fn raw(&self) -> &Value {
        match self {
            RawOrder::V1(v) | RawOrder::V3(v) => v,
        }
    }

    pub fn source_id(&self) -> Option<String> {
        record_id(self.raw())
    }

    /// The human-visible order number (the natural key).
    pub fn number(&self) -> Option<String> {
        let field = match self {
            RawOrder::V1(_) => "order_no",
            RawOrder::V3(_) => "number",
        };
        match self.raw().get(field) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn buyer_email(&self) -> Option<String> {
        self.raw()
            .get("buyer_email")
            .or_else(|| self.raw().get("customer_email"))
            .or_else(|| self.raw().pointer("/buyer/email"))
            .and_then(Value::as_str)
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
    }

    pub fn tag_names(&self) -> Vec<String> {
        self.raw()
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| match t {
                        Value::String(s) => Some(s.clone()),
                        Value::Object(_) => t
                            .get("name")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        _ => None,
                    })
                    .filter(|s| !s.trim().is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Exported sub-records the source carried along.
    pub fn source_payments(&self) -> Vec<Value> {
        self.sub_records("payments")
    }

    pub fn source_refunds(&self) -> Vec<Value> {
        self.sub_records("refunds")
    }

    fn sub_records(&self, field: &str) -> Vec<Value> {
        self.raw()
            .get(field)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    /// Source line items, in either dialect's shape.
    pub fn source_lines(&self) -> Vec<Value> {
        let field = match self {
            RawOrder::V1(_) => "items",
            RawOrder::V3(_) => "line_items",
        };
        self.sub_records(field)
    }

    /// Creation payload: purchase date and rebuilt line items only. System
    /// fields (activity ids, computed totals, server timestamps) never
    /// survive, and neither do the sub-records reconciled after creation.
    pub fn normalize(&self) -> Value {
        let v = self.raw();
        let mut out = Map::new();
        if let Some(number) = self.number() {
            out.insert("number".into(), Value::String(number));
        }
        let purchased = v
            .get("purchased_at")
            .or_else(|| v.get("placed_at"))
            .or_else(|| v.get("created_at"))
            .and_then(Value::as_str);
        if let Some(purchased) = purchased {
            out.insert("purchased_at".into(), Value::String(purchased.to_string()));
        }
        let lines: Vec<Value> = self
            .source_lines()
            .iter()
            .map(|line| self.normalize_line(line))
            .collect();
        out.insert("line_items".into(), Value::Array(lines));
        Value::Object(out)
    }

    fn normalize_line(&self, line: &Value) -> Value {
        let mut out = Map::new();
        if let Some(sku) = line.get("sku").and_then(Value::as_str) {
            if !sku.trim().is_empty() {
                out.insert("sku".into(), Value::String(sku.trim().to_string()));
            }
        }
        if let Some(name) = line
            .get("name")
            .or_else(|| line.get("title"))
            .and_then(Value::as_str)
        {
            out.insert("name".into(), Value::String(clean_name(name)));
        }
        let qty = line
            .get("quantity")
            .or_else(|| line.get("qty"))
            .and_then(Value::as_i64)
            .unwrap_or(1);
        out.insert("quantity".into(), json!(qty));
        let price = match line.get("price") {
            Some(p) => Money::parse(p),
            None => line.get("price_cents").and_then(Value::as_i64).map(|c| {
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
        Value::Object(out)
    }
}

fn created_at_of(v: &Value) -> Option<chrono::DateTime<chrono::Utc>> {
    v.get("purchased_at")
        .or_else(|| v.get("placed_at"))
        .or_else(|| v.get("created_at"))
        .and_then(parse_created_at)
}

pub async fn migrate(
    api: &dyn CommerceApi,
    ledger: &Ledger,
    ctx: &mut MigrationContext,
) -> Result<RunSummary> {
    let mut records = list_source(api, &ctx.source_store_id, "orders", "legacy/orders").await?;
    sort_oldest_first(&mut records, created_at_of);
    migrate_records(api, ledger, ctx, records).await
}

pub async fn migrate_records(
    api: &dyn CommerceApi,
    ledger: &Ledger,
    ctx: &mut MigrationContext,
    records: Vec<Value>,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    info!(count = records.len(), "migrating orders");
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
                warn!(error = %e, "order migration failed");
                summary.failed += 1;
            }
        }
    }
    info!(%summary, "order migration finished");
    Ok(summary)
}

async fn migrate_one(
    api: &dyn CommerceApi,
    ledger: &Ledger,
    ctx: &mut MigrationContext,
    record: &Value,
) -> Result<UpsertOutcome> {
    let kind = EntityKind::Order;
    let raw = RawOrder::detect(record)?;
    let source_id = raw.source_id();
    let natural_key = raw.number();

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

    if ctx.dry_run {
        info!(source_id = ?source_id, "dry-run: would reconstruct order");
        return Ok(UpsertOutcome::Skipped(json!({"reason": "dry run"})));
    }

    let dest_store = ctx.destination_store_id.clone();

    // A row that already points at a destination order rejoins the pipeline
    // after creation: reruns reconcile sub-steps, they never create twice.
    let (dest_id, created_now) = match &row.destination_entity_id {
        Some(existing) => (existing.clone(), false),
        None => {
            let dest_id = match create_order(api, ledger, ctx, &raw, row.id).await? {
                Some(id) => id,
                None => {
                    return Ok(UpsertOutcome::Failed(json!({"stage": "create"})));
                }
            };
            (dest_id, true)
        }
    };

    // Sub-steps log-and-continue: a reconciliation hiccup never flips the
    // order back to failed once the destination object exists.
    if let Err(e) = reconcile_payments(api, ctx, &raw, &dest_id).await {
        warn!(order = dest_id, error = %e, "payment reconciliation incomplete");
    }
    if let Err(e) = reconcile_fulfillments(api, ctx, &raw, &dest_id).await {
        warn!(order = dest_id, error = %e, "fulfillment reconciliation incomplete");
    }
    if let Err(e) = reconcile_refunds(api, ctx, &raw, &dest_id).await {
        warn!(order = dest_id, error = %e, "refund reconciliation incomplete");
    }

    ledger.mark_success(kind, row.id, &dest_store, &dest_id).await?;
    Ok(if created_now {
        UpsertOutcome::Created(dest_id)
    } else {
        UpsertOutcome::Updated(dest_id)
    })
}

/// Create the destination order, preserving the source number when the
/// destination honors explicit numbers. Returns `None` after marking the
/// ledger row failed.
async fn create_order(
    api: &dyn CommerceApi,
    ledger: &Ledger,
    ctx: &mut MigrationContext,
    raw: &RawOrder,
    row_id: i64,
) -> Result<Option<String>> {
    let mut payload = raw.normalize();

    // Tags resolve to destination ids by display name, creating on demand.
    let tag_ids = resolve_tags(api, ctx, &raw.tag_names()).await?;
    if !tag_ids.is_empty() {
        if let Some(obj) = payload.as_object_mut() {
            obj.insert(
                "tag_ids".into(),
                Value::Array(tag_ids.into_iter().map(Value::String).collect()),
            );
        }
    }

    // Buyer attaches through the contact ledger when the email migrated.
    if let Some(email) = raw.buyer_email() {
        let contact = ledger
            .find_success_by_natural_key(
                EntityKind::Contact,
                ctx.owner_id,
                &ctx.source_store_id,
                &ctx.destination_store_id,
                &email,
            )
            .await?;
        match contact.and_then(|c| c.destination_entity_id) {
            Some(buyer_id) => {
                if let Some(obj) = payload.as_object_mut() {
                    obj.insert("buyer_id".into(), Value::String(buyer_id));
                }
            }
            None => warn!(email, "buyer contact not migrated; order created without buyer"),
        }
    }

    let honored = ctx.manual_numbering_honored(api).await?;
    let plan = creation_plan(honored, raw.number().as_deref());
    let mut last_failure: Option<Value> = None;
    for attempt in &plan {
        apply_attempt(&mut payload, attempt);
        ctx.gate.wait_ready().await;
        let resp = api.post(&ctx.destination_store_id, "orders", &payload).await?;
        if resp.ok() {
            if let Some(id) = record_id(&resp.body) {
                return Ok(Some(id));
            }
            last_failure = Some(json!({
                "stage": "create",
                "detail": "created but response carried no id",
            }));
            break;
        }
        warn!(
            attempt = ?attempt,
            status = resp.status,
            "order creation attempt rejected"
        );
        last_failure = Some(write_failure_detail("create", &payload, &resp));
    }

    let detail = last_failure.unwrap_or_else(|| json!({"stage": "create"}));
    ledger
        .mark_failed(
            EntityKind::Order,
            row_id,
            Some(&ctx.destination_store_id),
            &super::clip_value(&detail, MAX_DIAG_BYTES),
        )
        .await?;
    Ok(None)
}

/// Tag display name -> destination tag id, creating missing tags.
async fn resolve_tags(
    api: &dyn CommerceApi,
    ctx: &mut MigrationContext,
    names: &[String],
) -> Result<Vec<String>> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let dest_store = ctx.destination_store_id.clone();
    ctx.tag_index(api).await?;
    let mut ids: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let key = name.trim().to_lowercase();
        let existing = ctx.tag_index(api).await?.get(&key).cloned();
        if let Some(id) = existing {
            ids.push(id);
            continue;
        }
        ctx.gate.wait_ready().await;
        let resp = api
            .post(&dest_store, "tags", &json!({"name": name.trim()}))
            .await?;
        if !resp.ok() {
            warn!(tag = name.as_str(), status = resp.status, "tag creation rejected");
            continue;
        }
        if let Some(id) = record_id(&resp.body) {
            ctx.tag_index(api).await?.insert(key, id.clone());
            ids.push(id);
        }
    }
    Ok(ids)
}

async fn existing_payments(
    api: &dyn CommerceApi,
    store_id: &str,
    order_id: &str,
) -> Result<Vec<Value>> {
    let resp = api
        .get(store_id, &format!("orders/{order_id}/payments"), &[])
        .await?;
    if !resp.ok() {
        return Ok(Vec::new());
    }
    Ok(resp
        .body
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default())
}

async fn reconcile_payments(
    api: &dyn CommerceApi,
    ctx: &MigrationContext,
    raw: &RawOrder,
    order_id: &str,
) -> Result<()> {
    let source = raw.source_payments();
    if source.is_empty() {
        return Ok(());
    }
    let existing = existing_payments(api, &ctx.destination_store_id, order_id).await?;
    let plan = plan_payments(&existing, &source);
    info!(order = order_id, existing = existing.len(), adding = plan.len(), "payments diffed");
    for payment in plan {
        ctx.gate.wait_ready().await;
        let resp = api
            .post(
                &ctx.destination_store_id,
                &format!("orders/{order_id}/payments"),
                &payment,
            )
            .await?;
        if !resp.ok() {
            warn!(order = order_id, status = resp.status, "add-payment rejected");
        }
    }
    Ok(())
}

async fn reconcile_fulfillments(
    api: &dyn CommerceApi,
    ctx: &MigrationContext,
    raw: &RawOrder,
    order_id: &str,
) -> Result<()> {
    let source_lines = raw.source_lines();
    if source_lines.is_empty() {
        return Ok(());
    }
    let store = &ctx.destination_store_id;
    let order = api.get(store, &format!("orders/{order_id}"), &[]).await?;
    if !order.ok() {
        warn!(order = order_id, status = order.status, "cannot fetch order for fulfillment");
        return Ok(());
    }
    let existing = api
        .get(store, &format!("orders/{order_id}/fulfillments"), &[])
        .await?;
    let existing_items = existing
        .body
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut dest_lines = index_dest_lines(&order.body, &existing_items);
    let plan = plan_fulfillments(&source_lines, &mut dest_lines);
    if plan.is_empty() {
        return Ok(());
    }
    let body = json!({
        "line_items": plan
            .iter()
            .map(|(line_id, qty)| json!({"line_item_id": line_id, "quantity": qty}))
            .collect::<Vec<_>>()
    });
    ctx.gate.wait_ready().await;
    let resp = api
        .post(store, &format!("orders/{order_id}/fulfillments"), &body)
        .await?;
    if !resp.ok() {
        warn!(order = order_id, status = resp.status, "create-fulfillment rejected");
    }
    Ok(())
}

async fn reconcile_refunds(
    api: &dyn CommerceApi,
    ctx: &MigrationContext,
    raw: &RawOrder,
    order_id: &str,
) -> Result<()> {
    let source = raw.source_refunds();
    if source.is_empty() {
        return Ok(());
    }
    // Refreshed so payments attached moments ago are visible to bucketing.
    let existing = existing_payments(api, &ctx.destination_store_id, order_id).await?;
    let plan = plan_refunds(&existing, &source);
    for request in plan {
        ctx.gate.wait_ready().await;
        let path = format!(
            "orders/{order_id}/payments/{}/refunds",
            request.payment_id
        );
        let body = json!({"amount": request.amount.to_value()});
        let resp = api.post(&ctx.destination_store_id, &path, &body).await?;
        if !resp.ok() {
            warn!(
                order = order_id,
                payment = request.payment_id.as_str(),
                status = resp.status,
                "refund-payment rejected"
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration_ops::testutil::FakeApi;
    use crate::platform::gate::RateGate;

    fn ctx() -> MigrationContext {
        MigrationContext::new(1, "src", "dst", RateGate::new(), false)
    }

    #[test]
    fn detects_both_schema_versions() {
        let v1 = json!({"id": 1, "order_no": "1001", "items": []});
        assert!(matches!(RawOrder::detect(&v1).unwrap(), RawOrder::V1(_)));
        let v3 = json!({"id": "o1", "number": "1001", "line_items": []});
        assert!(matches!(RawOrder::detect(&v3).unwrap(), RawOrder::V3(_)));
        assert!(RawOrder::detect(&json!({"zzz": 1})).is_err());
    }

    #[test]
    fn normalize_rebuilds_line_items_and_drops_system_fields() {
        let raw = RawOrder::detect(&json!({
            "id": "o1",
            "number": "1001",
            "purchased_at": "2024-03-01T09:00:00Z",
            "updated_at": "2024-03-02T00:00:00Z",
            "activity_ids": [9, 10],
            "total": {"amount": "25.00", "currency": "USD"},
            "line_items": [
                {"id": "L1", "variant_id": "V9", "sku": "A-1", "name": "Mug", "quantity": 2,
                 "price": {"amount": "12.50", "currency": "USD"}}
            ]
        }))
        .unwrap();
        let out = raw.normalize();
        assert_eq!(out["number"], json!("1001"));
        assert_eq!(out["purchased_at"], json!("2024-03-01T09:00:00Z"));
        assert!(out.get("updated_at").is_none());
        assert!(out.get("activity_ids").is_none());
        assert!(out.get("total").is_none());
        let line = &out["line_items"][0];
        assert_eq!(line["sku"], json!("A-1"));
        assert_eq!(line["quantity"], json!(2));
        assert!(line.get("id").is_none());
        assert!(line.get("variant_id").is_none());
    }

    #[test]
    fn legacy_line_cents_convert_through_order_currency() {
        let raw = RawOrder::detect(&json!({
            "id": 4,
            "order_no": 77,
            "currency": "EUR",
            "items": [{"sku": "B", "title": "Cap", "qty": 1, "price_cents": 450}]
        }))
        .unwrap();
        let out = raw.normalize();
        assert_eq!(out["number"], json!("77"));
        let line = &out["line_items"][0];
        assert_eq!(line["name"], json!("Cap"));
        assert_eq!(line["price"], json!({"amount": "4.50", "currency": "EUR"}));
    }

    #[test]
    fn buyer_email_reads_all_shapes_lowercased() {
        let flat = RawOrder::detect(&json!({"number": "1", "buyer_email": " A@B.COM "})).unwrap();
        assert_eq!(flat.buyer_email(), Some("a@b.com".into()));
        let nested =
            RawOrder::detect(&json!({"number": "1", "buyer": {"email": "c@d.com"}})).unwrap();
        assert_eq!(nested.buyer_email(), Some("c@d.com".into()));
        let legacy =
            RawOrder::detect(&json!({"order_no": 1, "customer_email": "e@f.com"})).unwrap();
        assert_eq!(legacy.buyer_email(), Some("e@f.com".into()));
    }

    #[test]
    fn tag_names_accept_strings_and_objects() {
        let raw = RawOrder::detect(&json!({
            "number": "1",
            "tags": ["vip", {"id": "t2", "name": "wholesale"}, "", 7]
        }))
        .unwrap();
        assert_eq!(raw.tag_names(), vec!["vip".to_string(), "wholesale".to_string()]);
    }

    #[tokio::test]
    async fn resolve_tags_creates_only_missing_ones() {
        let api = FakeApi::new();
        api.on("POST", "tags", 200, json!({"id": "t-new", "name": "new"}));
        let mut ctx = ctx();
        ctx.seed_tag_index(std::collections::HashMap::from([(
            "vip".to_string(),
            "t-vip".to_string(),
        )]));
        let ids = resolve_tags(&api, &mut ctx, &["VIP".to_string(), "new".to_string()])
            .await
            .unwrap();
        assert_eq!(ids, vec!["t-vip".to_string(), "t-new".to_string()]);
        assert_eq!(api.calls_to("POST", "tags"), 1);
    }

    #[tokio::test]
    async fn payment_reconciliation_skips_attached_signatures() {
        let api = FakeApi::new();
        api.on(
            "GET",
            "orders/o9/payments",
            200,
            json!({"items": [{"id": "dp1", "provider_transaction_id": "tx123"}]}),
        );
        api.on("POST", "orders/o9/payments", 200, json!({"id": "dp2"}));
        let raw = RawOrder::detect(&json!({
            "number": "9",
            "payments": [
                {"provider_transaction_id": "tx123"},
                {"provider_transaction_id": "tx456"}
            ]
        }))
        .unwrap();
        reconcile_payments(&api, &ctx(), &raw, "o9").await.unwrap();
        assert_eq!(api.calls_to("POST", "orders/o9/payments"), 1);
    }

    #[tokio::test]
    async fn fulfillment_reconciliation_requests_only_the_remaining_delta() {
        let api = FakeApi::new();
        api.on(
            "GET",
            "orders/o9",
            200,
            json!({"id": "o9", "line_items": [{"id": "L1", "sku": "A-1", "quantity": 5}]}),
        );
        api.on(
            "GET",
            "orders/o9/fulfillments",
            200,
            json!({"items": [{"line_items": [{"line_item_id": "L1", "quantity": 3}]}]}),
        );
        api.on("POST", "orders/o9/fulfillments", 200, json!({"id": "f2"}));
        let raw = RawOrder::detect(&json!({
            "number": "9",
            "line_items": [{"sku": "A-1", "quantity": 4}]
        }))
        .unwrap();
        reconcile_fulfillments(&api, &ctx(), &raw, "o9").await.unwrap();
        let calls = api.calls.lock().unwrap();
        let post = calls
            .iter()
            .find(|c| c.method == "POST" && c.path == "orders/o9/fulfillments")
            .expect("one fulfillment call");
        assert_eq!(
            post.body["line_items"],
            json!([{"line_item_id": "L1", "quantity": 2}])
        );
    }

    #[tokio::test]
    async fn fully_fulfilled_order_posts_nothing() {
        let api = FakeApi::new();
        api.on(
            "GET",
            "orders/o9",
            200,
            json!({"id": "o9", "line_items": [{"id": "L1", "sku": "A-1", "quantity": 5}]}),
        );
        api.on(
            "GET",
            "orders/o9/fulfillments",
            200,
            json!({"items": [{"line_items": [{"line_item_id": "L1", "quantity": 5}]}]}),
        );
        let raw = RawOrder::detect(&json!({
            "number": "9",
            "line_items": [{"sku": "A-1", "quantity": 5}]
        }))
        .unwrap();
        reconcile_fulfillments(&api, &ctx(), &raw, "o9").await.unwrap();
        assert_eq!(api.calls_to("POST", "orders/o9/fulfillments"), 0);
    }

    #[tokio::test]
    async fn refund_reconciliation_caps_at_remaining_balance() {
        let api = FakeApi::new();
        api.on(
            "GET",
            "orders/o9/payments",
            200,
            json!({"items": [{
                "id": "dp1",
                "provider_transaction_id": "tx1",
                "amount": {"amount": "10.00", "currency": "USD"},
                "refunded_amount": {"amount": "4.00", "currency": "USD"}
            }]}),
        );
        api.on(
            "POST",
            "orders/o9/payments/dp1/refunds",
            200,
            json!({"id": "r1"}),
        );
        let raw = RawOrder::detect(&json!({
            "number": "9",
            "refunds": [{
                "provider_transaction_id": "tx1",
                "refund_amount": {"amount": "9.00", "currency": "USD"}
            }]
        }))
        .unwrap();
        reconcile_refunds(&api, &ctx(), &raw, "o9").await.unwrap();
        let calls = api.calls.lock().unwrap();
        let post = calls
            .iter()
            .find(|c| c.method == "POST" && c.path == "orders/o9/payments/dp1/refunds")
            .expect("one refund call");
        assert_eq!(post.body["amount"], json!({"amount": "6.00", "currency": "USD"}));
    }
}
