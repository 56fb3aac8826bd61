//! Refund reconciliation.
//!
//! Source refunds are bucketed onto destination payments through the same
//! content-signature scheme used for payment dedupe, and each bucket is
//! capped at the payment's remaining refundable balance (paid minus what the
//! destination has already refunded), so reruns never over-refund.

use bigdecimal::{BigDecimal, Zero};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

use super::payments::signature;
use crate::normalization::money::{remaining_refundable, Money};

#[derive(Debug, Clone, PartialEq)]
pub struct RefundRequest {
    pub payment_id: String,
    pub amount: Money,
}

fn paid_amount(payment: &Value) -> Option<Money> {
    payment.get("amount").and_then(Money::parse)
}

fn refunded_amount(payment: &Value) -> BigDecimal {
    payment
        .get("refunded_amount")
        .or_else(|| payment.get("refunded"))
        .and_then(Money::parse)
        .map(|m| m.amount)
        .unwrap_or_else(BigDecimal::zero)
}

/// One capped refund request per destination payment that source refunds
/// point at. Empty buckets (fully refunded payments, unmatched signatures)
/// produce nothing.
pub fn plan_refunds(existing_payments: &[Value], source_refunds: &[Value]) -> Vec<RefundRequest> {
    // Signature -> destination payment, for bucketing.
    let by_signature: HashMap<String, &Value> = existing_payments
        .iter()
        .map(|p| (signature(p), p))
        .collect();

    // Accumulate requested refund per destination payment id.
    let mut wanted: HashMap<String, BigDecimal> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for refund in source_refunds {
        // A source refund references its payment by the payment fields it
        // carries (provider/gateway/receipt id), so its own signature IS the
        // payment's.
        let sig = signature(refund);
        let Some(payment) = by_signature.get(&sig) else {
            warn!(signature = sig, "source refund matches no destination payment");
            continue;
        };
        let Some(payment_id) = super::super::context::record_id(payment) else {
            continue;
        };
        let Some(amount) = refund
            .get("refund_amount")
            .or_else(|| refund.get("amount"))
            .and_then(Money::parse)
        else {
            continue;
        };
        if !wanted.contains_key(&payment_id) {
            order.push(payment_id.clone());
        }
        *wanted.entry(payment_id).or_insert_with(BigDecimal::zero) += amount.amount;
    }

    let mut plan: Vec<RefundRequest> = Vec::new();
    for payment_id in order {
        let Some(payment) = existing_payments
            .iter()
            .find(|p| super::super::context::record_id(p).as_deref() == Some(&payment_id))
        else {
            continue;
        };
        let Some(paid) = paid_amount(payment) else {
            continue;
        };
        let cap = remaining_refundable(&paid.amount, &refunded_amount(payment));
        let requested = &wanted[&payment_id];
        let amount = if requested > &cap { cap } else { requested.clone() };
        if amount.is_zero() {
            continue;
        }
        plan.push(RefundRequest {
            payment_id,
            amount: Money::new(amount, paid.currency),
        });
    }
    plan
}
