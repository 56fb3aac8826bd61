//! Monetary amounts are decimal-string + currency-code pairs end to end.
//! Floats never enter the pipeline: the legacy API's integer minor units and
//! the current API's decimal strings both land in `BigDecimal`.

use bigdecimal::{BigDecimal, Zero};
use serde_json::{json, Value};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub struct Money {
    pub amount: BigDecimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: BigDecimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    /// Legacy API shape: integer minor units (cents).
    pub fn from_minor_units(minor: i64, currency: impl Into<String>) -> Self {
        let amount = (BigDecimal::from(minor) / BigDecimal::from(100)).with_scale(2);
        Self::new(amount, currency)
    }

    /// Parse either wire shape:
    /// `{"amount": "12.30", "currency": "USD"}` (current) or a bare integer of
    /// minor units next to a `currency` sibling (legacy callers pass both).
    pub fn parse(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let currency = obj.get("currency")?.as_str()?.to_string();
        match obj.get("amount")? {
            Value::String(s) => {
                let amount = BigDecimal::from_str(s.trim()).ok()?;
                Some(Self::new(amount, currency))
            }
            Value::Number(n) => {
                // Integers here are minor units from the legacy schema.
                let minor = n.as_i64()?;
                Some(Self::from_minor_units(minor, currency))
            }
            _ => None,
        }
    }

    /// Wire representation for the destination API.
    pub fn to_value(&self) -> Value {
        json!({
            "amount": self.amount_str(),
            "currency": self.currency,
        })
    }

    /// Canonical 2-decimal string, used in wire payloads and signatures.
    pub fn amount_str(&self) -> String {
        self.amount.with_scale(2).to_string()
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }
}

/// Refund math: what is left refundable of `paid` after `already_refunded`,
/// clamped at zero (over-refunded payments yield nothing, never a negative).
pub fn remaining_refundable(paid: &BigDecimal, already_refunded: &BigDecimal) -> BigDecimal {
    let rest = paid - already_refunded;
    if rest < BigDecimal::zero() {
        BigDecimal::zero()
    } else {
        rest
    }
}
