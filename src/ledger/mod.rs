//! Migration ledger: the system of record for idempotency and resumability.
//!
//! One structurally identical table per entity kind tracks every
//! (owner, source store, destination store, source entity) migration attempt.
//! Rows are claimed lazily, mutated in place on retries, and never deleted by
//! normal operation.

pub mod allocator;
pub mod refmap;
pub mod store;

use chrono::{DateTime, Utc};
use serde_json::Value;

pub use allocator::{merge_decision, MergeDecision};
pub use store::Ledger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Category,
    Contact,
    Discount,
    Order,
    Product,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Category,
        EntityKind::Contact,
        EntityKind::Discount,
        EntityKind::Order,
        EntityKind::Product,
    ];

    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Category => "category_migrations",
            EntityKind::Contact => "contact_migrations",
            EntityKind::Discount => "discount_migrations",
            EntityKind::Order => "order_migrations",
            EntityKind::Product => "product_migrations",
        }
    }

    /// Key used for this kind's record list in import/export documents.
    pub fn doc_key(self) -> &'static str {
        match self {
            EntityKind::Category => "categories",
            EntityKind::Contact => "contacts",
            EntityKind::Discount => "discounts",
            EntityKind::Order => "orders",
            EntityKind::Product => "products",
        }
    }

}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.doc_key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    Pending,
    Success,
    Failed,
    Skipped,
}

impl MigrationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MigrationStatus::Pending => "pending",
            MigrationStatus::Success => "success",
            MigrationStatus::Failed => "failed",
            MigrationStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MigrationStatus::Pending),
            "success" => Some(MigrationStatus::Success),
            "failed" => Some(MigrationStatus::Failed),
            "skipped" => Some(MigrationStatus::Skipped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LedgerRow {
    pub id: i64,
    pub owner_id: i64,
    pub source_store_id: String,
    pub destination_store_id: Option<String>,
    pub source_entity_id: Option<String>,
    pub source_natural_key: Option<String>,
    pub destination_entity_id: Option<String>,
    pub status: String,
    pub error_detail: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerRow {
    pub fn status(&self) -> MigrationStatus {
        MigrationStatus::parse(&self.status).unwrap_or(MigrationStatus::Pending)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for s in [
            MigrationStatus::Pending,
            MigrationStatus::Success,
            MigrationStatus::Failed,
            MigrationStatus::Skipped,
        ] {
            assert_eq!(MigrationStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(MigrationStatus::parse("done"), None);
    }
}
