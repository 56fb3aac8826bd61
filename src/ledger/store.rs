//! Ledger persistence: owner-scoped queries over the per-kind tables.
//!
//! Table names come from `EntityKind::table()` (compile-time constants), so
//! the `format!`-built SQL never interpolates caller data; everything else is
//! bound.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::debug;

use super::{EntityKind, LedgerRow, MigrationStatus};
use crate::util::db::Db;

#[derive(Clone)]
pub struct Ledger {
    pub pool: PgPool,
}

impl Ledger {
    pub fn new(db: &Db) -> Self {
        Self {
            pool: db.pool.clone(),
        }
    }

    pub async fn mark_success(
        &self,
        kind: EntityKind,
        row_id: i64,
        destination_store_id: &str,
        destination_entity_id: &str,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET status = 'success', destination_store_id = $2,
                    destination_entity_id = $3, error_detail = NULL, updated_at = now()
             WHERE id = $1",
            kind.table()
        );
        sqlx::query(&sql)
            .bind(row_id)
            .bind(destination_store_id)
            .bind(destination_entity_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("marking {kind} ledger row {row_id} success"))?;
        Ok(())
    }

    pub async fn mark_failed(
        &self,
        kind: EntityKind,
        row_id: i64,
        destination_store_id: Option<&str>,
        detail: &Value,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET status = 'failed',
                    destination_store_id = COALESCE($2, destination_store_id),
                    error_detail = $3, updated_at = now()
             WHERE id = $1",
            kind.table()
        );
        sqlx::query(&sql)
            .bind(row_id)
            .bind(destination_store_id)
            .bind(detail)
            .execute(&self.pool)
            .await
            .with_context(|| format!("marking {kind} ledger row {row_id} failed"))?;
        Ok(())
    }

    pub async fn mark_skipped(&self, kind: EntityKind, row_id: i64, detail: &Value) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET status = 'skipped', error_detail = $2, updated_at = now()
             WHERE id = $1",
            kind.table()
        );
        sqlx::query(&sql)
            .bind(row_id)
            .bind(detail)
            .execute(&self.pool)
            .await
            .with_context(|| format!("marking {kind} ledger row {row_id} skipped"))?;
        Ok(())
    }

    /// Append-only export bookkeeping: every export run inserts fresh pending
    /// rows with no destination store, preserving prior export history.
    pub async fn record_export(
        &self,
        kind: EntityKind,
        owner_id: i64,
        source_store_id: &str,
        entries: &[(Option<String>, Option<String>)],
    ) -> Result<u64> {
        let sql = format!(
            "INSERT INTO {} (owner_id, source_store_id, source_entity_id, source_natural_key, status)
             VALUES ($1, $2, $3, $4, 'pending')",
            kind.table()
        );
        let mut inserted = 0u64;
        for (source_entity_id, natural_key) in entries {
            sqlx::query(&sql)
                .bind(owner_id)
                .bind(source_store_id)
                .bind(source_entity_id.as_deref())
                .bind(natural_key.as_deref())
                .execute(&self.pool)
                .await
                .with_context(|| format!("recording {kind} export row"))?;
            inserted += 1;
        }
        debug!(kind = %kind, inserted, "export rows recorded");
        Ok(inserted)
    }

    /// Source id -> destination id for every completed migration of `kind`
    /// between this store pair. The read side of cross-entity reference
    /// mapping.
    pub async fn reference_map(
        &self,
        kind: EntityKind,
        owner_id: i64,
        source_store_id: &str,
        destination_store_id: &str,
    ) -> Result<HashMap<String, String>> {
        let sql = format!(
            "SELECT source_entity_id, destination_entity_id FROM {}
             WHERE owner_id = $1 AND source_store_id = $2 AND destination_store_id = $3
               AND status = 'success'
               AND source_entity_id IS NOT NULL AND destination_entity_id IS NOT NULL",
            kind.table()
        );
        let rows: Vec<(Option<String>, Option<String>)> = sqlx::query_as(&sql)
            .bind(owner_id)
            .bind(source_store_id)
            .bind(destination_store_id)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("loading {kind} reference map"))?;
        Ok(rows
            .into_iter()
            .filter_map(|(src, dst)| Some((src?, dst?)))
            .collect())
    }

    /// Completed row lookup by natural key (e.g. contact email for order buyer
    /// linking). Keys are stored lowercased at claim time.
    pub async fn find_success_by_natural_key(
        &self,
        kind: EntityKind,
        owner_id: i64,
        source_store_id: &str,
        destination_store_id: &str,
        natural_key: &str,
    ) -> Result<Option<LedgerRow>> {
        let sql = format!(
            "SELECT * FROM {}
             WHERE owner_id = $1 AND source_store_id = $2 AND destination_store_id = $3
               AND source_natural_key = $4 AND status = 'success'
               AND destination_entity_id IS NOT NULL
             ORDER BY created_at ASC LIMIT 1",
            kind.table()
        );
        let row: Option<LedgerRow> = sqlx::query_as(&sql)
            .bind(owner_id)
            .bind(source_store_id)
            .bind(destination_store_id)
            .bind(natural_key.to_lowercase())
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("looking up {kind} by natural key"))?;
        Ok(row)
    }

    /// Per-status row counts for one kind (reporting subcommand).
    pub async fn counts(&self, kind: EntityKind, owner_id: i64) -> Result<Vec<(String, i64)>> {
        let sql = format!(
            "SELECT status, COUNT(*) FROM {} WHERE owner_id = $1 GROUP BY status ORDER BY status",
            kind.table()
        );
        let rows: Vec<(String, i64)> = sqlx::query_as(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("counting {kind} ledger rows"))?;
        Ok(rows)
    }

    /// Overwrite-in-place guard used by reruns: a terminal row for this exact
    /// logical migration may be re-driven, never duplicated.
    pub async fn find_for_rerun(
        &self,
        kind: EntityKind,
        owner_id: i64,
        source_store_id: &str,
        destination_store_id: &str,
        source_entity_id: &str,
    ) -> Result<Option<LedgerRow>> {
        let sql = format!(
            "SELECT * FROM {}
             WHERE owner_id = $1 AND source_store_id = $2 AND destination_store_id = $3
               AND source_entity_id = $4 AND status IN ('success', 'failed')
             ORDER BY created_at ASC LIMIT 1",
            kind.table()
        );
        let row: Option<LedgerRow> = sqlx::query_as(&sql)
            .bind(owner_id)
            .bind(source_store_id)
            .bind(destination_store_id)
            .bind(source_entity_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Reset a terminal row back to pending for an idempotent re-run.
    pub async fn reopen(&self, kind: EntityKind, row_id: i64) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET status = 'pending', error_detail = NULL, updated_at = now()
             WHERE id = $1 AND status IN ('success', 'failed')",
            kind.table()
        );
        sqlx::query(&sql).bind(row_id).execute(&self.pool).await?;
        Ok(())
    }
}

// Keep allocator-facing helpers close to the statuses they reference.
pub(crate) fn terminal(status: MigrationStatus) -> bool {
    !matches!(status, MigrationStatus::Pending)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!terminal(MigrationStatus::Pending));
        assert!(terminal(MigrationStatus::Success));
        assert!(terminal(MigrationStatus::Failed));
        assert!(terminal(MigrationStatus::Skipped));
    }
}
