//! Claim/resolve allocation over ledger rows.
//!
//! `claim` locates (or creates) the pending row to operate on for one source
//! entity, under row-level locks so two racing runs cannot both adopt the same
//! placeholder. `resolve` then redirects work onto a row that already holds a
//! destination id, merging the redundant claim away as `skipped`. Together
//! they make re-running an import idempotent: the second run's claim may grab
//! a stale placeholder, but resolve lands the work on the surviving row.

use anyhow::{Context, Result};
use serde_json::json;
use sqlx::postgres::PgDatabaseError;
use tracing::{info, warn};

use super::store::Ledger;
use super::{EntityKind, LedgerRow, MigrationStatus};

const CLAIM_ATTEMPTS: u32 = 3;

// Bound on how long one claim transaction waits for a contended row lock.
// Postgres defaults lock_timeout to 0 (wait forever), which would stall the
// whole run on one stuck row instead of surfacing 55P03 to the retry loop.
const CLAIM_LOCK_TIMEOUT: &str = "SET LOCAL lock_timeout = '5s'";

/// What resolve decided about a freshly claimed row.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeDecision {
    /// No competing row: keep operating on the claim.
    KeepClaim,
    /// A different row already owns the destination mapping; the pending
    /// claim must be skipped and work redirected to the survivor.
    SkipClaimFor { survivor_id: i64 },
    /// A different row owns the mapping but the claim is already terminal;
    /// just redirect, no state change on the claim.
    RedirectTo { survivor_id: i64 },
}

/// Pure merge rule, split out from the transactional plumbing so the
/// invariant (exactly one row keeps the destination id) is testable.
pub fn merge_decision(claimed: &LedgerRow, survivor: Option<&LedgerRow>) -> MergeDecision {
    match survivor {
        None => MergeDecision::KeepClaim,
        Some(s) if s.id == claimed.id => MergeDecision::KeepClaim,
        Some(s) => {
            if claimed.status() == MigrationStatus::Pending {
                MergeDecision::SkipClaimFor { survivor_id: s.id }
            } else {
                MergeDecision::RedirectTo { survivor_id: s.id }
            }
        }
    }
}

// lock_not_available / serialization_failure / deadlock_detected
fn retryable_pg_code(code: &str) -> bool {
    matches!(code, "55P03" | "40001" | "40P01")
}

fn lock_contention(e: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db) = e {
        if let Some(pg) = db.try_downcast_ref::<PgDatabaseError>() {
            return retryable_pg_code(pg.code());
        }
    }
    false
}

impl Ledger {
    /// Locate-or-create the row to operate on for this attempt.
    ///
    /// Preference order inside one locked transaction:
    ///   1. a pending row with the exact source entity id;
    ///   2. the oldest pending row with a NULL source id for this
    ///      (owner, source store) — legacy imports without ids;
    ///   3. a brand new pending row.
    ///
    /// Lock contention retries the whole transaction up to 3 times, then
    /// fails this single entity (never the run).
    pub async fn claim(
        &self,
        kind: EntityKind,
        owner_id: i64,
        source_store_id: &str,
        source_entity_id: Option<&str>,
        natural_key: Option<&str>,
    ) -> Result<LedgerRow> {
        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 1..=CLAIM_ATTEMPTS {
            match self
                .claim_once(kind, owner_id, source_store_id, source_entity_id, natural_key)
                .await
            {
                Ok(row) => return Ok(row),
                Err(e) => {
                    let retry = e
                        .downcast_ref::<sqlx::Error>()
                        .map(lock_contention)
                        .unwrap_or(false);
                    if retry && attempt < CLAIM_ATTEMPTS {
                        warn!(kind = %kind, attempt, "claim hit lock contention; retrying");
                        last_err = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("claim retries exhausted")))
    }

    async fn claim_once(
        &self,
        kind: EntityKind,
        owner_id: i64,
        source_store_id: &str,
        source_entity_id: Option<&str>,
        natural_key: Option<&str>,
    ) -> Result<LedgerRow> {
        let mut tx = self.pool.begin().await.context("starting claim tx")?;
        sqlx::query(CLAIM_LOCK_TIMEOUT)
            .execute(&mut *tx)
            .await
            .context("bounding claim lock wait")?;
        let key_lower = natural_key.map(str::to_lowercase);

        // 1. Exact source id match.
        if let Some(source_id) = source_entity_id {
            let sql = format!(
                "SELECT * FROM {} WHERE owner_id = $1 AND source_store_id = $2
                   AND source_entity_id = $3 AND status = 'pending'
                 ORDER BY created_at ASC LIMIT 1 FOR UPDATE",
                kind.table()
            );
            let found: Option<LedgerRow> = sqlx::query_as(&sql)
                .bind(owner_id)
                .bind(source_store_id)
                .bind(source_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(anyhow::Error::from)?;
            if let Some(row) = found {
                tx.commit().await?;
                return Ok(row);
            }
        }

        // 2. Oldest id-less placeholder (degraded exports); adopt it by
        //    filling in the id we now know.
        let sql = format!(
            "SELECT * FROM {} WHERE owner_id = $1 AND source_store_id = $2
               AND source_entity_id IS NULL AND status = 'pending'
             ORDER BY created_at ASC LIMIT 1 FOR UPDATE",
            kind.table()
        );
        let placeholder: Option<LedgerRow> = sqlx::query_as(&sql)
            .bind(owner_id)
            .bind(source_store_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(anyhow::Error::from)?;
        if let Some(row) = placeholder {
            let sql = format!(
                "UPDATE {} SET source_entity_id = COALESCE($2, source_entity_id),
                        source_natural_key = COALESCE($3, source_natural_key),
                        updated_at = now()
                 WHERE id = $1 RETURNING *",
                kind.table()
            );
            let adopted: LedgerRow = sqlx::query_as(&sql)
                .bind(row.id)
                .bind(source_entity_id)
                .bind(key_lower.as_deref())
                .fetch_one(&mut *tx)
                .await
                .map_err(anyhow::Error::from)?;
            tx.commit().await?;
            info!(kind = %kind, row_id = adopted.id, "adopted id-less placeholder row");
            return Ok(adopted);
        }

        // 3. Fresh claim.
        let sql = format!(
            "INSERT INTO {} (owner_id, source_store_id, source_entity_id, source_natural_key, status)
             VALUES ($1, $2, $3, $4, 'pending') RETURNING *",
            kind.table()
        );
        let created: LedgerRow = sqlx::query_as(&sql)
            .bind(owner_id)
            .bind(source_store_id)
            .bind(source_entity_id)
            .bind(key_lower.as_deref())
            .fetch_one(&mut *tx)
            .await
            .map_err(anyhow::Error::from)?;
        tx.commit().await?;
        Ok(created)
    }

    /// Redirect onto a pre-existing row that already has a destination id,
    /// merging away a redundant claim.
    pub async fn resolve(
        &self,
        kind: EntityKind,
        claimed: &LedgerRow,
        source_store_id: &str,
        destination_store_id: &str,
        source_entity_id: Option<&str>,
    ) -> Result<LedgerRow> {
        let Some(source_id) = source_entity_id.or(claimed.source_entity_id.as_deref()) else {
            // Without a source id there is nothing to merge against.
            return Ok(claimed.clone());
        };
        let sql = format!(
            "SELECT * FROM {} WHERE owner_id = $1 AND source_store_id = $2
               AND destination_store_id = $3 AND source_entity_id = $4
               AND destination_entity_id IS NOT NULL AND id <> $5
               AND status <> 'skipped'
             ORDER BY created_at ASC LIMIT 1",
            kind.table()
        );
        let survivor: Option<LedgerRow> = sqlx::query_as(&sql)
            .bind(claimed.owner_id)
            .bind(source_store_id)
            .bind(destination_store_id)
            .bind(source_id)
            .bind(claimed.id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("resolving {kind} claim {}", claimed.id))?;

        match merge_decision(claimed, survivor.as_ref()) {
            MergeDecision::KeepClaim => Ok(claimed.clone()),
            MergeDecision::SkipClaimFor { survivor_id } => {
                let survivor = survivor.unwrap_or_else(|| unreachable!());
                let detail = json!({
                    "reason": "duplicate claim merged",
                    "merged_into": survivor_id,
                    "destination_entity_id": survivor.destination_entity_id,
                });
                self.mark_skipped(kind, claimed.id, &detail).await?;
                info!(
                    kind = %kind,
                    claimed = claimed.id,
                    survivor = survivor_id,
                    "merged duplicate claim onto surviving ledger row"
                );
                Ok(survivor)
            }
            MergeDecision::RedirectTo { .. } => Ok(survivor.unwrap_or_else(|| unreachable!())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row(id: i64, status: &str, dest: Option<&str>) -> LedgerRow {
        LedgerRow {
            id,
            owner_id: 7,
            source_store_id: "src".into(),
            destination_store_id: dest.map(|_| "dst".into()),
            source_entity_id: Some("e1".into()),
            source_natural_key: None,
            destination_entity_id: dest.map(str::to_string),
            status: status.into(),
            error_detail: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn lock_timeout_is_classified_as_retryable() {
        // A bounded lock_timeout inside the claim transaction surfaces
        // contention as 55P03; all three contention codes retry, anything
        // else fails the entity immediately.
        assert!(retryable_pg_code("55P03"));
        assert!(retryable_pg_code("40001"));
        assert!(retryable_pg_code("40P01"));
        assert!(!retryable_pg_code("23505"));
        assert!(CLAIM_LOCK_TIMEOUT.contains("lock_timeout"));
    }

    #[test]
    fn no_survivor_keeps_claim() {
        let claimed = row(1, "pending", None);
        assert_eq!(merge_decision(&claimed, None), MergeDecision::KeepClaim);
    }

    #[test]
    fn same_row_is_not_merged_with_itself() {
        let claimed = row(1, "pending", Some("d-9"));
        let same = row(1, "pending", Some("d-9"));
        assert_eq!(
            merge_decision(&claimed, Some(&same)),
            MergeDecision::KeepClaim
        );
    }

    #[test]
    fn pending_claim_is_skipped_for_survivor() {
        let claimed = row(5, "pending", None);
        let survivor = row(2, "success", Some("d-9"));
        assert_eq!(
            merge_decision(&claimed, Some(&survivor)),
            MergeDecision::SkipClaimFor { survivor_id: 2 }
        );
    }

    #[test]
    fn terminal_claim_only_redirects() {
        let claimed = row(5, "failed", None);
        let survivor = row(2, "success", Some("d-9"));
        assert_eq!(
            merge_decision(&claimed, Some(&survivor)),
            MergeDecision::RedirectTo { survivor_id: 2 }
        );
    }
}
