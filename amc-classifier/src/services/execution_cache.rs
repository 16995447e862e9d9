//! Execution cache: item identity → terminal outcome
//!
//! Backed by the `execution_records` table. A record is written once an item
//! reaches a terminal state and is consulted before any work starts on that
//! item. A record whose change fingerprint no longer matches the item is a
//! miss; it stays in place until the new outcome replaces it.

use super::response_cache::timestamp;
use crate::models::{Outcome, Stage};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use amc_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

/// A stored terminal outcome
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub identity: String,
    pub fingerprint: String,
    pub final_stage: Stage,
    pub outcome: Outcome,
    pub recorded_at: DateTime<Utc>,
}

/// Result of [`ExecutionCache::lookup`]
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionLookup {
    Hit(ExecutionRecord),
    /// A record exists but the item changed since it was written
    Changed { recorded_fingerprint: String },
    Miss,
}

pub struct ExecutionCache {
    pool: SqlitePool,
}

impl ExecutionCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Find the record for `identity`, valid only if it matches `fingerprint`
    pub async fn lookup(&self, identity: &str, fingerprint: &str) -> Result<ExecutionLookup> {
        let Some(record) = self.get(identity).await? else {
            return Ok(ExecutionLookup::Miss);
        };

        if record.fingerprint == fingerprint {
            Ok(ExecutionLookup::Hit(record))
        } else {
            Ok(ExecutionLookup::Changed {
                recorded_fingerprint: record.fingerprint,
            })
        }
    }

    /// Stored record regardless of fingerprint
    pub async fn get(&self, identity: &str) -> Result<Option<ExecutionRecord>> {
        let row = sqlx::query(
            "SELECT identity, fingerprint, summary, final_stage, recorded_at
             FROM execution_records WHERE identity = ?",
        )
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let summary: String = row.get("summary");
        let final_stage: String = row.get("final_stage");
        let recorded_at: String = row.get("recorded_at");

        Ok(Some(ExecutionRecord {
            identity: row.get("identity"),
            fingerprint: row.get("fingerprint"),
            final_stage: Stage::parse(&final_stage)
                .ok_or_else(|| Error::Internal(format!("Unknown stage in execution record: {}", final_stage)))?,
            outcome: serde_json::from_str(&summary)?,
            recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| Error::Internal(format!("Bad timestamp in execution record: {}", e)))?,
        }))
    }

    /// Durably record a terminal outcome, replacing any previous record
    ///
    /// Returns only after the transaction has committed.
    pub async fn record(&self, identity: &str, fingerprint: &str, final_stage: Stage, outcome: &Outcome) -> Result<()> {
        let status = match outcome {
            Outcome::Success { .. } => "success",
            Outcome::Failure { .. } => "failure",
            Outcome::NotAttempted => {
                return Err(Error::InvalidInput(format!(
                    "Refusing to record a non-terminal outcome for {}",
                    identity
                )))
            }
        };
        let summary = serde_json::to_string(outcome)?;
        let recorded_at = timestamp(Utc::now());
        let (pool, summary, recorded_at) = (&self.pool, summary.as_str(), recorded_at.as_str());

        retry_on_lock("execution record", DEFAULT_MAX_LOCK_WAIT_MS, move || async move {
            let mut tx = pool.begin().await?;
            sqlx::query(
                r#"
                INSERT INTO execution_records (identity, fingerprint, outcome, summary, final_stage, recorded_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(identity) DO UPDATE SET
                    fingerprint = excluded.fingerprint,
                    outcome = excluded.outcome,
                    summary = excluded.summary,
                    final_stage = excluded.final_stage,
                    recorded_at = excluded.recorded_at
                "#,
            )
            .bind(identity)
            .bind(fingerprint)
            .bind(status)
            .bind(summary)
            .bind(final_stage.as_str())
            .bind(recorded_at)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    /// Forget failed items so the next run retries them
    pub async fn purge_failures(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM execution_records WHERE outcome = 'failure'")
            .execute(&self.pool)
            .await?;
        tracing::info!(removed = result.rows_affected(), "Cleared failed execution records");
        Ok(result.rows_affected())
    }

    /// Delete records older than `days`
    pub async fn purge_older_than(&self, days: u32) -> Result<u64> {
        let cutoff = timestamp(Utc::now() - chrono::Duration::days(i64::from(days)));
        let result = sqlx::query("DELETE FROM execution_records WHERE recorded_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            tracing::info!(removed = result.rows_affected(), days, "Purged old execution records");
        }
        Ok(result.rows_affected())
    }

    pub async fn len(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM execution_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
