//! Response cache: fingerprint → validated remote payload
//!
//! Rows live in the `response_cache` table. Each write is a single upsert
//! committed in its own transaction, so readers see either the old entry or
//! the new one, never a partial row. Entries older than the expiry are
//! treated as misses and removed by [`ResponseCache::purge_expired`].
//!
//! [`ResponseCache::get_or_fetch`] coalesces concurrent requests for the same
//! fingerprint: the first caller fetches, later callers wait on a
//! per-fingerprint lock and are then served from the cache.

use super::fingerprint::Fingerprint;
use crate::models::Stage;
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use amc_common::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// A stored response
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub stage: String,
    pub model: String,
    pub payload: serde_json::Value,
    pub inserted_at: DateTime<Utc>,
}

/// How a [`ResponseCache::get_or_fetch`] result was obtained
#[derive(Debug)]
pub enum Origin<R> {
    /// Served from the cache (including after waiting on another caller)
    Cache,
    /// Fetched by this caller; carries the fetcher's extra data
    Fetched(R),
}

#[derive(Debug)]
pub struct Fetched<R> {
    pub payload: serde_json::Value,
    pub origin: Origin<R>,
    /// The cache could not be read or written; the answer is not durable
    pub cache_error: bool,
}

pub struct ResponseCache {
    pool: SqlitePool,
    expiry: chrono::Duration,
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl ResponseCache {
    pub fn new(pool: SqlitePool, expiry_days: u32) -> Self {
        Self {
            pool,
            expiry: chrono::Duration::days(i64::from(expiry_days.max(1))),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    fn cutoff(&self) -> String {
        timestamp(Utc::now() - self.expiry)
    }

    /// Look up a fingerprint; expired entries are misses
    pub async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CachedResponse>> {
        if !fingerprint.is_current_format() {
            return Ok(None);
        }

        let row = sqlx::query(
            "SELECT stage, model, payload, inserted_at FROM response_cache
             WHERE fingerprint = ? AND inserted_at >= ?",
        )
        .bind(fingerprint.as_str())
        .bind(self.cutoff())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload: String = row.get("payload");
        let inserted_at: String = row.get("inserted_at");
        Ok(Some(CachedResponse {
            stage: row.get("stage"),
            model: row.get("model"),
            payload: serde_json::from_str(&payload)?,
            inserted_at: DateTime::parse_from_rfc3339(&inserted_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }))
    }

    /// Store (or replace) the response for a fingerprint
    pub async fn put(
        &self,
        fingerprint: &Fingerprint,
        stage: Stage,
        model: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let payload = serde_json::to_string(payload)?;
        let inserted_at = timestamp(Utc::now());
        let (pool, key, payload, inserted_at) =
            (&self.pool, fingerprint.as_str(), payload.as_str(), inserted_at.as_str());

        retry_on_lock("response cache put", DEFAULT_MAX_LOCK_WAIT_MS, move || async move {
            let mut tx = pool.begin().await?;
            sqlx::query(
                r#"
                INSERT INTO response_cache (fingerprint, stage, model, payload, inserted_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(fingerprint) DO UPDATE SET
                    stage = excluded.stage,
                    model = excluded.model,
                    payload = excluded.payload,
                    inserted_at = excluded.inserted_at
                "#,
            )
            .bind(key)
            .bind(stage.as_str())
            .bind(model)
            .bind(payload)
            .bind(inserted_at)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    pub async fn invalidate(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let result = sqlx::query("DELETE FROM response_cache WHERE fingerprint = ?")
            .bind(fingerprint.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Drop every entry of one stage (after a prompt or schema change)
    pub async fn invalidate_stage(&self, stage: Stage) -> Result<u64> {
        let result = sqlx::query("DELETE FROM response_cache WHERE stage = ?")
            .bind(stage.as_str())
            .execute(&self.pool)
            .await?;
        tracing::info!(stage = %stage, removed = result.rows_affected(), "Invalidated cached responses");
        Ok(result.rows_affected())
    }

    /// Delete entries older than the expiry
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM response_cache WHERE inserted_at < ?")
            .bind(self.cutoff())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            tracing::info!(removed = result.rows_affected(), "Purged expired cached responses");
        }
        Ok(result.rows_affected())
    }

    pub async fn len(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM response_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Read-through with single-flight coalescing
    ///
    /// On a miss `fetch` runs while the per-fingerprint lock is held, and its
    /// payload is stored before the lock is released. Cache failures are
    /// logged and reported through [`Fetched::cache_error`]; they never fail
    /// the call.
    pub async fn get_or_fetch<R, E, F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        stage: Stage,
        model: &str,
        fetch: F,
    ) -> std::result::Result<Fetched<R>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<(serde_json::Value, R), E>>,
    {
        let lock = self.lock_for(fingerprint);
        let guard = lock.lock().await;

        let result = self.read_through(fingerprint, stage, model, fetch).await;

        drop(guard);
        self.release(fingerprint, lock);
        result
    }

    async fn read_through<R, E, F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        stage: Stage,
        model: &str,
        fetch: F,
    ) -> std::result::Result<Fetched<R>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<(serde_json::Value, R), E>>,
    {
        let mut cache_error = false;

        match self.get(fingerprint).await {
            Ok(Some(hit)) => {
                tracing::debug!(stage = %stage, fingerprint = %fingerprint, "Response cache hit");
                return Ok(Fetched {
                    payload: hit.payload,
                    origin: Origin::Cache,
                    cache_error,
                });
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(stage = %stage, error = %e, "Response cache unavailable, calling remote service");
                cache_error = true;
            }
        }

        let (payload, extra) = fetch().await?;

        if let Err(e) = self.put(fingerprint, stage, model, &payload).await {
            tracing::warn!(stage = %stage, error = %e, "Failed to store response in cache");
            cache_error = true;
        }

        Ok(Fetched {
            payload,
            origin: Origin::Fetched(extra),
            cache_error,
        })
    }

    fn lock_for(&self, fingerprint: &Fingerprint) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(fingerprint.as_str().to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn release(&self, fingerprint: &Fingerprint, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        // Map plus our handle: nobody else is waiting
        if Arc::strong_count(&lock) == 2 {
            map.remove(fingerprint.as_str());
        }
    }

    /// Fingerprints with a caller currently inside `get_or_fetch`
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().map(|m| m.len()).unwrap_or(0)
    }
}
