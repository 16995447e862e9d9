//! Run report handed to the report sink

use super::outputs::CanonicalRecord;
use super::stage::Stage;
use crate::error::FailureKind;
use crate::services::remote_client::ClientStatsSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Final outcome of one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { record: CanonicalRecord },
    Failure { kind: FailureKind, message: String },
    /// Still queued when the stop signal arrived
    NotAttempted,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Failure { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Which cache, if any, served the item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheHit {
    Execution,
    Response,
    None,
}

/// Per-item terminal record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemReport {
    pub identity: String,
    pub final_stage: Stage,
    pub outcome: Outcome,
    pub cache_hit: CacheHit,
    /// Transport calls made for this item in this run
    pub attempts: u32,
    pub elapsed_ms: u64,
    /// False when the execution record could not be written
    pub durable: bool,
}

/// Aggregate counters for a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunCounters {
    pub items_total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub not_attempted: usize,
    /// Transport calls, retries and repair passes included
    pub remote_calls: u64,
    pub response_cache_hits: u64,
    pub response_cache_misses: u64,
    pub execution_cache_hits: u64,
    pub cache_errors: u64,
    pub failures_by_kind: BTreeMap<FailureKind, usize>,
}

impl RunCounters {
    pub fn response_cache_hit_rate(&self) -> f64 {
        rate(self.response_cache_hits, self.response_cache_hits + self.response_cache_misses)
    }

    /// Share of attempted items skipped thanks to the execution cache
    pub fn execution_cache_hit_rate(&self) -> f64 {
        let attempted = (self.items_total - self.not_attempted) as u64;
        rate(self.execution_cache_hits, attempted)
    }
}

fn rate(hits: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Everything the report sink receives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub cancelled: bool,
    pub items: Vec<ItemReport>,
    pub counters: RunCounters,
    pub response_cache_hit_rate: f64,
    pub execution_cache_hit_rate: f64,
    pub client: ClientStatsSnapshot,
}
