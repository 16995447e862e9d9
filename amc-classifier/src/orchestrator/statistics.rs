//! Run statistics shared by concurrent workers

use crate::error::FailureKind;
use crate::models::{Outcome, RunCounters};
use crate::pipeline::ItemRun;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct RunStatistics {
    completed: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    not_attempted: AtomicUsize,
    execution_cache_hits: AtomicU64,
    response_cache_hits: AtomicU64,
    response_cache_misses: AtomicU64,
    cache_errors: AtomicU64,
    failures_by_kind: Mutex<BTreeMap<FailureKind, usize>>,
}

impl RunStatistics {
    /// Count a terminal outcome; returns items completed so far
    pub fn record_outcome(&self, outcome: &Outcome) -> usize {
        match outcome {
            Outcome::Success { .. } => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Failure { kind, .. } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                let mut by_kind = self.failures_by_kind.lock().unwrap_or_else(|e| e.into_inner());
                *by_kind.entry(*kind).or_insert(0) += 1;
            }
            Outcome::NotAttempted => {
                self.not_attempted.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.completed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_execution_hit(&self) {
        self.execution_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run(&self, run: &ItemRun) {
        self.response_cache_hits
            .fetch_add(u64::from(run.response_hits), Ordering::Relaxed);
        self.response_cache_misses
            .fetch_add(u64::from(run.response_misses), Ordering::Relaxed);
        self.cache_errors.fetch_add(u64::from(run.cache_errors), Ordering::Relaxed);
    }

    pub fn record_cache_error(&self) {
        self.cache_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counters(&self, items_total: usize, remote_calls: u64) -> RunCounters {
        RunCounters {
            items_total,
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            not_attempted: self.not_attempted.load(Ordering::Relaxed),
            remote_calls,
            response_cache_hits: self.response_cache_hits.load(Ordering::Relaxed),
            response_cache_misses: self.response_cache_misses.load(Ordering::Relaxed),
            execution_cache_hits: self.execution_cache_hits.load(Ordering::Relaxed),
            cache_errors: self.cache_errors.load(Ordering::Relaxed),
            failures_by_kind: self
                .failures_by_kind
                .lock()
                .map(|m| m.clone())
                .unwrap_or_else(|e| e.into_inner().clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_concurrent_updates_are_counted() {
        let stats = Arc::new(RunStatistics::default());
        let mut join_set = tokio::task::JoinSet::new();

        for i in 0..20 {
            let stats = Arc::clone(&stats);
            join_set.spawn(async move {
                let outcome = if i % 4 == 0 {
                    Outcome::Failure {
                        kind: FailureKind::RemoteTransient,
                        message: "503".to_string(),
                    }
                } else {
                    Outcome::NotAttempted
                };
                stats.record_outcome(&outcome);
                stats.record_run(&ItemRun {
                    attempts: 2,
                    response_hits: 1,
                    response_misses: 1,
                    cache_errors: 0,
                });
            });
        }
        while let Some(result) = join_set.join_next().await {
            result.unwrap();
        }

        let counters = stats.counters(20, 7);
        assert_eq!(counters.failed, 5);
        assert_eq!(counters.not_attempted, 15);
        assert_eq!(counters.response_cache_hits, 20);
        assert_eq!(counters.response_cache_misses, 20);
        assert_eq!(counters.remote_calls, 7);
        assert_eq!(counters.failures_by_kind.get(&FailureKind::RemoteTransient), Some(&5));
    }
}
