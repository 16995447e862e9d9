//! Run orchestration
//!
//! Items are processed by a bounded pool of `max_workers` concurrent tasks.
//! Remote calls are bounded separately by the remote client's gate, so many
//! items can be triaging or canonicalizing while only a few hold a remote
//! slot. Each item is checked against the execution cache before any work,
//! and a success or permanent failure is committed there before it is
//! reported. Outages and interruptions are left for the next run.

pub mod statistics;

use crate::models::{CacheHit, Item, ItemReport, Outcome, RunReport, Stage};
use crate::pipeline::StagePipeline;
use crate::services::execution_cache::{ExecutionCache, ExecutionLookup};
use crate::error::FailureKind;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use statistics::RunStatistics;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Progress is logged every this many items
const PROGRESS_INTERVAL: usize = 10;

pub struct Orchestrator {
    pipeline: Arc<StagePipeline>,
    executions: Arc<ExecutionCache>,
    max_workers: usize,
    execution_expiry_days: u32,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(pipeline: Arc<StagePipeline>, executions: Arc<ExecutionCache>, max_workers: usize) -> Self {
        Self {
            pipeline,
            executions,
            max_workers: max_workers.max(1),
            execution_expiry_days: 0,
            cancel: CancellationToken::new(),
        }
    }

    /// Drop execution records older than `days` at the start of each run (0 keeps them)
    pub fn with_execution_expiry(mut self, days: u32) -> Self {
        self.execution_expiry_days = days;
        self
    }

    /// Handle for stopping the run; queued items are then reported as not attempted
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Process `items` and report every one of them
    ///
    /// Never fails: item failures and cache outages end up in the report.
    /// Items are reported in input order.
    pub async fn run(&self, items: Vec<Item>) -> RunReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let stats = RunStatistics::default();
        let client_before = self.pipeline.client().stats();
        let items_total = items.len();

        self.housekeeping(&stats).await;

        tracing::info!(
            items = items_total,
            max_workers = self.max_workers,
            remote_slots = self.pipeline.client().available_slots(),
            "Starting classification run"
        );

        let stats_ref = &stats;
        let mut indexed: Vec<(usize, ItemReport)> = stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| async move {
                let report = self.process_item(item, stats_ref).await;
                let completed = stats_ref.record_outcome(&report.outcome);
                if completed % PROGRESS_INTERVAL == 0 || completed == items_total {
                    tracing::info!(completed, total = items_total, "Progress");
                }
                (index, report)
            })
            .buffer_unordered(self.max_workers)
            .collect()
            .await;
        indexed.sort_by_key(|(index, _)| *index);

        let client = self.pipeline.client().stats();
        let remote_calls = client.transport_calls.saturating_sub(client_before.transport_calls);
        let counters = stats.counters(items_total, remote_calls);

        let report = RunReport {
            started_at,
            elapsed_ms: start.elapsed().as_millis() as u64,
            cancelled: self.cancel.is_cancelled(),
            items: indexed.into_iter().map(|(_, report)| report).collect(),
            response_cache_hit_rate: counters.response_cache_hit_rate(),
            execution_cache_hit_rate: counters.execution_cache_hit_rate(),
            counters,
            client,
        };

        tracing::info!(
            succeeded = report.counters.succeeded,
            failed = report.counters.failed,
            not_attempted = report.counters.not_attempted,
            remote_calls = report.counters.remote_calls,
            elapsed_ms = report.elapsed_ms,
            "Classification run finished"
        );
        report
    }

    async fn housekeeping(&self, stats: &RunStatistics) {
        if let Err(e) = self.pipeline.responses().purge_expired().await {
            tracing::warn!(error = %e, "Could not purge expired responses");
            stats.record_cache_error();
        }
        if self.execution_expiry_days > 0 {
            if let Err(e) = self.executions.purge_older_than(self.execution_expiry_days).await {
                tracing::warn!(error = %e, "Could not purge old execution records");
                stats.record_cache_error();
            }
        }
    }

    async fn process_item(&self, mut item: Item, stats: &RunStatistics) -> ItemReport {
        let start = Instant::now();

        if self.cancel.is_cancelled() {
            let final_stage = item.stage();
            return ItemReport {
                identity: item.identity,
                final_stage,
                outcome: Outcome::NotAttempted,
                cache_hit: CacheHit::None,
                attempts: 0,
                elapsed_ms: 0,
                durable: false,
            };
        }

        match self.executions.lookup(&item.identity, &item.change_fingerprint).await {
            Ok(ExecutionLookup::Hit(record)) => {
                stats.record_execution_hit();
                if record.outcome.is_success() {
                    item.mark_done_from_cache();
                }
                tracing::debug!(album = %item.identity, "Execution cache hit, skipping");
                return ItemReport {
                    identity: item.identity,
                    final_stage: record.final_stage,
                    outcome: record.outcome,
                    cache_hit: CacheHit::Execution,
                    attempts: 0,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    durable: true,
                };
            }
            Ok(ExecutionLookup::Changed { recorded_fingerprint }) => {
                tracing::info!(
                    album = %item.identity,
                    recorded = %recorded_fingerprint,
                    current = %item.change_fingerprint,
                    "Album changed since last run, reprocessing"
                );
            }
            Ok(ExecutionLookup::Miss) => {}
            Err(e) => {
                tracing::warn!(album = %item.identity, error = %e, "Execution cache unavailable, processing anyway");
                stats.record_cache_error();
            }
        }

        let run = self.pipeline.process(&mut item, &self.cancel).await;
        stats.record_run(&run);

        let (final_stage, outcome) = terminal_outcome(&item);
        let durable = match outcome.failure_kind() {
            Some(kind) if !kind.is_permanent() => {
                tracing::debug!(album = %item.identity, kind = %kind, "Not recording a temporary failure");
                false
            }
            _ => self.commit(&item, final_stage, &outcome, stats).await,
        };

        if outcome.is_success() {
            tracing::info!(album = %item.identity, attempts = run.attempts, "Album classified");
        }

        ItemReport {
            identity: item.identity,
            final_stage,
            outcome,
            cache_hit: run.cache_hit(),
            attempts: run.attempts,
            elapsed_ms: start.elapsed().as_millis() as u64,
            durable,
        }
    }

    /// Durable execution record; returns false when the write failed
    async fn commit(&self, item: &Item, final_stage: Stage, outcome: &Outcome, stats: &RunStatistics) -> bool {
        match self
            .executions
            .record(&item.identity, &item.change_fingerprint, final_stage, outcome)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    album = %item.identity,
                    error = %e,
                    "Execution record not written; this album will be processed again next run"
                );
                stats.record_cache_error();
                false
            }
        }
    }
}

fn terminal_outcome(item: &Item) -> (Stage, Outcome) {
    if let Some(failure) = item.failure() {
        return (
            failure.stage,
            Outcome::Failure {
                kind: failure.kind,
                message: failure.message.clone(),
            },
        );
    }
    match item.canonical() {
        Some(record) if item.stage() == Stage::Done => (
            Stage::Done,
            Outcome::Success {
                record: record.clone(),
            },
        ),
        _ => (
            item.stage(),
            Outcome::Failure {
                kind: FailureKind::Internal,
                message: format!("pipeline stopped at {} without a result", item.stage()),
            },
        ),
    }
}
