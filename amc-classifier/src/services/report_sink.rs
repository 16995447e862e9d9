//! Report sinks

use crate::models::{Outcome, RunReport};
use crate::types::ReportSink;
use amc_common::Result;
use std::path::{Path, PathBuf};

pub const REPORT_FILE_NAME: &str = "classification_report.json";

/// Writes the run report as pretty JSON into an output directory
pub struct JsonReportSink {
    output_dir: PathBuf,
}

impl JsonReportSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join(REPORT_FILE_NAME)
    }
}

impl ReportSink for JsonReportSink {
    fn publish(&self, report: &RunReport) -> Result<()> {
        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.report_path();
        write_atomically(&path, &serde_json::to_vec_pretty(report)?)?;
        tracing::info!(path = %path.display(), items = report.items.len(), "Report written");
        Ok(())
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Logs a run summary through tracing
#[derive(Debug, Default)]
pub struct LogReportSink;

impl ReportSink for LogReportSink {
    fn publish(&self, report: &RunReport) -> Result<()> {
        let c = &report.counters;
        tracing::info!(
            items = c.items_total,
            succeeded = c.succeeded,
            failed = c.failed,
            not_attempted = c.not_attempted,
            remote_calls = c.remote_calls,
            response_cache_hit_rate = format!("{:.1}%", report.response_cache_hit_rate * 100.0),
            execution_cache_hit_rate = format!("{:.1}%", report.execution_cache_hit_rate * 100.0),
            cancelled = report.cancelled,
            elapsed_ms = report.elapsed_ms,
            "Classification run complete"
        );

        for (kind, count) in &c.failures_by_kind {
            tracing::info!(kind = %kind, count, "Failures by kind");
        }

        for item in &report.items {
            match &item.outcome {
                Outcome::Success { record } => tracing::debug!(
                    album = %item.identity,
                    path = %record.suggested_path,
                    confidence = record.confidence,
                    "Classified"
                ),
                Outcome::Failure { kind, message } => tracing::warn!(
                    album = %item.identity,
                    stage = %item.final_stage,
                    kind = %kind,
                    "{}",
                    message
                ),
                Outcome::NotAttempted => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CacheHit, ItemReport, RunCounters, Stage};
    use crate::services::remote_client::ClientStatsSnapshot;
    use crate::error::FailureKind;
    use chrono::Utc;
    use tempfile::TempDir;

    fn report() -> RunReport {
        RunReport {
            started_at: Utc::now(),
            elapsed_ms: 12,
            cancelled: false,
            items: vec![ItemReport {
                identity: "/music/a".to_string(),
                final_stage: Stage::Triage,
                outcome: Outcome::Failure {
                    kind: FailureKind::UnsupportedInput,
                    message: "no supported tracks".to_string(),
                },
                cache_hit: CacheHit::None,
                attempts: 0,
                elapsed_ms: 1,
                durable: true,
            }],
            counters: RunCounters {
                items_total: 1,
                failed: 1,
                ..Default::default()
            },
            response_cache_hit_rate: 0.0,
            execution_cache_hit_rate: 0.0,
            client: ClientStatsSnapshot::default(),
        }
    }

    #[test]
    fn test_json_sink_writes_report() {
        let dir = TempDir::new().unwrap();
        let sink = JsonReportSink::new(dir.path().join("out"));
        sink.publish(&report()).unwrap();

        let text = std::fs::read_to_string(sink.report_path()).unwrap();
        let parsed: RunReport = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.counters.failed, 1);
        assert!(!dir.path().join("out").join("classification_report.json.tmp").exists());
    }

    #[test]
    fn test_log_sink_never_fails() {
        LogReportSink.publish(&report()).unwrap();
    }
}
