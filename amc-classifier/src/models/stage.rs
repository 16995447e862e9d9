//! Pipeline stages and per-stage results

use super::outputs::{CanonicalRecord, EnrichmentOutput, ExtractionOutput, TriageOutput};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of an item in the stage state machine
///
/// Order is fixed: `Pending → Triage → Extraction → Enrichment →
/// Canonicalization → Done`. Failure is tracked beside the stage, so a failed
/// item keeps the stage it failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Triage,
    Extraction,
    Enrichment,
    Canonicalization,
    Done,
}

impl Stage {
    /// Stages that do work and produce a [`StageResult`]
    pub const WORK_STAGES: [Stage; 4] = [
        Stage::Triage,
        Stage::Extraction,
        Stage::Enrichment,
        Stage::Canonicalization,
    ];

    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Pending => Some(Stage::Triage),
            Stage::Triage => Some(Stage::Extraction),
            Stage::Extraction => Some(Stage::Enrichment),
            Stage::Enrichment => Some(Stage::Canonicalization),
            Stage::Canonicalization => Some(Stage::Done),
            Stage::Done => None,
        }
    }

    pub fn is_work_stage(self) -> bool {
        !matches!(self, Stage::Pending | Stage::Done)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Triage => "triage",
            Stage::Extraction => "extraction",
            Stage::Enrichment => "enrichment",
            Stage::Canonicalization => "canonicalization",
            Stage::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Stage> {
        match s {
            "pending" => Some(Stage::Pending),
            "triage" => Some(Stage::Triage),
            "extraction" => Some(Stage::Extraction),
            "enrichment" => Some(Stage::Enrichment),
            "canonicalization" => Some(Stage::Canonicalization),
            "done" => Some(Stage::Done),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a stage result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    /// Computed locally, no remote call
    Local,
    /// Fresh remote response
    Remote,
    /// Served from the response cache
    ResponseCache,
}

/// Metadata recorded with every stage result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMeta {
    /// Remote model used, if the stage called out
    pub model: Option<String>,
    pub source: ResultSource,
    pub latency_ms: u64,
    /// Transport calls made for this result (0 when served from cache)
    pub attempts: u32,
}

impl StageMeta {
    pub fn local(latency_ms: u64) -> Self {
        Self {
            model: None,
            source: ResultSource::Local,
            latency_ms,
            attempts: 0,
        }
    }
}

/// Validated output of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "data", rename_all = "snake_case")]
pub enum StagePayload {
    Triage(TriageOutput),
    Extraction(ExtractionOutput),
    Enrichment(EnrichmentOutput),
    Canonicalization(CanonicalRecord),
}

impl StagePayload {
    pub fn stage(&self) -> Stage {
        match self {
            StagePayload::Triage(_) => Stage::Triage,
            StagePayload::Extraction(_) => Stage::Extraction,
            StagePayload::Enrichment(_) => Stage::Enrichment,
            StagePayload::Canonicalization(_) => Stage::Canonicalization,
        }
    }
}

/// Immutable result of one stage, owned by the item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub payload: StagePayload,
    pub meta: StageMeta,
}

impl StageResult {
    pub fn new(payload: StagePayload, meta: StageMeta) -> Self {
        Self { payload, meta }
    }

    pub fn stage(&self) -> Stage {
        self.payload.stage()
    }
}
