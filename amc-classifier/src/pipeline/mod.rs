//! Stage pipeline
//!
//! Drives one item through `Triage → Extraction → Enrichment →
//! Canonicalization`. Stages run sequentially; each result is committed to
//! the item before the next stage starts. Remote stages go through the
//! response cache, so a fingerprint already answered costs no remote call.

pub mod canonicalization;
pub mod enrichment;
pub mod extraction;
pub mod normalization;
pub mod triage;

use crate::error::{RemoteError, StageError, TransitionError};
use crate::models::{CacheHit, EnrichmentOutput, ExtractionOutput, Item, ResultSource, Stage, StageMeta, StagePayload, StageResult};
use crate::services::fingerprint;
use crate::services::remote_client::{CallFailure, CompletionRequest, RemoteClient, ResponseShape};
use crate::services::response_cache::{Origin, ResponseCache};
use crate::types::AttributeReader;
use amc_common::config::TomlConfig;
use canonicalization::VerificationOutput;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-run knobs of the stage pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct StageSettings {
    /// Fast model: Extraction and verification
    pub extraction_model: String,
    /// Richer model: Enrichment
    pub enrichment_model: String,
    /// Re-entries of a stage after a retryable failure
    pub stage_retry_limit: u32,
    pub verify_canonical: bool,
    /// Lowercase, with a leading dot
    pub audio_extensions: Vec<String>,
}

impl StageSettings {
    pub fn from_config(config: &TomlConfig) -> Self {
        Self {
            extraction_model: config.api.extraction_model.clone(),
            enrichment_model: config.api.enrichment_model.clone(),
            stage_retry_limit: config.pipeline.stage_retry_limit,
            verify_canonical: config.pipeline.verify_canonical,
            audio_extensions: config
                .pipeline
                .audio_extensions
                .iter()
                .map(|e| format!(".{}", e.trim().trim_start_matches('.').to_lowercase()))
                .collect(),
        }
    }
}

/// What processing one item cost
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemRun {
    /// Transport calls, retries and repairs included
    pub attempts: u32,
    pub response_hits: u32,
    pub response_misses: u32,
    pub cache_errors: u32,
}

impl ItemRun {
    pub fn cache_hit(&self) -> CacheHit {
        if self.response_hits > 0 {
            CacheHit::Response
        } else {
            CacheHit::None
        }
    }
}

pub struct StagePipeline {
    client: Arc<RemoteClient>,
    responses: Arc<ResponseCache>,
    reader: Arc<dyn AttributeReader>,
    settings: StageSettings,
}

impl StagePipeline {
    pub fn new(
        client: Arc<RemoteClient>,
        responses: Arc<ResponseCache>,
        reader: Arc<dyn AttributeReader>,
        settings: StageSettings,
    ) -> Self {
        Self {
            client,
            responses,
            reader,
            settings,
        }
    }

    pub fn client(&self) -> &Arc<RemoteClient> {
        &self.client
    }

    pub fn responses(&self) -> &Arc<ResponseCache> {
        &self.responses
    }

    /// Run `item` until it is `Done` or failed
    ///
    /// The stop signal is checked before every stage attempt. A stage in
    /// progress, including its remote call, is allowed to finish.
    pub async fn process(&self, item: &mut Item, cancel: &CancellationToken) -> ItemRun {
        let mut run = ItemRun::default();

        if item.stage() == Stage::Pending {
            if let Err(e) = item.advance() {
                fail(item, &StageError::from(e));
                return run;
            }
        }

        while item.stage().is_work_stage() && !item.is_terminal() {
            let stage = item.stage();
            let started = Instant::now();

            match self.run_with_retries(item, cancel, &mut run).await {
                Ok(result) => {
                    let committed = item.commit(result).and_then(|()| item.advance().map(|_| ()));
                    if let Err(e) = committed {
                        fail(item, &StageError::from(e));
                        break;
                    }
                    tracing::debug!(
                        album = %item.identity,
                        stage = %stage,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Stage complete"
                    );
                }
                Err(e) => {
                    fail(item, &e);
                    break;
                }
            }
        }

        run
    }

    async fn run_with_retries(
        &self,
        item: &Item,
        cancel: &CancellationToken,
        run: &mut ItemRun,
    ) -> Result<StageResult, StageError> {
        let stage = item.stage();
        let mut retries = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled);
            }
            match self.run_stage(stage, item, run).await {
                Err(e) if e.is_retryable() && retries < self.settings.stage_retry_limit => {
                    retries += 1;
                    tracing::warn!(
                        album = %item.identity,
                        stage = %stage,
                        retry = retries,
                        stage_retry_limit = self.settings.stage_retry_limit,
                        error = %e,
                        "Stage failed, re-entering"
                    );
                }
                other => return other,
            }
        }
    }

    async fn run_stage(&self, stage: Stage, item: &Item, run: &mut ItemRun) -> Result<StageResult, StageError> {
        let started = Instant::now();
        match stage {
            Stage::Triage => {
                let input = item.input.clone();
                let reader = Arc::clone(&self.reader);
                let extensions = self.settings.audio_extensions.clone();
                let output = tokio::task::spawn_blocking(move || triage::triage(&input, reader.as_ref(), &extensions))
                    .await
                    .map_err(|e| StageError::UnsupportedInput(format!("triage aborted: {}", e)))??;
                let meta = StageMeta::local(started.elapsed().as_millis() as u64);
                Ok(StageResult::new(StagePayload::Triage(output), meta))
            }
            Stage::Extraction => {
                let triage = item.triage().ok_or(TransitionError::MissingResult(Stage::Triage))?;
                let request = extraction::request(&self.settings.extraction_model, &item.input, triage);
                let (output, meta) = self
                    .remote::<ExtractionOutput>(item, stage, extraction::PROMPT_VERSION, request, run)
                    .await?;
                Ok(StageResult::new(StagePayload::Extraction(extraction::normalize(output)), meta))
            }
            Stage::Enrichment => {
                let triage = item.triage().ok_or(TransitionError::MissingResult(Stage::Triage))?;
                let extracted = item.extraction().ok_or(TransitionError::MissingResult(Stage::Extraction))?;
                let request = enrichment::request(&self.settings.enrichment_model, &item.input, triage, extracted);
                let (output, meta) = self
                    .remote::<EnrichmentOutput>(item, stage, enrichment::PROMPT_VERSION, request, run)
                    .await?;
                Ok(StageResult::new(StagePayload::Enrichment(enrichment::normalize(output)), meta))
            }
            Stage::Canonicalization => self.canonicalize(item, run, started).await,
            Stage::Pending | Stage::Done => Err(TransitionError::Terminal(stage).into()),
        }
    }

    async fn canonicalize(&self, item: &Item, run: &mut ItemRun, started: Instant) -> Result<StageResult, StageError> {
        let triage = item.triage().ok_or(TransitionError::MissingResult(Stage::Triage))?;
        let extracted = item.extraction().ok_or(TransitionError::MissingResult(Stage::Extraction))?;
        let enriched = item.enrichment().ok_or(TransitionError::MissingResult(Stage::Enrichment))?;

        let mut record = canonicalization::canonicalize(&item.input, triage, extracted, enriched);
        let mut meta = StageMeta::local(0);

        if self.settings.verify_canonical {
            let request = canonicalization::verification_request(&self.settings.extraction_model, &item.input, &record);
            let attempts_before = run.attempts;
            match self
                .remote::<VerificationOutput>(item, Stage::Canonicalization, canonicalization::PROMPT_VERSION, request, run)
                .await
            {
                Ok((verification, verification_meta)) => {
                    canonicalization::apply_verification(&mut record, &verification);
                    meta = verification_meta;
                }
                Err(e) => {
                    // Verification is advisory: the record stands unverified
                    tracing::warn!(album = %item.identity, error = %e, "Verification unavailable");
                    record.notes.push(format!("Verification unavailable: {}", e));
                    meta.attempts = run.attempts - attempts_before;
                }
            }
        }

        meta.latency_ms = started.elapsed().as_millis() as u64;
        Ok(StageResult::new(StagePayload::Canonicalization(record), meta))
    }

    /// Remote call through the response cache
    ///
    /// A cached payload that no longer decodes as `T` is invalidated and
    /// fetched again once.
    async fn remote<T: ResponseShape>(
        &self,
        item: &Item,
        stage: Stage,
        prompt_version: u32,
        request: CompletionRequest,
        run: &mut ItemRun,
    ) -> Result<(T, StageMeta), StageError> {
        let started = Instant::now();
        let model = request.model.clone();
        let fingerprint = fingerprint::compute(
            &item.identity,
            &item.change_fingerprint,
            stage,
            &model,
            prompt_version,
            &request.prompt,
        );
        let mut refetched = false;

        loop {
            let client = &self.client;
            let request = request.clone();
            let fetched = self
                .responses
                .get_or_fetch(&fingerprint, stage, &model, move || async move {
                    let outcome = client.call::<T>(stage, request).await?;
                    Ok::<_, CallFailure>((outcome.payload, (outcome.value, outcome.report)))
                })
                .await;

            let fetched = match fetched {
                Ok(fetched) => fetched,
                Err(failure) => {
                    run.attempts += failure.report.attempts;
                    run.response_misses += 1;
                    return Err(failure.error.into());
                }
            };
            if fetched.cache_error {
                run.cache_errors += 1;
            }

            match fetched.origin {
                Origin::Fetched((value, report)) => {
                    run.attempts += report.attempts;
                    run.response_misses += 1;
                    let meta = StageMeta {
                        model: Some(model),
                        source: ResultSource::Remote,
                        latency_ms: started.elapsed().as_millis() as u64,
                        attempts: report.attempts,
                    };
                    return Ok((value, meta));
                }
                Origin::Cache => match decode_cached::<T>(fetched.payload) {
                    Ok(value) => {
                        run.response_hits += 1;
                        let meta = StageMeta {
                            model: Some(model),
                            source: ResultSource::ResponseCache,
                            latency_ms: started.elapsed().as_millis() as u64,
                            attempts: 0,
                        };
                        return Ok((value, meta));
                    }
                    Err(reason) if !refetched => {
                        refetched = true;
                        tracing::warn!(
                            album = %item.identity,
                            stage = %stage,
                            fingerprint = %fingerprint,
                            reason = %reason,
                            "Cached response no longer valid, fetching again"
                        );
                        if let Err(e) = self.responses.invalidate(&fingerprint).await {
                            tracing::warn!(stage = %stage, error = %e, "Failed to invalidate cached response");
                            run.cache_errors += 1;
                        }
                    }
                    Err(reason) => {
                        return Err(RemoteError::MalformedResponse(format!("cached response invalid: {}", reason)).into());
                    }
                },
            }
        }
    }
}

fn decode_cached<T: ResponseShape>(payload: serde_json::Value) -> Result<T, String> {
    let value: T = serde_json::from_value(payload).map_err(|e| e.to_string())?;
    value.validate()?;
    Ok(value)
}

fn fail(item: &mut Item, error: &StageError) {
    tracing::warn!(
        album = %item.identity,
        stage = %item.stage(),
        kind = %error.kind(),
        error = %error,
        "Item failed"
    );
    item.fail(error.kind(), error.to_string());
}
