//! Resilient remote classification client
//!
//! Wraps a [`Transport`] with:
//! - a shared concurrency gate (semaphore) held only while a request is in flight
//! - a finite retry loop with exponential backoff and jitter for
//!   `RateLimited` / `Transient` failures
//! - response repair: local JSON cleanup first, then a bounded number of
//!   corrective re-prompts, before giving up with `MalformedResponse`
//! - request statistics
//!
//! `FatalRequest` is returned immediately and never retried.

use crate::error::RemoteError;
use crate::models::Stage;
use amc_common::config::ApiConfig;
use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;

const REPAIR_SYSTEM_PROMPT: &str =
    "You repair malformed JSON. Reply with one valid JSON object and nothing else.";

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").expect("static pattern"));

/// One chat-style completion request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Network boundary of the remote service
///
/// Implementations classify every failure into a [`RemoteError`] and return
/// the raw text of a successful answer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, RemoteError>;
}

/// Declared shape of a remote answer
pub trait ResponseShape: DeserializeOwned + Serialize + Send {
    /// Semantic checks beyond deserialization
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Retry, backoff and repair settings
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total transport attempts per call, first one included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Extra random delay, as a fraction of the backoff
    pub jitter: f64,
    pub repair_attempts: u32,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ApiConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ApiConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: 0.25,
            repair_attempts: config.repair_attempts,
            timeout: Duration::try_from_secs_f64(config.timeout_seconds)
                .unwrap_or(Duration::from_secs(30)),
        }
    }

    /// Backoff before retry number `retry` (1-based), without jitter
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Actual sleep before retry number `retry`
    ///
    /// Jitter is added before the ceiling is applied, so successive delays
    /// never decrease.
    pub fn delay(&self, retry: u32, error: &RemoteError) -> Duration {
        let backoff = self.backoff(retry);
        let jitter_ceiling = backoff.as_secs_f64() * self.jitter;
        let jitter = if jitter_ceiling > 0.0 {
            Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=jitter_ceiling))
        } else {
            Duration::ZERO
        };
        let mut delay = backoff + jitter;
        if let RemoteError::RateLimited {
            retry_after: Some(retry_after),
        } = error
        {
            delay = delay.max(*retry_after);
        }
        delay.min(self.max_delay)
    }
}

/// Observability data for one logical call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallReport {
    /// Transport calls made, repair passes included
    pub attempts: u32,
    pub retries: u32,
    pub repairs: u32,
    pub elapsed: Duration,
    /// Sleeps between attempts, in order
    pub delays: Vec<Duration>,
}

/// Validated answer of a call
#[derive(Debug)]
pub struct CallOutcome<T> {
    pub value: T,
    /// `value` re-serialized; this is what gets cached
    pub payload: serde_json::Value,
    pub report: CallReport,
}

/// Failed call, with the attempts it took
#[derive(Debug, Clone, Error)]
#[error("{error} (after {} attempts)", report.attempts)]
pub struct CallFailure {
    pub error: RemoteError,
    pub report: CallReport,
}

/// Counters shared by every call through one client
#[derive(Debug, Default)]
struct ClientStats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    retried_requests: AtomicU64,
    repair_passes: AtomicU64,
    transport_calls: AtomicU64,
}

/// Point-in-time copy of the client statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientStatsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retried_requests: u64,
    pub repair_passes: u64,
    pub transport_calls: u64,
    pub success_rate: f64,
}

/// Remote classification client
pub struct RemoteClient {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    gate: Arc<Semaphore>,
    repair_model: Option<String>,
    stats: ClientStats,
}

impl RemoteClient {
    /// `api_concurrency` bounds simultaneous in-flight transport calls
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy, api_concurrency: usize) -> Self {
        Self {
            transport,
            policy,
            gate: Arc::new(Semaphore::new(api_concurrency.max(1))),
            repair_model: None,
            stats: ClientStats::default(),
        }
    }

    /// Use a different (cheaper) model for corrective re-prompts
    pub fn with_repair_model(mut self, model: impl Into<String>) -> Self {
        self.repair_model = Some(model.into());
        self
    }

    /// Free remote slots right now
    pub fn available_slots(&self) -> usize {
        self.gate.available_permits()
    }

    pub fn stats(&self) -> ClientStatsSnapshot {
        let total = self.stats.total_requests.load(Ordering::Relaxed);
        let successful = self.stats.successful_requests.load(Ordering::Relaxed);
        ClientStatsSnapshot {
            total_requests: total,
            successful_requests: successful,
            failed_requests: self.stats.failed_requests.load(Ordering::Relaxed),
            retried_requests: self.stats.retried_requests.load(Ordering::Relaxed),
            repair_passes: self.stats.repair_passes.load(Ordering::Relaxed),
            transport_calls: self.stats.transport_calls.load(Ordering::Relaxed),
            success_rate: if total == 0 {
                0.0
            } else {
                successful as f64 / total as f64
            },
        }
    }

    /// Issue one classification request and validate the answer as `T`
    pub async fn call<T: ResponseShape>(
        &self,
        stage: Stage,
        request: CompletionRequest,
    ) -> Result<CallOutcome<T>, CallFailure> {
        let start = Instant::now();
        let request = CompletionRequest {
            system: sanitize_text(&request.system),
            prompt: sanitize_text(&request.prompt),
            ..request
        };
        let mut report = CallReport::default();
        self.stats.total_requests.fetch_add(1, Ordering::Relaxed);

        let result = self.call_inner::<T>(stage, &request, &mut report).await;
        report.elapsed = start.elapsed();

        match result {
            Ok((value, payload)) => {
                self.stats.successful_requests.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    stage = %stage,
                    model = %request.model,
                    attempts = report.attempts,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Remote call succeeded"
                );
                Ok(CallOutcome {
                    value,
                    payload,
                    report,
                })
            }
            Err(error) => {
                self.stats.failed_requests.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    stage = %stage,
                    model = %request.model,
                    attempts = report.attempts,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    error = %error,
                    "Remote call failed"
                );
                Err(CallFailure { error, report })
            }
        }
    }

    async fn call_inner<T: ResponseShape>(
        &self,
        stage: Stage,
        request: &CompletionRequest,
        report: &mut CallReport,
    ) -> Result<(T, serde_json::Value), RemoteError> {
        let raw = self.send_with_retry(stage, request, report).await?;
        self.decode_or_repair::<T>(stage, request, raw, report).await
    }

    /// Transport call with backoff on `RateLimited` / `Transient`
    ///
    /// Repair passes go through here too, so an outage during repair is
    /// retried like one during the original request.
    async fn send_with_retry(
        &self,
        stage: Stage,
        request: &CompletionRequest,
        report: &mut CallReport,
    ) -> Result<String, RemoteError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send(request, report).await {
                Ok(raw) => return Ok(raw),
                Err(error) if error.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay(attempt, &error);
                    report.retries += 1;
                    report.delays.push(delay);
                    self.stats.retried_requests.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        stage = %stage,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        backoff_ms = delay.as_millis() as u64,
                        error = %error,
                        "Remote call failed, will retry after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// One transport call, holding a gate permit only while it is in flight
    async fn send(&self, request: &CompletionRequest, report: &mut CallReport) -> Result<String, RemoteError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| RemoteError::Transient("remote gate closed".to_string()))?;

        report.attempts += 1;
        self.stats.transport_calls.fetch_add(1, Ordering::Relaxed);

        match tokio::time::timeout(self.policy.timeout, self.transport.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Transient(format!(
                "request timed out after {:.1}s",
                self.policy.timeout.as_secs_f64()
            ))),
        }
    }

    async fn decode_or_repair<T: ResponseShape>(
        &self,
        stage: Stage,
        request: &CompletionRequest,
        mut raw: String,
        report: &mut CallReport,
    ) -> Result<(T, serde_json::Value), RemoteError> {
        let mut last_error = match decode::<T>(&raw) {
            Ok(decoded) => return Ok(decoded),
            Err(e) => e,
        };

        for pass in 1..=self.policy.repair_attempts {
            report.repairs += 1;
            self.stats.repair_passes.fetch_add(1, Ordering::Relaxed);
            tracing::info!(stage = %stage, pass, error = %last_error, "Response failed validation, attempting repair");

            let repair = CompletionRequest {
                model: self.repair_model.clone().unwrap_or_else(|| request.model.clone()),
                system: REPAIR_SYSTEM_PROMPT.to_string(),
                prompt: format!(
                    "The answer below was supposed to be a single JSON object for this request, \
                     but it was rejected: {}\n\nRequest:\n{}\n\nAnswer:\n{}\n\n\
                     Return only the corrected JSON object.",
                    last_error, request.prompt, raw
                ),
                temperature: 0.0,
                max_tokens: request.max_tokens,
            };
            raw = self.send_with_retry(stage, &repair, report).await?;
            match decode::<T>(&raw) {
                Ok(decoded) => return Ok(decoded),
                Err(e) => last_error = e,
            }
        }

        Err(RemoteError::MalformedResponse(last_error))
    }
}

/// Parse, type-check and validate a raw answer
fn decode<T: ResponseShape>(raw: &str) -> Result<(T, serde_json::Value), String> {
    let cleaned = clean_json_response(raw);
    let value: T = serde_json::from_str(&cleaned).map_err(|e| format!("invalid JSON: {}", e))?;
    value.validate()?;
    let payload = serde_json::to_value(&value).map_err(|e| format!("re-encode failed: {}", e))?;
    Ok((value, payload))
}

/// Local structural coercion of a model answer
///
/// Strips Markdown code fences, cuts to the outermost `{...}`, and removes
/// trailing commas before a closing bracket.
pub fn clean_json_response(raw: &str) -> String {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        text = rest.trim_end().strip_suffix("```").unwrap_or(rest).trim();
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            text = &text[start..=end];
        }
    }

    TRAILING_COMMA.replace_all(text, "$1").into_owned()
}

/// Replace control characters other than newline, carriage return and tab
pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_control() && !matches!(c, '\n' | '\r' | '\t') {
                ' '
            } else {
                c
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            jitter: 0.0,
            repair_attempts: 0,
            timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_millis(1000));
        assert_eq!(policy.backoff(64), Duration::from_millis(1000));
    }

    #[test]
    fn test_jittered_delays_never_decrease() {
        let policy = RetryPolicy {
            max_attempts: 12,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
            jitter: 0.25,
            repair_attempts: 0,
            timeout: Duration::from_secs(1),
        };
        let err = RemoteError::Transient("x".into());
        for _ in 0..50 {
            let delays: Vec<_> = (1..12).map(|r| policy.delay(r, &err)).collect();
            assert!(delays.windows(2).all(|w| w[0] <= w[1]), "{:?}", delays);
            assert!(delays.iter().all(|d| *d <= policy.max_delay));
        }
    }

    #[test]
    fn test_rate_limit_honors_retry_after() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        let err = RemoteError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(policy.delay(1, &err), Duration::from_secs(2));
    }

    #[test]
    fn test_clean_json_response() {
        assert_eq!(clean_json_response("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(
            clean_json_response("Sure! Here it is: {\"a\": [1, 2,], } Hope that helps."),
            "{\"a\": [1, 2] }"
        );
        assert_eq!(clean_json_response("no json here"), "no json here");
    }

    #[test]
    fn test_sanitize_text() {
        assert_eq!(sanitize_text("a\u{0}b\tc\nd\u{7f}"), "a b\tc\nd ");
        assert_eq!(sanitize_text("Dvořák – Symphony"), "Dvořák – Symphony");
    }
}
