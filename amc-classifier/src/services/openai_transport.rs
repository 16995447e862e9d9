//! Chat-completions HTTP transport
//!
//! Speaks the OpenAI-compatible `/chat/completions` API and classifies HTTP
//! outcomes into [`RemoteError`]. Retry policy lives in the remote client.

use super::remote_client::{CompletionRequest, Transport};
use crate::error::RemoteError;
use amc_common::config::ApiKey;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const USER_AGENT: &str = concat!("amc-classifier/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// reqwest-backed transport
pub struct OpenAiTransport {
    http_client: reqwest::Client,
    base_url: String,
    api_key: ApiKey,
}

impl OpenAiTransport {
    pub fn new(base_url: impl Into<String>, api_key: ApiKey, timeout: Duration) -> Result<Self, RemoteError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::FatalRequest(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl Transport for OpenAiTransport {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, RemoteError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &request.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: ResponseFormat { kind: "json_object" },
        };

        tracing::debug!(url = %url, model = %request.model, "Sending completion request");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &error_text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::MalformedResponse(format!("unexpected response envelope: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| RemoteError::MalformedResponse("response has no message content".to_string()))
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        RemoteError::Transient(error.to_string())
    } else if error.is_builder() {
        RemoteError::FatalRequest(error.to_string())
    } else {
        RemoteError::Transient(error.to_string())
    }
}

/// Map a non-success HTTP status to the remote taxonomy
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> RemoteError {
    let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body, 300));
    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            // Quota exhaustion also arrives as 429 but will not recover by waiting
            if body.contains("insufficient_quota") {
                RemoteError::FatalRequest(detail)
            } else {
                RemoteError::RateLimited { retry_after }
            }
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT => RemoteError::Transient(detail),
        s if s.is_server_error() => RemoteError::Transient(detail),
        _ => RemoteError::FatalRequest(detail),
    }
}

/// `Retry-After` in delta-seconds form
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(3)), ""),
            RemoteError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(3)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, None, r#"{"error":{"code":"insufficient_quota"}}"#),
            RemoteError::FatalRequest(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, None, ""),
            RemoteError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None, "bad key"),
            RemoteError::FatalRequest(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, None, ""),
            RemoteError::FatalRequest(_)
        ));
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_transport_creation() {
        let transport = OpenAiTransport::new(
            "https://api.example.com/v1/",
            ApiKey::new("test-key"),
            Duration::from_secs(5),
        );
        let transport = transport.unwrap();
        assert_eq!(transport.base_url, "https://api.example.com/v1");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("Dvořák", 4), "Dvoř");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
