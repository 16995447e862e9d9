//! Error types for amc-classifier
//!
//! Remote failures are classified once, at the transport boundary, into
//! [`RemoteError`]. The stage pipeline wraps them in [`StageError`], and the
//! report exposes the flattened [`FailureKind`].

use crate::models::Stage;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failure of a single remote classification call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Service asked us to slow down (HTTP 429 or equivalent)
    #[error("Rate limited by remote service (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Timeout, connection failure, 5xx
    #[error("Transient remote failure: {0}")]
    Transient(String),

    /// Response failed schema validation, including after repair
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Request can never succeed as sent (4xx, auth, unsupported payload)
    #[error("Fatal request error: {0}")]
    FatalRequest(String),
}

impl RemoteError {
    /// Whether the remote client may retry this failure with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::RateLimited { .. } | RemoteError::Transient(_))
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            RemoteError::RateLimited { .. } => FailureKind::RemoteRateLimited,
            RemoteError::Transient(_) => FailureKind::RemoteTransient,
            RemoteError::MalformedResponse(_) => FailureKind::RemoteMalformedResponse,
            RemoteError::FatalRequest(_) => FailureKind::RemoteFatal,
        }
    }
}

/// Failure of one pipeline stage for one item
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// Item cannot be processed (no supported tracks, empty album, ...)
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Stop signal observed before the stage started
    #[error("Cancelled before completion")]
    Cancelled,

    /// Illegal state machine move; a bug, never retried
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl StageError {
    /// Retryable failures re-enter the same stage up to the stage retry limit
    pub fn is_retryable(&self) -> bool {
        match self {
            StageError::Remote(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            StageError::UnsupportedInput(_) => FailureKind::UnsupportedInput,
            StageError::Remote(e) => e.kind(),
            StageError::Cancelled => FailureKind::Cancelled,
            StageError::Transition(_) => FailureKind::Internal,
        }
    }
}

/// Report-level failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnsupportedInput,
    RemoteRateLimited,
    RemoteTransient,
    RemoteMalformedResponse,
    RemoteFatal,
    Cancelled,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::UnsupportedInput => "unsupported_input",
            FailureKind::RemoteRateLimited => "remote_rate_limited",
            FailureKind::RemoteTransient => "remote_transient",
            FailureKind::RemoteMalformedResponse => "remote_malformed_response",
            FailureKind::RemoteFatal => "remote_fatal",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        }
    }

    /// Whether a later run would fail the same way
    ///
    /// Outages and interruptions are not; they are never remembered in the
    /// execution cache.
    pub fn is_permanent(&self) -> bool {
        !matches!(
            self,
            FailureKind::RemoteRateLimited | FailureKind::RemoteTransient | FailureKind::Cancelled
        )
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Illegal state machine move
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Item is already terminal at {0}")]
    Terminal(Stage),

    #[error("Cannot leave {0} without a result for it")]
    MissingResult(Stage),

    #[error("Result for {got} does not belong to current stage {current}")]
    StageMismatch { current: Stage, got: Stage },
}
