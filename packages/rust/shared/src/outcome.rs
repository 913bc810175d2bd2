//! Per-key fetch failures and outcomes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{EnrichmentResult, IdentifierKey};

/// A classified failure from a single fetch attempt.
///
/// Sources that cannot tell transient from permanent failures must report
/// [`FetchError::Soft`]; only explicit "not found" and malformed identifiers
/// are [`FetchError::Hard`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "class", content = "reason", rename_all = "snake_case")]
pub enum FetchError {
    /// Transient: timeout, rate limit, incomplete page. Retried.
    #[error("transient failure: {0}")]
    Soft(String),

    /// Definitive: not found or malformed identifier. Never retried.
    #[error("permanent failure: {0}")]
    Hard(String),
}

impl FetchError {
    pub fn soft(reason: impl Into<String>) -> Self {
        Self::Soft(reason.into())
    }

    pub fn hard(reason: impl Into<String>) -> Self {
        Self::Hard(reason.into())
    }

    /// Source reported that no company exists for this key.
    pub fn not_found(key: &IdentifierKey) -> Self {
        Self::Hard(format!("not found: {key}"))
    }

    /// Registry number rejected by the source's own validation.
    pub fn invalid_identifier(key: &IdentifierKey, why: impl AsRef<str>) -> Self {
        Self::Hard(format!("invalid identifier {key}: {}", why.as_ref()))
    }

    /// Attempt exceeded the per-call timeout.
    pub fn timeout(after: Duration) -> Self {
        Self::Soft(format!("timed out after {}ms", after.as_millis()))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Soft(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Soft(r) | Self::Hard(r) => r,
        }
    }
}

/// Terminal result for one submitted key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchOutcome {
    Success(EnrichmentResult),
    SoftFailure {
        reason: String,
        retries_exhausted: bool,
    },
    HardFailure {
        reason: String,
    },
    /// Run was cancelled before this key completed.
    Cancelled,
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn result(&self) -> Option<&EnrichmentResult> {
        match self {
            Self::Success(r) => Some(r),
            _ => None,
        }
    }

    /// Failure reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::SoftFailure { reason, .. } | Self::HardFailure { reason } => Some(reason),
            Self::Cancelled => Some("cancelled"),
        }
    }
}
