//! Error types for VendorLens.
//!
//! Library crates use [`VendorLensError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Per-key fetch failures are *not* represented here: they are recovered
//! locally as [`FetchError`](crate::FetchError) values inside outcomes and
//! never abort a run.

use std::path::PathBuf;

/// Top-level error type for run-level VendorLens operations.
#[derive(Debug, thiserror::Error)]
pub enum VendorLensError {
    /// Configuration loading, validation, or source registration error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Country code outside the supported enumeration.
    #[error("unsupported country code: {0:?}")]
    UnsupportedCountry(String),

    /// Network/HTTP client construction error.
    #[error("network error: {0}")]
    Network(String),

    /// Identifier or payload parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Unrecoverable dataset collaborator error (snapshot unreadable, etc.).
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (duplicate keys, bad registry number, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, VendorLensError>;

impl VendorLensError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is a configuration problem (fatal before scheduling).
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::UnsupportedCountry(_))
    }
}
