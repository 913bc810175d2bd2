//! Shared types, error model, and configuration for VendorLens.
//!
//! This crate is the foundation depended on by all other VendorLens crates.
//! It provides:
//! - [`VendorLensError`]: the unified run-level error type
//! - Domain types ([`IdentifierKey`], [`CountryCode`], [`DatasetRow`], [`EnrichmentResult`])
//! - Per-key outcomes ([`FetchOutcome`], [`FetchError`])
//! - Configuration ([`AppConfig`], [`RunOptions`], config loading)

pub mod config;
pub mod error;
pub mod outcome;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BackoffConfig, DefaultsConfig, RunOptions, SourceConfig, SourcesConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{Result, VendorLensError};
pub use outcome::{FetchError, FetchOutcome};
pub use types::{
    Classification, CountryCode, DatasetRow, EnrichmentResult, IdentifierKey, RowFingerprint,
};
