//! Application configuration for VendorLens.
//!
//! User config lives at `~/.vendorlens/vendorlens.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VendorLensError};
use crate::types::CountryCode;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "vendorlens.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".vendorlens";

// ---------------------------------------------------------------------------
// Config structs (matching vendorlens.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Run defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Retry backoff curve.
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Per-country source settings.
    #[serde(default)]
    pub sources: SourcesConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Total fetch attempts per key (first try included).
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Per-call fetch timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Upper bound on any single source's worker pool.
    #[serde(default = "default_global_concurrency")]
    pub global_concurrency: usize,

    /// Suspend a source after this many exhausted keys in a row (0 = never).
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Seconds to let in-flight fetches run after cancellation (unset = until done).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_grace_secs: Option<u64>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            timeout_secs: default_timeout_secs(),
            global_concurrency: default_global_concurrency(),
            max_consecutive_failures: default_max_consecutive_failures(),
            cancel_grace_secs: None,
        }
    }
}

fn default_retry_limit() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_global_concurrency() -> usize {
    3
}
fn default_max_consecutive_failures() -> u32 {
    5
}

/// `[backoff]` section: `base * 2^n` capped at `max`, plus jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry, in ms.
    #[serde(default = "default_backoff_base")]
    pub base_ms: u64,

    /// Cap on the exponential part, in ms.
    #[serde(default = "default_backoff_max")]
    pub max_ms: u64,

    /// Additive jitter as a fraction of the delay, in `[0, 1)`.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base(),
            max_ms: default_backoff_max(),
            jitter: default_jitter(),
        }
    }
}

fn default_backoff_base() -> u64 {
    1_000
}
fn default_backoff_max() -> u64 {
    60_000
}
fn default_jitter() -> f64 {
    0.25
}

/// `[sources]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "SourceConfig::fr")]
    pub fr: SourceConfig,
    #[serde(default = "SourceConfig::be")]
    pub be: SourceConfig,
    #[serde(default = "SourceConfig::dk")]
    pub dk: SourceConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            fr: SourceConfig::fr(),
            be: SourceConfig::be(),
            dk: SourceConfig::dk(),
        }
    }
}

impl SourcesConfig {
    pub fn get(&self, country: CountryCode) -> &SourceConfig {
        match country {
            CountryCode::Fr => &self.fr,
            CountryCode::Be => &self.be,
            CountryCode::Dk => &self.dk,
        }
    }
}

/// `[sources.<cc>]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Whether the source is registered at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Endpoint or search page URL.
    pub base_url: String,

    /// Override the fetcher's own concurrency ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,

    /// Override the minimum delay between requests per worker, in ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_interval_ms: Option<u64>,
}

impl SourceConfig {
    fn with_url(url: &str) -> Self {
        Self {
            enabled: true,
            base_url: url.into(),
            max_concurrency: None,
            request_interval_ms: None,
        }
    }

    pub fn fr() -> Self {
        Self::with_url("https://recherche-entreprises.api.gouv.fr/search")
    }

    pub fn be() -> Self {
        Self::with_url("https://kbopub.economie.fgov.be/kbopub/zoeknummerform.html")
    }

    pub fn dk() -> Self {
        Self::with_url("https://datacvr.virk.dk/enhed/virksomhed")
    }
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Run options (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime options for one orchestration run.
///
/// Taken fresh by every run; nothing here outlives it.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Total attempts per key, first try included.
    pub retry_limit: u32,
    /// Timeout wrapped around each individual fetch attempt.
    pub timeout_per_call: Duration,
    /// Upper bound on any single source's worker pool.
    pub global_concurrency_cap: usize,
    /// Replaces a fetcher's own `max_concurrency` hint.
    pub per_source_caps: HashMap<CountryCode, usize>,
    /// Replaces a fetcher's own `min_request_interval` hint.
    pub per_source_intervals: HashMap<CountryCode, Duration>,
    /// Retry backoff curve.
    pub backoff: BackoffConfig,
    /// Suspend a source after this many exhausted keys in a row (0 = never).
    pub max_consecutive_failures: u32,
    /// How long in-flight fetches may continue after cancellation.
    /// `None` lets them finish.
    pub cancel_grace: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for RunOptions {
    fn from(config: &AppConfig) -> Self {
        let mut per_source_caps = HashMap::new();
        let mut per_source_intervals = HashMap::new();
        for country in CountryCode::ALL {
            let source = config.sources.get(country);
            if let Some(cap) = source.max_concurrency {
                per_source_caps.insert(country, cap);
            }
            if let Some(ms) = source.request_interval_ms {
                per_source_intervals.insert(country, Duration::from_millis(ms));
            }
        }

        Self {
            retry_limit: config.defaults.retry_limit,
            timeout_per_call: Duration::from_secs(config.defaults.timeout_secs),
            global_concurrency_cap: config.defaults.global_concurrency,
            per_source_caps,
            per_source_intervals,
            backoff: config.backoff.clone(),
            max_consecutive_failures: config.defaults.max_consecutive_failures,
            cancel_grace: config.defaults.cancel_grace_secs.map(Duration::from_secs),
        }
    }
}

impl RunOptions {
    /// Reject option combinations the orchestrator cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.retry_limit == 0 {
            return Err(VendorLensError::config("retry_limit must be at least 1"));
        }
        if self.global_concurrency_cap == 0 {
            return Err(VendorLensError::config(
                "global_concurrency must be at least 1",
            ));
        }
        if let Some((country, _)) = self.per_source_caps.iter().find(|(_, cap)| **cap == 0) {
            return Err(VendorLensError::config(format!(
                "max_concurrency for {country} must be at least 1"
            )));
        }
        if self.timeout_per_call.is_zero() {
            return Err(VendorLensError::config("timeout must be greater than zero"));
        }
        if !(0.0..1.0).contains(&self.backoff.jitter) {
            return Err(VendorLensError::config(format!(
                "backoff jitter must be in [0, 1), got {}",
                self.backoff.jitter
            )));
        }
        if self.backoff.max_ms < self.backoff.base_ms {
            return Err(VendorLensError::config(
                "backoff max_ms must not be below base_ms",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.vendorlens/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| VendorLensError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.vendorlens/vendorlens.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| VendorLensError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        VendorLensError::config(format!("failed to parse {}: {e}", path.display()))
    })?;

    for country in CountryCode::ALL {
        let source = config.sources.get(country);
        url::Url::parse(&source.base_url).map_err(|e| {
            VendorLensError::config(format!(
                "invalid base_url for {country} ({}): {e}",
                source.base_url
            ))
        })?;
    }

    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| VendorLensError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| VendorLensError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| VendorLensError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
