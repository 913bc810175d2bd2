//! The source fetcher capability.

use std::ops::RangeInclusive;
use std::time::Duration;

use async_trait::async_trait;
use vendorlens_shared::{CountryCode, EnrichmentResult, FetchError, IdentifierKey};

/// Result of a single fetch attempt.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// A country-specific source that resolves one key to a complete record.
///
/// Implementations must be safe for concurrent calls, keep no per-call state
/// between invocations, and classify every failure as soft or hard. The
/// scheduling hints (`max_concurrency`, `base_latency`, `min_request_interval`)
/// are advisory; the orchestrator enforces them, the fetcher does not.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Country this source serves. Used as the registry key.
    fn country(&self) -> CountryCode;

    /// Human-readable source name for tracing.
    fn name(&self) -> &str;

    /// Largest number of concurrent calls the source tolerates.
    fn max_concurrency(&self) -> usize {
        1
    }

    /// Typical duration of a successful call.
    fn base_latency(&self) -> Duration {
        Duration::from_secs(1)
    }

    /// Minimum pause a worker takes before each call to this source.
    fn min_request_interval(&self) -> Duration {
        Duration::ZERO
    }

    /// Check the registry number format before anything is scheduled.
    fn validate(&self, key: &IdentifierKey) -> FetchResult<()> {
        validate_digits(key, key.registry_number(), 6..=15)
    }

    /// The spelling of a valid key used as the dataset's primary key.
    ///
    /// Only called on keys that passed [`validate`](Self::validate). Sources
    /// that accept several spellings of one number must map them all to the
    /// same key here.
    fn canonical_key(&self, key: &IdentifierKey) -> IdentifierKey {
        key.clone()
    }

    /// Fetch the record for `key`, giving up after `timeout`.
    async fn fetch(&self, key: &IdentifierKey, timeout: Duration) -> FetchResult<EnrichmentResult>;
}

/// Require `number` to be ASCII digits with a length in `lengths`.
pub fn validate_digits(
    key: &IdentifierKey,
    number: &str,
    lengths: RangeInclusive<usize>,
) -> FetchResult<()> {
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FetchError::invalid_identifier(key, "expected digits only"));
    }
    if !lengths.contains(&number.len()) {
        return Err(FetchError::invalid_identifier(
            key,
            format!(
                "expected {}-{} digits, got {}",
                lengths.start(),
                lengths.end(),
                number.len()
            ),
        ));
    }
    Ok(())
}
