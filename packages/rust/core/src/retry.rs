//! Per-key attempt loop: timeout, classification, backoff.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use vendorlens_shared::{BackoffConfig, EnrichmentResult, FetchError, FetchOutcome, IdentifierKey, RunOptions};
use vendorlens_sources::SourceFetcher;

/// Delay before retry number `retry` (0 for the first retry).
///
/// `base * 2^retry`, capped at `max`, plus `delay * jitter * sample`.
/// `sample` is expected in `[0, 1)`.
pub fn backoff_delay(config: &BackoffConfig, retry: u32, sample: f64) -> Duration {
    let exponential = config.base_ms as f64 * 2f64.powi(retry.min(32) as i32);
    let capped = exponential.min(config.max_ms as f64);
    let jitter = capped * config.jitter * sample.clamp(0.0, 1.0);
    Duration::from_millis((capped + jitter) as u64)
}

/// Lifecycle of one key inside a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyState {
    Pending,
    Attempting { attempt: u32 },
    RetryScheduled { attempt: u32, delay: Duration },
    Succeeded(EnrichmentResult),
    HardFailed(String),
    SoftExhausted(String),
    Cancelled,
}

impl KeyState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded(_) | Self::HardFailed(_) | Self::SoftExhausted(_) | Self::Cancelled
        )
    }

    fn into_outcome(self) -> FetchOutcome {
        match self {
            Self::Succeeded(result) => FetchOutcome::Success(result),
            Self::HardFailed(reason) => FetchOutcome::HardFailure { reason },
            Self::SoftExhausted(reason) => FetchOutcome::SoftFailure {
                reason,
                retries_exhausted: true,
            },
            // Only reachable through cancellation; other states never leave the loop.
            _ => FetchOutcome::Cancelled,
        }
    }
}

/// Drive one key to a terminal state.
///
/// `attempts` is updated as each attempt starts so the caller can still read
/// it if this future is dropped mid-flight. Cancellation is honoured before
/// every attempt and during backoff, never inside a running fetch.
pub(crate) async fn run_key(
    fetcher: &dyn SourceFetcher,
    key: &IdentifierKey,
    options: &RunOptions,
    interval: Duration,
    cancel: &CancellationToken,
    attempts: &mut u32,
) -> FetchOutcome {
    let mut state = KeyState::Pending;

    while !state.is_terminal() {
        state = match state {
            KeyState::Pending => KeyState::Attempting { attempt: 1 },

            KeyState::Attempting { attempt } => {
                if !interval.is_zero() {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
                if cancel.is_cancelled() {
                    KeyState::Cancelled
                } else {
                    *attempts = attempt;
                    attempt_once(fetcher, key, options, attempt)
                        .await
                        .unwrap_or_else(|err| after_failure(err, key, options, attempt))
                }
            }

            KeyState::RetryScheduled { attempt, delay } => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => KeyState::Cancelled,
                    _ = tokio::time::sleep(delay) => KeyState::Attempting { attempt: attempt + 1 },
                }
            }

            terminal => terminal,
        };
    }

    state.into_outcome()
}

async fn attempt_once(
    fetcher: &dyn SourceFetcher,
    key: &IdentifierKey,
    options: &RunOptions,
    attempt: u32,
) -> Result<KeyState, FetchError> {
    debug!(%key, attempt, source = fetcher.name(), "fetching");
    let timeout = options.timeout_per_call;
    match tokio::time::timeout(timeout, fetcher.fetch(key, timeout)).await {
        Ok(Ok(result)) => Ok(KeyState::Succeeded(result)),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(FetchError::timeout(timeout)),
    }
}

fn after_failure(err: FetchError, key: &IdentifierKey, options: &RunOptions, attempt: u32) -> KeyState {
    match err {
        FetchError::Hard(reason) => {
            debug!(%key, attempt, %reason, "permanent failure");
            KeyState::HardFailed(reason)
        }
        FetchError::Soft(reason) if attempt >= options.retry_limit => {
            warn!(%key, attempts = attempt, %reason, "retries exhausted");
            KeyState::SoftExhausted(reason)
        }
        FetchError::Soft(reason) => {
            let sample: f64 = rand::thread_rng().r#gen();
            let delay = backoff_delay(&options.backoff, attempt - 1, sample);
            debug!(%key, attempt, %reason, delay_ms = delay.as_millis() as u64, "retrying");
            KeyState::RetryScheduled { attempt, delay }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_support::{ScriptedFetcher, Step};
    use vendorlens_shared::CountryCode;

    fn backoff(jitter: f64) -> BackoffConfig {
        BackoffConfig {
            base_ms: 100,
            max_ms: 1_000,
            jitter,
        }
    }

    fn assert_near(actual: Duration, expected_ms: u64) {
        let expected = Duration::from_millis(expected_ms);
        assert!(
            actual >= expected && actual <= expected + Duration::from_millis(5),
            "expected ~{expected:?}, got {actual:?}"
        );
    }

    fn options(retry_limit: u32) -> RunOptions {
        RunOptions {
            retry_limit,
            timeout_per_call: Duration::from_secs(1),
            backoff: backoff(0.0),
            ..RunOptions::default()
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let cfg = backoff(0.0);
        let delays: Vec<u128> = (0..6).map(|n| backoff_delay(&cfg, n, 0.0).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn jittered_backoff_never_decreases() {
        let cfg = backoff(0.5);
        for n in 0..3 {
            // Worst case: maximum jitter now, none on the next retry.
            let high = backoff_delay(&cfg, n, 0.999);
            let next_low = backoff_delay(&cfg, n + 1, 0.0);
            assert!(next_low >= high, "retry {n}: {next_low:?} < {high:?}");
        }
        assert_eq!(backoff_delay(&cfg, 0, 0.5), Duration::from_millis(125));
        assert_eq!(backoff_delay(&cfg, 40, 0.0), Duration::from_millis(1_000));
    }

    #[test]
    fn terminal_states() {
        assert!(!KeyState::Pending.is_terminal());
        assert!(!KeyState::Attempting { attempt: 1 }.is_terminal());
        assert!(KeyState::Cancelled.is_terminal());
        assert!(KeyState::HardFailed("x".into()).is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn soft_failures_retry_then_succeed() {
        let fetcher = ScriptedFetcher::new(CountryCode::Fr)
            .script("123456789", [Step::Soft("busy"), Step::Soft("busy")]);
        let key = IdentifierKey::new(CountryCode::Fr, "123456789");
        let mut attempts = 0;

        let outcome = run_key(
            &fetcher,
            &key,
            &options(3),
            Duration::ZERO,
            &CancellationToken::new(),
            &mut attempts,
        )
        .await;

        assert!(outcome.is_success());
        assert_eq!(attempts, 3);

        let calls = fetcher.call_times("123456789");
        assert_eq!(calls.len(), 3);
        assert_near(calls[1] - calls[0], 100);
        assert_near(calls[2] - calls[1], 200);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_soft_failure_stops_at_retry_limit() {
        let fetcher = ScriptedFetcher::new(CountryCode::Dk).always_soft();
        let key = IdentifierKey::new(CountryCode::Dk, "12345678");
        // Default policy: 3 attempts, 1s base, 25% jitter.
        let opts = RunOptions::default();
        assert_eq!(opts.retry_limit, 3);
        let mut attempts = 0;

        let outcome = run_key(
            &fetcher,
            &key,
            &opts,
            Duration::ZERO,
            &CancellationToken::new(),
            &mut attempts,
        )
        .await;

        assert!(matches!(
            outcome,
            FetchOutcome::SoftFailure {
                retries_exhausted: true,
                ..
            }
        ));
        assert_eq!(attempts, 3);

        let calls = fetcher.call_times("12345678");
        assert_eq!(calls.len(), 3);
        let first_gap = calls[1] - calls[0];
        let second_gap = calls[2] - calls[1];
        assert!(first_gap >= Duration::from_secs(1), "{first_gap:?}");
        assert!(second_gap > first_gap, "{second_gap:?} <= {first_gap:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn hard_failure_is_not_retried() {
        let fetcher = ScriptedFetcher::new(CountryCode::Fr).script("123456789", [Step::Hard]);
        let key = IdentifierKey::new(CountryCode::Fr, "123456789");
        let mut attempts = 0;

        let outcome = run_key(
            &fetcher,
            &key,
            &options(5),
            Duration::ZERO,
            &CancellationToken::new(),
            &mut attempts,
        )
        .await;

        assert!(matches!(outcome, FetchOutcome::HardFailure { .. }));
        assert_eq!(attempts, 1);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_count_as_soft_until_exhausted() {
        let fetcher = Arc::new(ScriptedFetcher::new(CountryCode::Dk).script(
            "12345678",
            [Step::Hang, Step::Hang],
        ));
        let key = IdentifierKey::new(CountryCode::Dk, "12345678");
        let mut attempts = 0;

        let outcome = run_key(
            fetcher.as_ref(),
            &key,
            &options(2),
            Duration::ZERO,
            &CancellationToken::new(),
            &mut attempts,
        )
        .await;

        match outcome {
            FetchOutcome::SoftFailure {
                reason,
                retries_exhausted,
            } => {
                assert!(retries_exhausted);
                assert!(reason.contains("timed out"), "{reason}");
            }
            other => panic!("expected soft failure, got {other:?}"),
        }
        assert_eq!(attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff() {
        let fetcher = ScriptedFetcher::new(CountryCode::Fr).script("123456789", [Step::Soft("busy")]);
        let key = IdentifierKey::new(CountryCode::Fr, "123456789");
        let cancel = CancellationToken::new();
        let mut opts = options(3);
        opts.backoff.base_ms = 10_000;
        opts.backoff.max_ms = 10_000;

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let mut attempts = 0;
        let outcome = run_key(&fetcher, &key, &opts, Duration::ZERO, &cancel, &mut attempts).await;

        assert_eq!(outcome, FetchOutcome::Cancelled);
        assert_eq!(attempts, 1);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn request_interval_precedes_each_attempt() {
        let fetcher = ScriptedFetcher::new(CountryCode::Be).script("0403170701", [Step::Soft("busy")]);
        let key = IdentifierKey::new(CountryCode::Be, "0403170701");
        let start = tokio::time::Instant::now();
        let mut attempts = 0;

        let outcome = run_key(
            &fetcher,
            &key,
            &options(2),
            Duration::from_millis(500),
            &CancellationToken::new(),
            &mut attempts,
        )
        .await;

        assert!(outcome.is_success());
        let calls = fetcher.call_times("0403170701");
        assert_near(calls[0] - start, 500);
        // interval + 100ms backoff
        assert_near(calls[1] - calls[0], 600);
    }
}
