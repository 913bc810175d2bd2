//! Concurrent, per-source dispatch of identifier keys.
//!
//! Keys are partitioned by country. Each partition gets its own worker pool
//! sized from the fetcher's hints and the run options, so a slow source only
//! ever delays its own keys. Workers pull from a shared queue, drive each key
//! through [`run_key`], and report one [`KeyOutcome`] per key over a channel.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use vendorlens_shared::{CountryCode, FetchOutcome, IdentifierKey, Result, RunOptions};
use vendorlens_sources::{SourceFetcher, SourceRegistry};

use crate::retry::run_key;

/// Terminal outcome for one submitted key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyOutcome {
    /// Position of the key in the submitted list.
    pub index: usize,
    pub key: IdentifierKey,
    pub outcome: FetchOutcome,
    /// Fetch attempts started; 0 if the key never reached its source.
    pub attempts: u32,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Dispatches keys to their country's fetcher.
pub struct Orchestrator {
    registry: Arc<SourceRegistry>,
}

impl Orchestrator {
    pub fn new(registry: SourceRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Start fetching `keys` and return the stream of their outcomes.
    ///
    /// Every key's country is resolved before any work starts: one
    /// unsupported country fails the whole call. Keys rejected by their
    /// fetcher's validation get an immediate hard failure with no attempts.
    /// Valid keys are rewritten to their source's canonical spelling before
    /// they are queued, so every outcome carries the dataset's key form.
    /// Must be called from within a Tokio runtime.
    #[instrument(skip_all, fields(keys = keys.len()))]
    pub fn dispatch(
        &self,
        keys: Vec<IdentifierKey>,
        options: &RunOptions,
        cancel: CancellationToken,
    ) -> Result<OutcomeStream> {
        options.validate()?;

        let mut fetchers: HashMap<CountryCode, Arc<dyn SourceFetcher>> = HashMap::new();
        for key in &keys {
            if let Entry::Vacant(slot) = fetchers.entry(key.country()) {
                slot.insert(self.registry.resolve(key.country())?);
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();

        // Partitions in order of first appearance.
        let mut order: Vec<CountryCode> = Vec::new();
        let mut queues: HashMap<CountryCode, VecDeque<(usize, IdentifierKey)>> = HashMap::new();
        let mut dispatched = Vec::with_capacity(keys.len());
        for (index, key) in keys.into_iter().enumerate() {
            let fetcher = &fetchers[&key.country()];
            if let Err(err) = fetcher.validate(&key) {
                debug!(%key, reason = err.reason(), "rejected before dispatch");
                // Receiver is alive: it is still in this scope.
                let _ = tx.send(KeyOutcome {
                    index,
                    key: key.clone(),
                    outcome: FetchOutcome::HardFailure {
                        reason: err.reason().to_string(),
                    },
                    attempts: 0,
                });
                dispatched.push(key);
                continue;
            }
            // Outcomes and the dataset only ever see the canonical spelling.
            let key = fetcher.canonical_key(&key);
            if !queues.contains_key(&key.country()) {
                order.push(key.country());
            }
            queues
                .entry(key.country())
                .or_default()
                .push_back((index, key.clone()));
            dispatched.push(key);
        }

        let mut workers = JoinSet::new();
        for country in order {
            let queue = queues.remove(&country).unwrap_or_default();
            let fetcher = fetchers[&country].clone();
            let pool = pool_size(fetcher.as_ref(), options, queue.len());
            let interval = options
                .per_source_intervals
                .get(&country)
                .copied()
                .unwrap_or_else(|| fetcher.min_request_interval());

            let estimate = estimate_duration(fetcher.base_latency(), queue.len(), pool);
            info!(
                %country,
                source = fetcher.name(),
                keys = queue.len(),
                workers = pool,
                estimated_secs = estimate.as_secs(),
                "dispatching partition"
            );

            let partition = Arc::new(Partition {
                country,
                fetcher,
                interval,
                queue: Mutex::new(queue),
                consecutive_failures: AtomicU32::new(0),
                suspended: AtomicBool::new(false),
            });

            for _ in 0..pool {
                workers.spawn(worker(
                    partition.clone(),
                    options.clone(),
                    cancel.clone(),
                    tx.clone(),
                ));
            }
        }

        Ok(OutcomeStream {
            rx,
            keys: dispatched,
            _workers: workers,
        })
    }

    /// Fetch every key and return the outcomes in submission order.
    pub async fn fetch_all(
        &self,
        keys: Vec<IdentifierKey>,
        options: &RunOptions,
        cancel: CancellationToken,
    ) -> Result<Vec<KeyOutcome>> {
        Ok(self.dispatch(keys, options, cancel)?.collect_ordered().await)
    }
}

/// `min(global cap, source cap, keys)`, never below one.
fn pool_size(fetcher: &dyn SourceFetcher, options: &RunOptions, keys: usize) -> usize {
    let source_cap = options
        .per_source_caps
        .get(&fetcher.country())
        .copied()
        .unwrap_or_else(|| fetcher.max_concurrency());
    options
        .global_concurrency_cap
        .min(source_cap)
        .min(keys)
        .max(1)
}

/// Rough wall-clock estimate for a partition: waves of `pool` keys each
/// taking `latency`.
fn estimate_duration(latency: Duration, keys: usize, pool: usize) -> Duration {
    let waves = keys.div_ceil(pool.max(1)) as u32;
    latency * waves
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

struct Partition {
    country: CountryCode,
    fetcher: Arc<dyn SourceFetcher>,
    interval: Duration,
    queue: Mutex<VecDeque<(usize, IdentifierKey)>>,
    consecutive_failures: AtomicU32,
    suspended: AtomicBool,
}

impl Partition {
    fn next_key(&self) -> Option<(usize, IdentifierKey)> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Track exhausted keys in a row; trip the breaker at the threshold.
    fn record(&self, outcome: &FetchOutcome, threshold: u32) {
        match outcome {
            FetchOutcome::Success(_) => self.consecutive_failures.store(0, Ordering::SeqCst),
            FetchOutcome::SoftFailure {
                retries_exhausted: true,
                ..
            } => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if threshold > 0
                    && failures >= threshold
                    && !self.suspended.swap(true, Ordering::SeqCst)
                {
                    warn!(
                        country = %self.country,
                        source = self.fetcher.name(),
                        failures,
                        "source suspended for the rest of the run"
                    );
                }
            }
            _ => {}
        }
    }
}

async fn worker(
    partition: Arc<Partition>,
    options: RunOptions,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<KeyOutcome>,
) {
    while let Some((index, key)) = partition.next_key() {
        let mut attempts = 0;

        let outcome = if cancel.is_cancelled() {
            FetchOutcome::Cancelled
        } else if partition.suspended.load(Ordering::SeqCst) {
            FetchOutcome::SoftFailure {
                reason: format!(
                    "source {} suspended after {} consecutive failures",
                    partition.fetcher.name(),
                    options.max_consecutive_failures
                ),
                retries_exhausted: false,
            }
        } else {
            let finished = tokio::select! {
                biased;
                outcome = run_key(
                    partition.fetcher.as_ref(),
                    &key,
                    &options,
                    partition.interval,
                    &cancel,
                    &mut attempts,
                ) => Some(outcome),
                _ = abandon_after(&cancel, options.cancel_grace) => None,
            };
            finished.unwrap_or(FetchOutcome::Cancelled)
        };

        partition.record(&outcome, options.max_consecutive_failures);

        let report = KeyOutcome {
            index,
            key,
            outcome,
            attempts,
        };
        if tx.send(report).is_err() {
            debug!(country = %partition.country, "outcome receiver dropped, worker stopping");
            return;
        }
    }
}

/// Resolves once cancellation has fired and the grace period has run out.
/// Without a grace period it never resolves: in-flight work finishes.
async fn abandon_after(cancel: &CancellationToken, grace: Option<Duration>) {
    cancel.cancelled().await;
    match grace {
        Some(grace) => tokio::time::sleep(grace).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// OutcomeStream
// ---------------------------------------------------------------------------

/// Outcomes of one dispatch, in completion order.
///
/// Dropping the stream aborts any workers still running.
pub struct OutcomeStream {
    rx: mpsc::UnboundedReceiver<KeyOutcome>,
    keys: Vec<IdentifierKey>,
    _workers: JoinSet<()>,
}

impl OutcomeStream {
    /// Next outcome to complete, or `None` once every worker has stopped.
    /// Outcomes taken here are not seen again by the collecting methods.
    pub async fn next(&mut self) -> Option<KeyOutcome> {
        self.rx.recv().await
    }

    /// Number of keys submitted.
    pub fn total(&self) -> usize {
        self.keys.len()
    }

    /// Drain the stream into submission order.
    pub async fn collect_ordered(self) -> Vec<KeyOutcome> {
        self.collect_ordered_with(|_, _, _| {}).await
    }

    /// Drain the stream, calling `on_outcome(outcome, completed, total)` as
    /// each arrives, then return the outcomes in submission order.
    ///
    /// Keys whose worker died before reporting are filled in as soft failures
    /// with retries left, so the result always has exactly one entry per
    /// submitted key and those keys stay eligible for a later run.
    pub async fn collect_ordered_with(
        mut self,
        mut on_outcome: impl FnMut(&KeyOutcome, usize, usize),
    ) -> Vec<KeyOutcome> {
        let total = self.total();
        let mut slots: Vec<Option<KeyOutcome>> = vec![None; total];
        let mut completed = 0;

        while let Some(outcome) = self.next().await {
            let index = outcome.index;
            if index < total && slots[index].is_none() {
                completed += 1;
                on_outcome(&outcome, completed, total);
                slots[index] = Some(outcome);
            }
        }

        let keys = std::mem::take(&mut self.keys);
        slots
            .into_iter()
            .zip(keys)
            .enumerate()
            .map(|(index, (slot, key))| {
                slot.unwrap_or_else(|| {
                    warn!(%key, "no outcome reported, worker terminated");
                    KeyOutcome {
                        index,
                        key,
                        outcome: FetchOutcome::SoftFailure {
                            reason: "worker terminated without reporting an outcome".into(),
                            retries_exhausted: false,
                        },
                        attempts: 0,
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedFetcher, Step};
    use vendorlens_shared::BackoffConfig;

    fn fr(n: &str) -> IdentifierKey {
        IdentifierKey::new(CountryCode::Fr, n)
    }

    fn dk(n: &str) -> IdentifierKey {
        IdentifierKey::new(CountryCode::Dk, n)
    }

    fn options() -> RunOptions {
        RunOptions {
            retry_limit: 3,
            timeout_per_call: Duration::from_secs(5),
            global_concurrency_cap: 8,
            backoff: BackoffConfig {
                base_ms: 100,
                max_ms: 1_000,
                jitter: 0.0,
            },
            ..RunOptions::default()
        }
    }

    fn orchestrator(fetchers: Vec<Arc<ScriptedFetcher>>) -> Orchestrator {
        let mut builder = SourceRegistry::builder();
        for f in fetchers {
            builder = builder.register(f).unwrap();
        }
        Orchestrator::new(builder.build())
    }

    fn fr_keys(n: usize) -> Vec<IdentifierKey> {
        (0..n).map(|i| fr(&format!("{:09}", 100_000_000 + i))).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn every_key_gets_exactly_one_outcome() {
        let fetcher = Arc::new(
            ScriptedFetcher::new(CountryCode::Fr)
                .script("100000001", [Step::Hard])
                .script("100000002", [Step::Soft("busy")]),
        );
        let orch = orchestrator(vec![fetcher]);

        let mut keys = fr_keys(5);
        keys.push(fr("123")); // fails validation

        let outcomes = orch
            .fetch_all(keys.clone(), &options(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcomes.len(), keys.len());
        for (i, o) in outcomes.iter().enumerate() {
            assert_eq!(o.index, i);
            assert_eq!(o.key, keys[i]);
        }
        assert!(outcomes[0].outcome.is_success());
        assert!(matches!(outcomes[1].outcome, FetchOutcome::HardFailure { .. }));
        assert!(outcomes[2].outcome.is_success());
        assert_eq!(outcomes[2].attempts, 2);
        assert!(matches!(outcomes[5].outcome, FetchOutcome::HardFailure { .. }));
        assert_eq!(outcomes[5].attempts, 0);
    }

    #[tokio::test]
    async fn unsupported_country_fails_before_any_fetch() {
        let fetcher = Arc::new(ScriptedFetcher::new(CountryCode::Fr));
        let orch = orchestrator(vec![fetcher.clone()]);

        let keys = vec![fr("123456789"), IdentifierKey::new(CountryCode::Be, "0403170701")];
        let err = orch
            .dispatch(keys, &options(), CancellationToken::new())
            .err()
            .unwrap();

        assert!(err.is_config());
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn invalid_options_are_rejected() {
        let orch = orchestrator(vec![Arc::new(ScriptedFetcher::new(CountryCode::Fr))]);
        let bad = RunOptions {
            retry_limit: 0,
            ..options()
        };
        assert!(orch.dispatch(fr_keys(1), &bad, CancellationToken::new()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_respects_source_and_global_caps() {
        let source_bound = Arc::new(
            ScriptedFetcher::new(CountryCode::Fr)
                .max_concurrency(2)
                .latency(Duration::from_millis(50)),
        );
        orchestrator(vec![source_bound.clone()])
            .fetch_all(fr_keys(10), &options(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(source_bound.peak_in_flight(), 2);

        let globally_bound = Arc::new(
            ScriptedFetcher::new(CountryCode::Fr)
                .max_concurrency(8)
                .latency(Duration::from_millis(50)),
        );
        let opts = RunOptions {
            global_concurrency_cap: 3,
            ..options()
        };
        orchestrator(vec![globally_bound.clone()])
            .fetch_all(fr_keys(10), &opts, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(globally_bound.peak_in_flight(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn per_source_override_replaces_hint() {
        let fetcher = Arc::new(
            ScriptedFetcher::new(CountryCode::Fr)
                .max_concurrency(8)
                .latency(Duration::from_millis(50)),
        );
        let mut opts = options();
        opts.per_source_caps.insert(CountryCode::Fr, 1);

        orchestrator(vec![fetcher.clone()])
            .fetch_all(fr_keys(4), &opts, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(fetcher.peak_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_does_not_delay_fast_one() {
        let fast = Arc::new(
            ScriptedFetcher::new(CountryCode::Fr).latency(Duration::from_millis(100)),
        );
        let slow = Arc::new(
            ScriptedFetcher::new(CountryCode::Dk)
                .max_concurrency(1)
                .latency(Duration::from_secs(4)),
        );
        let orch = orchestrator(vec![fast, slow]);

        let mut keys = vec![dk("12345678"), dk("87654321")];
        keys.extend(fr_keys(6));

        let start = tokio::time::Instant::now();
        let mut stream = orch
            .dispatch(keys, &options(), CancellationToken::new())
            .unwrap();

        for _ in 0..6 {
            let outcome = stream.next().await.unwrap();
            assert_eq!(outcome.key.country(), CountryCode::Fr);
            assert!(outcome.outcome.is_success());
        }
        assert!(start.elapsed() < Duration::from_secs(1));

        let mut remaining = 0;
        while let Some(outcome) = stream.next().await {
            assert_eq!(outcome.key.country(), CountryCode::Dk);
            remaining += 1;
        }
        assert_eq!(remaining, 2);
        assert!(start.elapsed() >= Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_failures_suspend_source() {
        let fetcher = Arc::new(
            ScriptedFetcher::new(CountryCode::Fr)
                .max_concurrency(1)
                .always_soft(),
        );
        let opts = RunOptions {
            retry_limit: 1,
            max_consecutive_failures: 2,
            ..options()
        };

        let outcomes = orchestrator(vec![fetcher.clone()])
            .fetch_all(fr_keys(5), &opts, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fetcher.calls(), 2);
        for o in &outcomes[..2] {
            assert!(matches!(
                o.outcome,
                FetchOutcome::SoftFailure {
                    retries_exhausted: true,
                    ..
                }
            ));
        }
        for o in &outcomes[2..] {
            assert_eq!(o.attempts, 0);
            match &o.outcome {
                FetchOutcome::SoftFailure {
                    reason,
                    retries_exhausted,
                } => {
                    assert!(!retries_exhausted);
                    assert!(reason.contains("suspended"));
                }
                other => panic!("expected suspension, got {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_without_grace_lets_in_flight_finish() {
        let fetcher = Arc::new(
            ScriptedFetcher::new(CountryCode::Dk)
                .max_concurrency(1)
                .latency(Duration::from_secs(3)),
        );
        let orch = orchestrator(vec![fetcher.clone()]);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let keys = vec![dk("11111111"), dk("22222222"), dk("33333333")];
        let outcomes = orch.fetch_all(keys, &options(), cancel).await.unwrap();

        assert!(outcomes[0].outcome.is_success());
        assert_eq!(outcomes[1].outcome, FetchOutcome::Cancelled);
        assert_eq!(outcomes[2].outcome, FetchOutcome::Cancelled);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_grace_abandons_in_flight_work() {
        let fetcher = Arc::new(
            ScriptedFetcher::new(CountryCode::Dk)
                .max_concurrency(1)
                .latency(Duration::from_secs(3)),
        );
        let orch = orchestrator(vec![fetcher.clone()]);
        let cancel = CancellationToken::new();
        let opts = RunOptions {
            cancel_grace: Some(Duration::from_millis(500)),
            ..options()
        };

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = tokio::time::Instant::now();
        let keys = vec![dk("11111111"), dk("22222222")];
        let outcomes = orch.fetch_all(keys, &opts, cancel).await.unwrap();

        assert_eq!(outcomes[0].outcome, FetchOutcome::Cancelled);
        assert_eq!(outcomes[0].attempts, 1);
        assert_eq!(outcomes[1].outcome, FetchOutcome::Cancelled);
        assert_eq!(outcomes[1].attempts, 0);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn dead_worker_outcomes_are_filled_in() {
        let fetcher = Arc::new(
            ScriptedFetcher::new(CountryCode::Dk)
                .max_concurrency(1)
                .script("11111111", [Step::Panic]),
        );
        let orch = orchestrator(vec![fetcher]);

        let outcomes = orch
            .fetch_all(
                vec![dk("11111111"), dk("22222222")],
                &options(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        for o in &outcomes {
            match &o.outcome {
                FetchOutcome::SoftFailure {
                    reason,
                    retries_exhausted,
                } => {
                    assert!(reason.contains("worker"));
                    assert!(!retries_exhausted);
                }
                other => panic!("expected retryable soft failure, got {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_source_does_not_slow_healthy_one() {
        let healthy_keys = || vec![dk("11111111"), dk("22222222"), dk("33333333")];
        let healthy = || {
            Arc::new(
                ScriptedFetcher::new(CountryCode::Dk)
                    .max_concurrency(1)
                    .latency(Duration::from_millis(200)),
            )
        };
        let opts = RunOptions {
            timeout_per_call: Duration::from_secs(1),
            ..options()
        };

        let start = tokio::time::Instant::now();
        orchestrator(vec![healthy()])
            .fetch_all(healthy_keys(), &opts, CancellationToken::new())
            .await
            .unwrap();
        let alone = start.elapsed();

        let mut hanging = ScriptedFetcher::new(CountryCode::Fr).max_concurrency(2);
        for i in 0..4 {
            hanging = hanging.script(&format!("{:09}", 100_000_000 + i), vec![Step::Hang; 3]);
        }
        let hanging = Arc::new(hanging);
        let mut keys = fr_keys(4);
        keys.extend(healthy_keys());

        let start = tokio::time::Instant::now();
        let mut stream = orchestrator(vec![hanging.clone(), healthy()])
            .dispatch(keys, &opts, CancellationToken::new())
            .unwrap();
        let mut healthy_done = None;
        let mut seen = 0;
        while let Some(outcome) = stream.next().await {
            if outcome.key.country() == CountryCode::Dk {
                seen += 1;
                if seen == 3 {
                    healthy_done = Some(start.elapsed());
                }
            } else {
                assert_eq!(outcome.attempts, 3);
            }
        }

        let healthy_done = healthy_done.unwrap();
        assert!(healthy_done <= alone + Duration::from_millis(1), "{healthy_done:?} vs {alone:?}");
        assert_eq!(hanging.calls(), 12);
        assert!(start.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test]
    async fn outcomes_carry_the_canonical_key() {
        struct Padded(ScriptedFetcher);

        #[async_trait::async_trait]
        impl SourceFetcher for Padded {
            fn country(&self) -> CountryCode {
                self.0.country()
            }
            fn name(&self) -> &str {
                "padded"
            }
            fn canonical_key(&self, key: &IdentifierKey) -> IdentifierKey {
                IdentifierKey::new(key.country(), format!("{:0>8}", key.registry_number()))
            }
            async fn fetch(
                &self,
                key: &IdentifierKey,
                timeout: Duration,
            ) -> vendorlens_sources::FetchResult<vendorlens_shared::EnrichmentResult> {
                self.0.fetch(key, timeout).await
            }
        }

        let inner = ScriptedFetcher::new(CountryCode::Dk);
        let orch = Orchestrator::new(
            SourceRegistry::builder()
                .register(Arc::new(Padded(inner)))
                .unwrap()
                .build(),
        );

        let outcomes = orch
            .fetch_all(vec![dk("012345")], &options(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcomes[0].key, dk("00012345"));
        assert!(outcomes[0].outcome.is_success());
    }

    #[test]
    fn pool_size_bounds() {
        let fetcher = ScriptedFetcher::new(CountryCode::Fr).max_concurrency(4);
        let opts = options();
        assert_eq!(pool_size(&fetcher, &opts, 100), 4);
        assert_eq!(pool_size(&fetcher, &opts, 2), 2);
        assert_eq!(pool_size(&fetcher, &opts, 0), 1);

        let capped = RunOptions {
            global_concurrency_cap: 3,
            ..options()
        };
        assert_eq!(pool_size(&fetcher, &capped, 100), 3);
    }

    #[test]
    fn estimate_counts_waves() {
        let latency = Duration::from_secs(3);
        assert_eq!(estimate_duration(latency, 10, 2), Duration::from_secs(15));
        assert_eq!(estimate_duration(latency, 1, 2), Duration::from_secs(3));
        assert_eq!(estimate_duration(latency, 0, 2), Duration::ZERO);
    }
}
