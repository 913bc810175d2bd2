//! Scripted fetcher for orchestration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;

use vendorlens_shared::{CountryCode, EnrichmentResult, FetchError, IdentifierKey};
use vendorlens_sources::{FetchResult, SourceFetcher};

/// One scripted response. Once a key's script runs out, it succeeds.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Soft(&'static str),
    Hard,
    /// Never returns; only the timeout ends it.
    Hang,
    Panic,
}

pub(crate) fn result_for(number: &str) -> EnrichmentResult {
    EnrichmentResult {
        company_name: format!("Company {number}"),
        activity_code: "62.01".into(),
        activity_description: "Computer programming".into(),
        source_timestamp: Utc::now(),
    }
}

pub(crate) struct ScriptedFetcher {
    country: CountryCode,
    max_concurrency: usize,
    latency: Duration,
    interval: Duration,
    fail_always: bool,
    results: HashMap<String, EnrichmentResult>,
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<(String, Instant)>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    pub(crate) fn new(country: CountryCode) -> Self {
        Self {
            country,
            max_concurrency: 4,
            latency: Duration::ZERO,
            interval: Duration::ZERO,
            fail_always: false,
            results: HashMap::new(),
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub(crate) fn script(self, number: &str, steps: impl IntoIterator<Item = Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(number.to_string(), steps.into_iter().collect());
        self
    }

    pub(crate) fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Politeness delay hint reported to the orchestrator.
    pub(crate) fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// What a successful fetch of `number` returns instead of [`result_for`].
    pub(crate) fn respond(mut self, number: &str, result: EnrichmentResult) -> Self {
        self.results.insert(number.to_string(), result);
        self
    }

    pub(crate) fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    /// Every call fails softly, whatever the script says.
    pub(crate) fn always_soft(mut self) -> Self {
        self.fail_always = true;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn call_times(&self, number: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == number)
            .map(|(_, t)| *t)
            .collect()
    }

    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight counter even when the call is abandoned.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceFetcher for ScriptedFetcher {
    fn country(&self) -> CountryCode {
        self.country
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    fn base_latency(&self) -> Duration {
        self.latency
    }

    fn min_request_interval(&self) -> Duration {
        self.interval
    }

    async fn fetch(&self, key: &IdentifierKey, _timeout: Duration) -> FetchResult<EnrichmentResult> {
        let number = key.registry_number().to_string();
        self.calls.lock().unwrap().push((number.clone(), Instant::now()));
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&number)
            .and_then(VecDeque::pop_front);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.fail_always {
            return Err(FetchError::soft("scripted outage"));
        }

        match step {
            None => Ok(self
                .results
                .get(&number)
                .cloned()
                .unwrap_or_else(|| result_for(&number))),
            Some(Step::Soft(reason)) => Err(FetchError::soft(reason)),
            Some(Step::Hard) => Err(FetchError::not_found(key)),
            Some(Step::Hang) => std::future::pending().await,
            Some(Step::Panic) => panic!("scripted panic for {key}"),
        }
    }
}
