//! End-to-end `enrich` run: keys → fetch → aggregate → merge → change log.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use uuid::Uuid;

use vendorlens_dataset::DatasetStore;
use vendorlens_shared::{IdentifierKey, Result, RunOptions};
use vendorlens_sources::SourceRegistry;

use crate::aggregator::aggregate;
use crate::changelog::ChangeLog;
use crate::merge::merge;
use crate::orchestrator::{KeyOutcome, Orchestrator};

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called as each key reaches a terminal outcome.
    fn key_completed(&self, outcome: &KeyOutcome, completed: usize, total: usize);
    /// Called when the run completes.
    fn done(&self, log: &ChangeLog);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn key_completed(&self, _outcome: &KeyOutcome, _completed: usize, _total: usize) {}
    fn done(&self, _log: &ChangeLog) {}
}

/// Enriches a dataset from the registered sources.
///
/// Holds no per-run state: concurrent runs against the same dataset are
/// safe, and any overlap between them surfaces as merge conflicts.
pub struct Enricher {
    orchestrator: Orchestrator,
    dataset: Arc<dyn DatasetStore>,
}

impl Enricher {
    pub fn new(registry: SourceRegistry, dataset: Arc<dyn DatasetStore>) -> Self {
        Self {
            orchestrator: Orchestrator::new(registry),
            dataset,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Run to completion with no cancellation and no progress output.
    pub async fn run(&self, keys: Vec<IdentifierKey>, options: &RunOptions) -> Result<ChangeLog> {
        self.run_with(keys, options, CancellationToken::new(), &SilentProgress)
            .await
    }

    /// Fetch every key, then merge the successes into the dataset.
    ///
    /// Configuration problems (unsupported country, invalid options) fail
    /// the run before anything is fetched. Once started, per-key failures
    /// only show up in the returned log. After cancellation the keys that
    /// did complete are still merged.
    #[instrument(skip_all, fields(keys = keys.len()))]
    pub async fn run_with(
        &self,
        keys: Vec<IdentifierKey>,
        options: &RunOptions,
        cancel: CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<ChangeLog> {
        let start = Instant::now();
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        info!(%run_id, keys = keys.len(), "starting enrichment run");

        // --- Phase 1: Fetch ---
        progress.phase("Fetching");
        let stream = self.orchestrator.dispatch(keys, options, cancel)?;
        let outcomes = stream
            .collect_ordered_with(|outcome, completed, total| {
                progress.key_completed(outcome, completed, total)
            })
            .await;

        // --- Phase 2: Aggregate against a fresh snapshot ---
        progress.phase("Comparing with dataset");
        let snapshot = self.dataset.snapshot().await?;
        let changes = aggregate(&snapshot, outcomes);

        // --- Phase 3: Merge ---
        progress.phase("Merging");
        let entries = merge(self.dataset.as_ref(), changes).await?;

        let log = ChangeLog::new(run_id, started_at, entries);
        let summary = log.summary();
        info!(
            %run_id,
            inserted = summary.inserted,
            updated = summary.updated,
            unchanged = summary.unchanged,
            conflicts = summary.conflicts,
            failed = summary.failed(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "enrichment run complete"
        );

        progress.done(&log);
        Ok(log)
    }
}
