//! Enrichment orchestration for VendorLens.
//!
//! This crate ties together the source fetchers and the dataset store into
//! one run: dispatch keys per source, retry with backoff, aggregate the
//! outcomes against a snapshot, and merge the result (see [`Enricher`]).

pub mod aggregator;
pub mod changelog;
pub mod merge;
pub mod orchestrator;
pub mod pipeline;
pub mod retry;

#[cfg(test)]
mod test_support;

pub use aggregator::{ChangeSet, ProposedChange, aggregate};
pub use changelog::{
    ChangeEntry, ChangeKind, ChangeLog, ChangeSummary, CountrySummary, FailKind, SkipReason,
};
pub use merge::merge;
pub use orchestrator::{KeyOutcome, Orchestrator, OutcomeStream};
pub use pipeline::{Enricher, ProgressReporter, SilentProgress};
pub use retry::{KeyState, backoff_delay};
