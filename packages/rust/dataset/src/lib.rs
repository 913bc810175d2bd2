//! Vendor dataset storage.
//!
//! The [`DatasetStore`] trait is the only surface the enrichment pipeline
//! writes through: it hands out a point-in-time [`DatasetSnapshot`] and
//! applies [`RowWrite`]s with a per-row compare-and-swap on the row
//! fingerprint. [`Dataset`] is the in-memory implementation, persisted as a
//! JSON array of rows.
//!
//! **Access rules:**
//! - Enrichment: only through [`DatasetStore::apply`], never touching classification
//! - Classification process: [`Dataset::upsert`], owns the `l1`/`l2`/`l3` columns

mod memory;
mod report;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use vendorlens_shared::{DatasetRow, IdentifierKey, Result, RowFingerprint};

pub use memory::Dataset;
pub use report::{DatasetStats, IntegrityReport, integrity_report};

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Storage the merge step writes through.
#[async_trait]
pub trait DatasetStore: Send + Sync {
    /// Consistent copy of every row as of now.
    async fn snapshot(&self) -> Result<DatasetSnapshot>;

    /// Apply `writes` in order. Each write lands only if the row's current
    /// fingerprint still equals `expected`; the result has one entry per write.
    async fn apply(&self, writes: Vec<RowWrite>) -> Result<Vec<WriteOutcome>>;
}

/// Point-in-time view used to decide inserts and updates.
#[derive(Debug, Clone, Default)]
pub struct DatasetSnapshot {
    rows: HashMap<IdentifierKey, DatasetRow>,
}

impl DatasetSnapshot {
    pub fn new(rows: impl IntoIterator<Item = DatasetRow>) -> Self {
        Self {
            rows: rows.into_iter().map(|r| (r.key.clone(), r)).collect(),
        }
    }

    pub fn get(&self, key: &IdentifierKey) -> Option<&DatasetRow> {
        self.rows.get(key)
    }

    pub fn fingerprint(&self, key: &IdentifierKey) -> Option<RowFingerprint> {
        self.rows.get(key).map(DatasetRow::fingerprint)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One conditional row write.
#[derive(Debug, Clone)]
pub struct RowWrite {
    pub row: DatasetRow,
    /// Fingerprint the row must still have; `None` means it must not exist.
    pub expected: Option<RowFingerprint>,
}

impl RowWrite {
    pub fn key(&self) -> &IdentifierKey {
        &self.row.key
    }
}

/// What happened to one [`RowWrite`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WriteOutcome {
    Applied,
    /// The row changed since the snapshot; `current` is what is stored now.
    Conflict { current: Option<DatasetRow> },
}
