//! In-memory dataset with JSON persistence.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use vendorlens_shared::{DatasetRow, IdentifierKey, Result, VendorLensError};

use crate::report::{DatasetStats, IntegrityReport, integrity_report};
use crate::{DatasetSnapshot, DatasetStore, RowWrite, WriteOutcome};

/// Rows in insertion order plus a key index.
#[derive(Debug, Default)]
struct Table {
    rows: Vec<DatasetRow>,
    index: HashMap<IdentifierKey, usize>,
}

impl Table {
    fn get(&self, key: &IdentifierKey) -> Option<&DatasetRow> {
        self.index.get(key).map(|&i| &self.rows[i])
    }

    /// Insert or replace, returning the previous row.
    fn put(&mut self, row: DatasetRow) -> Option<DatasetRow> {
        match self.index.get(&row.key) {
            Some(&i) => Some(std::mem::replace(&mut self.rows[i], row)),
            None => {
                self.index.insert(row.key.clone(), self.rows.len());
                self.rows.push(row);
                None
            }
        }
    }
}

/// The vendor dataset, safe to share between the pipeline and other writers.
#[derive(Debug, Default)]
pub struct Dataset {
    table: RwLock<Table>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from existing rows. Duplicate keys are rejected.
    pub fn from_rows(rows: Vec<DatasetRow>) -> Result<Self> {
        let mut table = Table::default();
        for row in rows {
            if table.index.contains_key(&row.key) {
                return Err(VendorLensError::validation(format!(
                    "duplicate key {} in dataset",
                    row.key
                )));
            }
            table.put(row);
        }
        Ok(Self {
            table: RwLock::new(table),
        })
    }

    /// Load a JSON dataset from `path`. A missing file is an empty dataset.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "dataset file missing, starting empty");
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path).map_err(|e| VendorLensError::io(path, e))?;
        let rows: Vec<DatasetRow> = serde_json::from_str(&content).map_err(|e| {
            VendorLensError::parse(format!("invalid dataset {}: {e}", path.display()))
        })?;

        let report = integrity_report(&rows);
        if !report.is_clean() {
            warn!(
                path = %path.display(),
                duplicates = report.duplicate_keys.len(),
                incomplete = report.incomplete_rows.len(),
                invalid = report.invalid_registry_numbers.len(),
                "dataset integrity issues"
            );
        }

        let dataset = Self::from_rows(rows)?;
        info!(path = %path.display(), "dataset loaded");
        Ok(dataset)
    }

    /// Write all rows to `path` as pretty JSON, replacing the file atomically.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| VendorLensError::io(parent, e))?;
        }

        let json = {
            let table = self.table.read().await;
            serde_json::to_string_pretty(&table.rows)
                .map_err(|e| VendorLensError::Dataset(format!("failed to serialize dataset: {e}")))?
        };

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| VendorLensError::io(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| VendorLensError::io(path, e))?;
        Ok(())
    }

    /// All rows in insertion order.
    pub async fn rows(&self) -> Vec<DatasetRow> {
        self.table.read().await.rows.clone()
    }

    pub async fn get(&self, key: &IdentifierKey) -> Option<DatasetRow> {
        self.table.read().await.get(key).cloned()
    }

    /// Unconditional write for processes other than enrichment (e.g.
    /// classification). Returns the previous row.
    pub async fn upsert(&self, row: DatasetRow) -> Option<DatasetRow> {
        self.table.write().await.put(row)
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> DatasetStats {
        DatasetStats::from_rows(&self.table.read().await.rows)
    }

    pub async fn integrity_report(&self) -> IntegrityReport {
        integrity_report(&self.table.read().await.rows)
    }
}

#[async_trait]
impl DatasetStore for Dataset {
    async fn snapshot(&self) -> Result<DatasetSnapshot> {
        let table = self.table.read().await;
        Ok(DatasetSnapshot::new(table.rows.iter().cloned()))
    }

    async fn apply(&self, writes: Vec<RowWrite>) -> Result<Vec<WriteOutcome>> {
        let mut table = self.table.write().await;
        let mut outcomes = Vec::with_capacity(writes.len());

        for write in writes {
            let current = table.get(write.key());
            if current.map(DatasetRow::fingerprint) != write.expected {
                debug!(key = %write.key(), "row changed since snapshot");
                outcomes.push(WriteOutcome::Conflict {
                    current: current.cloned(),
                });
                continue;
            }
            table.put(write.row);
            outcomes.push(WriteOutcome::Applied);
        }

        Ok(outcomes)
    }
}
