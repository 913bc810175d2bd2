//! Dataset statistics and integrity checks.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use vendorlens_shared::{CountryCode, DatasetRow, IdentifierKey};

/// Row counts and column fill rates.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatasetStats {
    pub total_rows: usize,
    pub per_country: BTreeMap<CountryCode, usize>,
    /// Rows with name, activity code and description all present.
    pub enriched_rows: usize,
    pub l1_filled: usize,
    pub l2_filled: usize,
    pub l3_filled: usize,
}

impl DatasetStats {
    pub fn from_rows(rows: &[DatasetRow]) -> Self {
        let mut stats = Self {
            total_rows: rows.len(),
            ..Self::default()
        };
        for row in rows {
            *stats.per_country.entry(row.key.country()).or_default() += 1;
            if is_enriched(row) {
                stats.enriched_rows += 1;
            }
            let c = &row.classification;
            stats.l1_filled += usize::from(filled(&c.l1));
            stats.l2_filled += usize::from(filled(&c.l2));
            stats.l3_filled += usize::from(filled(&c.l3));
        }
        stats
    }

    /// Percentage of rows with `count` filled, 0 for an empty dataset.
    pub fn fill_rate(&self, count: usize) -> f64 {
        if self.total_rows == 0 {
            0.0
        } else {
            count as f64 * 100.0 / self.total_rows as f64
        }
    }
}

/// Problems found in a set of rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub duplicate_keys: Vec<IdentifierKey>,
    /// Rows missing at least one enrichable column.
    pub incomplete_rows: Vec<IdentifierKey>,
    /// Registry numbers that are not digits once `.` and spaces are removed.
    pub invalid_registry_numbers: Vec<IdentifierKey>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.duplicate_keys.is_empty() && self.invalid_registry_numbers.is_empty()
    }
}

/// Check raw rows (e.g. straight from a file) before they are indexed.
pub fn integrity_report(rows: &[DatasetRow]) -> IntegrityReport {
    let mut seen = HashSet::new();
    let mut report = IntegrityReport::default();

    for row in rows {
        if !seen.insert(&row.key) && !report.duplicate_keys.contains(&row.key) {
            report.duplicate_keys.push(row.key.clone());
        }
        if !is_enriched(row) {
            report.incomplete_rows.push(row.key.clone());
        }
        let digits: String = row
            .key
            .registry_number()
            .chars()
            .filter(|c| *c != '.' && !c.is_whitespace())
            .collect();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            report.invalid_registry_numbers.push(row.key.clone());
        }
    }

    report
}

fn filled(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

fn is_enriched(row: &DatasetRow) -> bool {
    filled(&row.company_name) && filled(&row.activity_code) && filled(&row.activity_description)
}
