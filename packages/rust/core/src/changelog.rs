//! The per-run record of what happened to every submitted key.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vendorlens_shared::{
    CountryCode, DatasetRow, FetchOutcome, IdentifierKey, Result, VendorLensError,
};

/// What the run did with one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Skip(SkipReason),
    Fail(FailKind),
}

impl ChangeKind {
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Insert | Self::Update)
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Skip(SkipReason::Unchanged) => "unchanged",
            Self::Skip(SkipReason::Conflict { .. }) => "conflict",
            Self::Fail(FailKind::Hard) => "failed",
            Self::Fail(FailKind::SoftExhausted) => "exhausted",
            Self::Fail(FailKind::Suspended) => "suspended",
            Self::Fail(FailKind::Cancelled) => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The fetched values equal what is already stored.
    Unchanged,
    /// The row changed between snapshot and merge; the fetched values were dropped.
    Conflict { detail: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailKind {
    Hard,
    SoftExhausted,
    /// Not attempted to completion but still retryable: its source tripped the
    /// consecutive-failure breaker or its worker died.
    Suspended,
    Cancelled,
}

impl FailKind {
    /// `None` for a success.
    pub fn from_outcome(outcome: &FetchOutcome) -> Option<Self> {
        match outcome {
            FetchOutcome::Success(_) => None,
            FetchOutcome::HardFailure { .. } => Some(Self::Hard),
            FetchOutcome::SoftFailure {
                retries_exhausted: true,
                ..
            } => Some(Self::SoftExhausted),
            FetchOutcome::SoftFailure {
                retries_exhausted: false,
                ..
            } => Some(Self::Suspended),
            FetchOutcome::Cancelled => Some(Self::Cancelled),
        }
    }
}

/// One line of the change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEntry {
    /// Position of the key in the submitted list.
    pub index: usize,
    pub key: IdentifierKey,
    #[serde(flatten)]
    pub kind: ChangeKind,
    pub before: Option<DatasetRow>,
    pub after: Option<DatasetRow>,
    pub attempts: u32,
    /// What the source returned, kept even when nothing was written.
    pub outcome: FetchOutcome,
}

impl ChangeEntry {
    pub fn reason(&self) -> Option<&str> {
        self.outcome.reason()
    }
}

// ---------------------------------------------------------------------------
// ChangeLog
// ---------------------------------------------------------------------------

/// Every submitted key's entry, in submission order.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeLog {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    entries: Vec<ChangeEntry>,
}

impl ChangeLog {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>, mut entries: Vec<ChangeEntry>) -> Self {
        entries.sort_by_key(|e| e.index);
        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            entries,
        }
    }

    pub fn entries(&self) -> &[ChangeEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChangeEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn summary(&self) -> ChangeSummary {
        let mut s = ChangeSummary {
            total: self.entries.len(),
            ..ChangeSummary::default()
        };
        for entry in &self.entries {
            let country = s.per_country.entry(entry.key.country()).or_default();
            country.total += 1;
            if entry.outcome.is_success() {
                s.fetched += 1;
                country.fetched += 1;
            } else {
                country.failed += 1;
            }
            match &entry.kind {
                ChangeKind::Insert => s.inserted += 1,
                ChangeKind::Update => s.updated += 1,
                ChangeKind::Skip(SkipReason::Unchanged) => s.unchanged += 1,
                ChangeKind::Skip(SkipReason::Conflict { .. }) => s.conflicts += 1,
                ChangeKind::Fail(FailKind::Hard) => s.hard_failures += 1,
                ChangeKind::Fail(FailKind::SoftExhausted) => s.soft_exhausted += 1,
                ChangeKind::Fail(FailKind::Suspended) => s.suspended += 1,
                ChangeKind::Fail(FailKind::Cancelled) => s.cancelled += 1,
            }
        }
        s
    }

    /// Human-readable audit trail: a header, then one line per key with the
    /// columns that changed or the reason nothing was written.
    pub fn render_audit(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "run {} ({} → {})",
            self.run_id,
            self.started_at.to_rfc3339(),
            self.finished_at.to_rfc3339()
        );
        let summary = self.summary();
        let _ = writeln!(out, "{summary}");
        for (country, c) in &summary.per_country {
            let _ = writeln!(out, "  {country}: {c}");
        }

        for entry in &self.entries {
            let _ = write!(out, "{:<20} {:<10}", entry.key.to_string(), entry.kind.label());
            match &entry.kind {
                ChangeKind::Insert | ChangeKind::Update => {
                    let diffs = column_diffs(entry.before.as_ref(), entry.after.as_ref());
                    let _ = write!(out, " {}", diffs.join("; "));
                }
                ChangeKind::Skip(SkipReason::Conflict { detail }) => {
                    let _ = write!(out, " {detail}");
                }
                ChangeKind::Skip(SkipReason::Unchanged) => {}
                ChangeKind::Fail(_) => {
                    let reason = entry.reason().unwrap_or("-");
                    let _ = write!(out, " {reason} (attempts: {})", entry.attempts);
                }
            }
            out.push('\n');
        }
        out
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| VendorLensError::parse(format!("failed to serialize change log: {e}")))
    }
}

impl IntoIterator for ChangeLog {
    type Item = ChangeEntry;
    type IntoIter = std::vec::IntoIter<ChangeEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a ChangeLog {
    type Item = &'a ChangeEntry;
    type IntoIter = std::slice::Iter<'a, ChangeEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

fn column_diffs(before: Option<&DatasetRow>, after: Option<&DatasetRow>) -> Vec<String> {
    let Some(after) = after else {
        return Vec::new();
    };
    let columns = [
        ("company_name", before.and_then(|b| b.company_name.as_deref()), after.company_name.as_deref()),
        ("activity_code", before.and_then(|b| b.activity_code.as_deref()), after.activity_code.as_deref()),
        (
            "activity_description",
            before.and_then(|b| b.activity_description.as_deref()),
            after.activity_description.as_deref(),
        ),
    ];
    columns
        .into_iter()
        .filter(|(_, old, new)| old != new)
        .map(|(name, old, new)| {
            format!("{name}: {:?} -> {:?}", old.unwrap_or("-"), new.unwrap_or("-"))
        })
        .collect()
}

/// Counts per entry kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub total: usize,
    /// Keys whose source returned a record, whether or not it was written.
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub conflicts: usize,
    pub hard_failures: usize,
    pub soft_exhausted: usize,
    pub suspended: usize,
    pub cancelled: usize,
    pub per_country: BTreeMap<CountryCode, CountrySummary>,
}

impl ChangeSummary {
    /// Percentage of keys fetched successfully, 0 for an empty run.
    pub fn success_rate(&self) -> f64 {
        percent(self.fetched, self.total)
    }

    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn failed(&self) -> usize {
        self.hard_failures + self.soft_exhausted + self.suspended + self.cancelled
    }
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} keys: {} inserted, {} updated, {} unchanged, {} conflicts, {} failed \
             ({} not found/invalid, {} exhausted, {} suspended, {} cancelled), \
             {:.1}% fetched",
            self.total,
            self.inserted,
            self.updated,
            self.unchanged,
            self.conflicts,
            self.failed(),
            self.hard_failures,
            self.soft_exhausted,
            self.suspended,
            self.cancelled,
            self.success_rate(),
        )
    }
}

/// Fetch results for one country.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountrySummary {
    pub total: usize,
    pub fetched: usize,
    pub failed: usize,
}

impl CountrySummary {
    pub fn success_rate(&self) -> f64 {
        percent(self.fetched, self.total)
    }
}

impl fmt::Display for CountrySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} keys, {} fetched, {} failed ({:.1}%)",
            self.total,
            self.fetched,
            self.failed,
            self.success_rate()
        )
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}
