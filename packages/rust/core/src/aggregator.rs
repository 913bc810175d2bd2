//! Turns fetch outcomes into proposed dataset changes.
//!
//! Pure: reads a snapshot, writes nothing.
//!
//! An update that would leave the stored row exactly as it is comes out as
//! `Skip(Unchanged)`, not `Update`, so re-running the same keys writes
//! nothing. `ChangeSummary::updated` counts only real changes; a caller
//! wanting every successful fetch on an existing row should add
//! `unchanged` to it.

use vendorlens_dataset::DatasetSnapshot;
use vendorlens_shared::{DatasetRow, FetchOutcome, IdentifierKey, RowFingerprint};

use crate::changelog::{ChangeEntry, ChangeKind, FailKind, SkipReason};
use crate::orchestrator::KeyOutcome;

/// A change for one key, decided against a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedChange {
    pub index: usize,
    pub key: IdentifierKey,
    pub kind: ChangeKind,
    pub before: Option<DatasetRow>,
    /// Row to write; `None` unless `kind` is an insert or update.
    pub after: Option<DatasetRow>,
    /// Fingerprint of `before`, checked again at merge time.
    pub expected: Option<RowFingerprint>,
    pub attempts: u32,
    pub outcome: FetchOutcome,
}

impl ProposedChange {
    /// Failure reason carried by the fetch outcome.
    pub fn reason(&self) -> Option<&str> {
        self.outcome.reason()
    }
}

impl From<ProposedChange> for ChangeEntry {
    fn from(change: ProposedChange) -> Self {
        ChangeEntry {
            index: change.index,
            key: change.key,
            kind: change.kind,
            before: change.before,
            after: change.after,
            attempts: change.attempts,
            outcome: change.outcome,
        }
    }
}

/// Proposed changes in submission order.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    changes: Vec<ProposedChange>,
}

impl ChangeSet {
    pub fn from_changes(mut changes: Vec<ProposedChange>) -> Self {
        changes.sort_by_key(|c| c.index);
        Self { changes }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProposedChange> {
        self.changes.iter()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of changes that will reach the store.
    pub fn writes(&self) -> usize {
        self.changes.iter().filter(|c| c.kind.is_write()).count()
    }
}

impl IntoIterator for ChangeSet {
    type Item = ProposedChange;
    type IntoIter = std::vec::IntoIter<ProposedChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

/// Decide insert, update, skip or fail for every outcome.
///
/// A success for an absent key is an insert with empty classification. A
/// success for a present key replaces only the enrichable columns; if that
/// leaves the row as it was, it is skipped as unchanged.
pub fn aggregate(snapshot: &DatasetSnapshot, outcomes: Vec<KeyOutcome>) -> ChangeSet {
    let changes: Vec<ProposedChange> = outcomes
        .into_iter()
        .map(|o| {
            let before = snapshot.get(&o.key).cloned();
            let expected = before.as_ref().map(DatasetRow::fingerprint);

            let (kind, after) = match (FailKind::from_outcome(&o.outcome), o.outcome.result()) {
                (None, Some(result)) => match &before {
                    None => (
                        ChangeKind::Insert,
                        Some(DatasetRow::from_enrichment(o.key.clone(), result)),
                    ),
                    Some(existing) => {
                        let updated = existing.enriched_with(result);
                        if &updated == existing {
                            (ChangeKind::Skip(SkipReason::Unchanged), None)
                        } else {
                            (ChangeKind::Update, Some(updated))
                        }
                    }
                },
                (Some(fail), _) => (ChangeKind::Fail(fail), None),
                // A success always carries a result.
                (None, None) => (ChangeKind::Fail(FailKind::Hard), None),
            };

            ProposedChange {
                index: o.index,
                key: o.key,
                kind,
                before,
                after,
                expected,
                attempts: o.attempts,
                outcome: o.outcome,
            }
        })
        .collect();

    ChangeSet::from_changes(changes)
}
