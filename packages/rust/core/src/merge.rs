//! Applies a change set to the dataset store.

use tracing::{info, instrument, warn};

use vendorlens_dataset::{DatasetStore, RowWrite, WriteOutcome};
use vendorlens_shared::{DatasetRow, Result, VendorLensError};

use crate::aggregator::{ChangeSet, ProposedChange};
use crate::changelog::{ChangeEntry, ChangeKind, SkipReason};

/// Write every insert and update in one batch and return the entries for
/// the whole change set.
///
/// Each write is conditional on the row still matching its snapshot
/// fingerprint; a row that moved in the meantime keeps its stored values and
/// is logged as a conflict. Classification columns are always carried over
/// from the snapshot row (or left empty for inserts), whatever `after` holds.
#[instrument(skip_all, fields(changes = changes.len(), writes = changes.writes()))]
pub async fn merge(store: &dyn DatasetStore, changes: ChangeSet) -> Result<Vec<ChangeEntry>> {
    let mut pending: Vec<ProposedChange> = Vec::new();
    let mut entries: Vec<ChangeEntry> = Vec::with_capacity(changes.len());
    let mut writes: Vec<RowWrite> = Vec::new();

    for mut change in changes {
        match (change.kind.is_write(), change.after.take()) {
            (true, Some(after)) => {
                let row = protect_columns(change.before.as_ref(), after);
                change.after = Some(row.clone());
                writes.push(RowWrite {
                    row,
                    expected: change.expected.clone(),
                });
                pending.push(change);
            }
            (_, after) => {
                change.after = after;
                entries.push(change.into());
            }
        }
    }

    let outcomes = if writes.is_empty() {
        Vec::new()
    } else {
        store.apply(writes).await?
    };
    if outcomes.len() != pending.len() {
        return Err(VendorLensError::Dataset(format!(
            "store returned {} outcomes for {} writes",
            outcomes.len(),
            pending.len()
        )));
    }

    let mut conflicts = 0;
    for (mut change, outcome) in pending.into_iter().zip(outcomes) {
        if let WriteOutcome::Conflict { current } = outcome {
            conflicts += 1;
            warn!(key = %change.key, "row changed since snapshot, skipping");
            let detail = match (&change.before, current) {
                (None, _) => "row inserted concurrently since snapshot",
                (Some(_), Some(_)) => "row modified concurrently since snapshot",
                (Some(_), None) => "row removed concurrently since snapshot",
            };
            change.kind = ChangeKind::Skip(SkipReason::Conflict {
                detail: detail.into(),
            });
            change.after = None;
        }
        entries.push(change.into());
    }

    entries.sort_by_key(|e| e.index);
    info!(conflicts, "merge complete");
    Ok(entries)
}

/// The enrichment path never writes classification.
fn protect_columns(before: Option<&DatasetRow>, mut after: DatasetRow) -> DatasetRow {
    after.classification = before
        .map(|b| b.classification.clone())
        .unwrap_or_default();
    after
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::aggregator::aggregate;
    use crate::orchestrator::KeyOutcome;
    use vendorlens_dataset::{Dataset, DatasetSnapshot};
    use vendorlens_shared::{Classification, CountryCode, EnrichmentResult, FetchOutcome, IdentifierKey};

    fn key(n: &str) -> IdentifierKey {
        IdentifierKey::new(CountryCode::Fr, n)
    }

    fn success(index: usize, n: &str, name: &str) -> KeyOutcome {
        KeyOutcome {
            index,
            key: key(n),
            outcome: FetchOutcome::Success(EnrichmentResult {
                company_name: name.into(),
                activity_code: "62.01".into(),
                activity_description: "Programming".into(),
                source_timestamp: Utc::now(),
            }),
            attempts: 1,
        }
    }

    fn classified(n: &str, name: &str, l1: &str) -> DatasetRow {
        DatasetRow {
            key: key(n),
            company_name: Some(name.into()),
            activity_code: None,
            activity_description: None,
            classification: Classification {
                l1: Some(l1.into()),
                ..Classification::default()
            },
        }
    }

    /// Lets another writer touch rows right before the batch lands.
    struct RacingStore {
        inner: Arc<Dataset>,
        interloper: DatasetRow,
    }

    #[async_trait]
    impl DatasetStore for RacingStore {
        async fn snapshot(&self) -> Result<DatasetSnapshot> {
            self.inner.snapshot().await
        }

        async fn apply(&self, writes: Vec<RowWrite>) -> Result<Vec<WriteOutcome>> {
            self.inner.upsert(self.interloper.clone()).await;
            self.inner.apply(writes).await
        }
    }

    #[tokio::test]
    async fn writes_land_and_classification_survives() {
        let dataset = Dataset::from_rows(vec![classified("111111111", "Old", "Services")]).unwrap();
        let snapshot = dataset.snapshot().await.unwrap();

        let mut set = aggregate(
            &snapshot,
            vec![success(0, "111111111", "New"), success(1, "222222222", "Fresh")],
        );
        // Even a tampered proposal cannot write classification.
        let mut tampered: Vec<ProposedChange> = set.into_iter().collect();
        if let Some(after) = tampered[0].after.as_mut() {
            after.classification.l1 = Some("Hijacked".into());
        }
        if let Some(after) = tampered[1].after.as_mut() {
            after.classification.l3 = Some("Hijacked".into());
        }
        set = ChangeSet::from_changes(tampered);

        let entries = merge(&dataset, set).await.unwrap();
        assert_eq!(entries[0].kind, ChangeKind::Update);
        assert_eq!(entries[1].kind, ChangeKind::Insert);

        let updated = dataset.get(&key("111111111")).await.unwrap();
        assert_eq!(updated.company_name.as_deref(), Some("New"));
        assert_eq!(updated.classification.l1.as_deref(), Some("Services"));

        let inserted = dataset.get(&key("222222222")).await.unwrap();
        assert!(inserted.classification.is_empty());
    }

    #[tokio::test]
    async fn concurrent_edit_becomes_conflict() {
        let dataset = Arc::new(
            Dataset::from_rows(vec![classified("111111111", "Old", "Services")]).unwrap(),
        );
        let snapshot = dataset.snapshot().await.unwrap();
        let store = RacingStore {
            inner: dataset.clone(),
            interloper: classified("111111111", "Old", "Manufacturing"),
        };

        let set = aggregate(&snapshot, vec![success(0, "111111111", "New")]);
        let entries = merge(&store, set).await.unwrap();

        assert!(matches!(
            &entries[0].kind,
            ChangeKind::Skip(SkipReason::Conflict { detail }) if detail.contains("modified")
        ));
        assert_eq!(entries[0].after, None);
        // The declined value stays in the log.
        assert_eq!(
            entries[0].outcome.result().map(|r| r.company_name.as_str()),
            Some("New")
        );

        let stored = dataset.get(&key("111111111")).await.unwrap();
        assert_eq!(stored.company_name.as_deref(), Some("Old"));
        assert_eq!(stored.classification.l1.as_deref(), Some("Manufacturing"));
    }

    #[tokio::test]
    async fn failures_are_passed_through_without_writes() {
        let dataset = Dataset::new();
        let set = aggregate(
            &DatasetSnapshot::default(),
            vec![KeyOutcome {
                index: 0,
                key: key("999999999"),
                outcome: FetchOutcome::HardFailure {
                    reason: "not found".into(),
                },
                attempts: 1,
            }],
        );

        let entries = merge(&dataset, set).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(dataset.is_empty().await);
    }
}
