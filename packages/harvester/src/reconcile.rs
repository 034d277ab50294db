//! Reconciles a harvested batch against the store.
//!
//! In-batch duplicates collapse by non-empty external identifier before any
//! write, so a tender revisited within one run can never race itself. Records
//! without an identifier always insert; duplicate accumulation for them is an
//! accepted limitation of the source markup.

use std::collections::HashMap;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::storage::TenderStore;
use crate::types::TenderRecord;

/// Write tallies for one reconciled batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Collapses duplicate external identifiers, last record wins. The survivor
/// keeps the first occurrence's position so on-page order is preserved.
pub fn dedup_batch(batch: Vec<TenderRecord>) -> Vec<TenderRecord> {
    let mut collapsed: Vec<TenderRecord> = Vec::with_capacity(batch.len());
    let mut position_by_id: HashMap<String, usize> = HashMap::new();

    for record in batch {
        if record.external_id.is_empty() {
            collapsed.push(record);
            continue;
        }
        match position_by_id.get(&record.external_id) {
            Some(&position) => collapsed[position] = record,
            None => {
                position_by_id.insert(record.external_id.clone(), collapsed.len());
                collapsed.push(record);
            }
        }
    }
    collapsed
}

/// One sequential pass: dedup, partition against the store's known
/// identifiers, then insert or update each record. A failed write is counted
/// and the pass continues; only the identifier snapshot itself is fatal.
pub async fn reconcile<S: TenderStore>(
    store: &S,
    batch: Vec<TenderRecord>,
) -> Result<ReconcileOutcome, StoreError> {
    let batch = dedup_batch(batch);
    let existing = store.existing_external_ids().await?;

    let mut outcome = ReconcileOutcome::default();
    for record in &batch {
        let is_update =
            !record.external_id.is_empty() && existing.contains(&record.external_id);
        let result = if is_update {
            store.update_by_external_id(record).await
        } else {
            store.insert(record).await
        };
        match result {
            Ok(()) if is_update => outcome.updated += 1,
            Ok(()) => outcome.inserted += 1,
            Err(error) => {
                warn!(
                    external_id = %record.external_id,
                    region = %record.region_code,
                    %error,
                    "store write failed, record dropped"
                );
                outcome.failed += 1;
            }
        }
    }

    info!(
        inserted = outcome.inserted,
        updated = outcome.updated,
        failed = outcome.failed,
        "batch reconciled"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_record, MemoryTenderStore};

    #[test]
    fn test_dedup_last_record_wins_keeping_position() {
        let batch = vec![
            sample_record("A", "first"),
            sample_record("B", "other"),
            sample_record("A", "second"),
        ];
        let collapsed = dedup_batch(batch);
        assert_eq!(collapsed.len(), 2);
        assert_eq!(collapsed[0].external_id, "A");
        assert_eq!(collapsed[0].title, "second");
        assert_eq!(collapsed[1].external_id, "B");
    }

    #[test]
    fn test_dedup_keeps_every_identifierless_record() {
        let batch = vec![
            sample_record("", "one"),
            sample_record("", "two"),
            sample_record("", "three"),
        ];
        assert_eq!(dedup_batch(batch).len(), 3);
    }

    #[tokio::test]
    async fn test_reconcile_partitions_inserts_and_updates() {
        let store = MemoryTenderStore::new();
        store.insert(&sample_record("A", "stored")).await.unwrap();

        let outcome = reconcile(
            &store,
            vec![sample_record("A", "fresher"), sample_record("B", "new")],
        )
        .await
        .unwrap();

        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.failed, 0);
        let rows = store.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].title, "fresher");
    }

    #[tokio::test]
    async fn test_reconcile_counts_failures_and_continues() {
        let store = MemoryTenderStore::new();
        store.fail_writes_for("C");

        let outcome = reconcile(
            &store,
            vec![
                sample_record("A", "ok"),
                sample_record("C", "doomed"),
                sample_record("D", "also ok"),
            ],
        )
        .await
        .unwrap();

        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(store.row_count(), 2);
    }

    #[tokio::test]
    async fn test_reconcile_twice_is_idempotent_on_row_count() {
        let store = MemoryTenderStore::new();
        let batch = vec![sample_record("A", "um"), sample_record("B", "dois")];

        let first = reconcile(&store, batch.clone()).await.unwrap();
        assert_eq!((first.inserted, first.updated), (2, 0));

        let second = reconcile(&store, batch).await.unwrap();
        assert_eq!((second.inserted, second.updated), (0, 2));
        assert_eq!(store.row_count(), 2);
    }

    #[tokio::test]
    async fn test_reconcile_always_inserts_identifierless_records() {
        let store = MemoryTenderStore::new();
        let batch = vec![sample_record("", "anon")];

        reconcile(&store, batch.clone()).await.unwrap();
        let outcome = reconcile(&store, batch).await.unwrap();
        assert_eq!(outcome.inserted, 1);
        assert_eq!(store.row_count(), 2);
    }
}
