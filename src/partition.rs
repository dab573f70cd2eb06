//! A single partition of a replicated table.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::entity::{entity_content_equal, TableEntity};

/// Ordered mapping from row key to row for one partition.
///
/// Every row stored here has a `partition_key` equal to the key this store
/// is registered under in its owning [`TableReplica`](crate::TableReplica).
/// Rows are kept behind `Arc` so snapshots handed to observers and readers
/// are cheap clones of immutable values.
pub struct PartitionStore<T> {
    rows: BTreeMap<String, Arc<T>>,
}

impl<T> Default for PartitionStore<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
        }
    }
}

impl<T: TableEntity> PartitionStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a row by its row key.
    pub fn upsert(&mut self, row: Arc<T>) {
        self.rows.insert(row.row_key().to_string(), row);
    }

    /// Remove a row, returning the prior value if it was present.
    pub fn remove(&mut self, row_key: &str) -> Option<Arc<T>> {
        self.rows.remove(row_key)
    }

    pub fn get(&self, row_key: &str) -> Option<Arc<T>> {
        self.rows.get(row_key).cloned()
    }

    /// All rows, ordered by row key.
    pub fn rows(&self) -> impl Iterator<Item = &Arc<T>> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Diff this store (the fresh snapshot) against the prior store.
    ///
    /// Returns `(changed, deleted)` where `changed` holds this store's rows
    /// that are absent from `old` or whose content differs from `old`'s
    /// revision, and `deleted` holds `old`'s rows whose keys are gone from
    /// this store. Content comparison is structural equality of the encoded
    /// rows, so re-sent but unchanged rows produce no notification.
    pub fn diff_against(&self, old: &PartitionStore<T>) -> (Vec<Arc<T>>, Vec<Arc<T>>) {
        let mut changed = Vec::new();
        for (row_key, row) in &self.rows {
            match old.rows.get(row_key) {
                Some(prior) if entity_content_equal(row.as_ref(), prior.as_ref()) => {}
                _ => changed.push(row.clone()),
            }
        }

        let mut deleted = Vec::new();
        for (row_key, row) in &old.rows {
            if !self.rows.contains_key(row_key) {
                deleted.push(row.clone());
            }
        }

        (changed, deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Serialize, Deserialize)]
    struct Row {
        partition_key: String,
        row_key: String,
        value: String,
    }

    impl TableEntity for Row {
        fn partition_key(&self) -> &str {
            &self.partition_key
        }

        fn row_key(&self) -> &str {
            &self.row_key
        }
    }

    fn row(rk: &str, value: &str) -> Arc<Row> {
        Arc::new(Row {
            partition_key: "p1".to_string(),
            row_key: rk.to_string(),
            value: value.to_string(),
        })
    }

    fn store(rows: &[(&str, &str)]) -> PartitionStore<Row> {
        let mut store = PartitionStore::new();
        for (rk, value) in rows {
            store.upsert(row(rk, value));
        }
        store
    }

    #[test]
    fn test_upsert_overwrites_by_row_key() {
        let mut store = store(&[("r1", "old")]);
        store.upsert(row("r1", "new"));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("r1").unwrap().value, "new");
    }

    #[test]
    fn test_remove_returns_prior_value() {
        let mut store = store(&[("r1", "a")]);

        let removed = store.remove("r1").unwrap();
        assert_eq!(removed.value, "a");
        assert!(store.remove("r1").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_rows_are_ordered_by_row_key() {
        let store = store(&[("r3", "c"), ("r1", "a"), ("r2", "b")]);
        let keys: Vec<&str> = store.rows().map(|r| r.row_key()).collect();
        assert_eq!(keys, vec!["r1", "r2", "r3"]);
    }

    #[test]
    fn test_diff_reports_new_and_modified_rows_as_changed() {
        let old = store(&[("r1", "a"), ("r2", "b")]);
        let new = store(&[("r1", "a2"), ("r2", "b"), ("r3", "c")]);

        let (changed, deleted) = new.diff_against(&old);
        let changed_keys: Vec<&str> = changed.iter().map(|r| r.row_key()).collect();
        assert_eq!(changed_keys, vec!["r1", "r3"]);
        assert!(deleted.is_empty());
    }

    #[test]
    fn test_diff_reports_vanished_rows_as_deleted() {
        let old = store(&[("r1", "a"), ("r2", "b")]);
        let new = store(&[("r2", "b")]);

        let (changed, deleted) = new.diff_against(&old);
        assert!(changed.is_empty());
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].row_key(), "r1");
    }

    #[test]
    fn test_diff_of_identical_stores_is_empty() {
        let old = store(&[("r1", "a"), ("r2", "b")]);
        let new = store(&[("r1", "a"), ("r2", "b")]);

        let (changed, deleted) = new.diff_against(&old);
        assert!(changed.is_empty());
        assert!(deleted.is_empty());
    }
}
