//! In-process replica of one remote table.
//!
//! A [`TableReplica`] holds the partitioned row cache for a single table
//! and applies the four inbound event kinds: full-table snapshot,
//! partition snapshot, row upserts and row deletions. Snapshot events are
//! reconciled by diffing, so observers only hear about rows whose content
//! actually changed.
//!
//! Structural mutation runs under the write half of an `RwLock`; reads
//! take the shared half and never block each other. Observer callbacks are
//! invoked after the write lock has been released — a reader inside a
//! callback may therefore already see a later state than the one it was
//! notified about. The replica mirrors the server eventually; it does not
//! deliver a linearizable changefeed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::entity::{is_well_formed, TableEntity};
use crate::partition::PartitionStore;

type PartitionMap<T> = BTreeMap<String, PartitionStore<T>>;

/// Observer invoked with the rows of one change or delete notification.
/// Never called with an empty slice.
pub type RowObserver<T> = Arc<dyn Fn(&[Arc<T>]) + Send + Sync>;

/// Local, continuously reconciled mirror of one remote table.
pub struct TableReplica<T> {
    table_name: String,
    partitions: RwLock<PartitionMap<T>>,
    /// Denormalized total row count, refreshed under the write lock after
    /// every mutating operation.
    count: AtomicUsize,
    changed_observers: Mutex<Vec<RowObserver<T>>>,
    deleted_observers: Mutex<Vec<RowObserver<T>>>,
}

impl<T: TableEntity> TableReplica<T> {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            partitions: RwLock::new(BTreeMap::new()),
            count: AtomicUsize::new(0),
            changed_observers: Mutex::new(Vec::new()),
            deleted_observers: Mutex::new(Vec::new()),
        }
    }

    /// The table this replica mirrors.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    // ---------------------------------------------------------------
    // Observers
    // ---------------------------------------------------------------

    /// Register an observer for changed rows.
    ///
    /// Observers are invoked in registration order, outside the replica's
    /// exclusive section, with the minimal set of rows whose content
    /// actually changed.
    pub fn on_changed(&self, observer: impl Fn(&[Arc<T>]) + Send + Sync + 'static) {
        self.changed_observers.lock().unwrap().push(Arc::new(observer));
    }

    /// Register an observer for deleted rows. Receives the last known
    /// value of every row that was actually removed.
    pub fn on_deleted(&self, observer: impl Fn(&[Arc<T>]) + Send + Sync + 'static) {
        self.deleted_observers.lock().unwrap().push(Arc::new(observer));
    }

    // ---------------------------------------------------------------
    // Event application
    // ---------------------------------------------------------------

    /// Replace the entire table content with a fresh snapshot.
    ///
    /// The server ships a full table image on every (re)connect, so this
    /// is the general "reconcile from full image" operation, not just an
    /// initialization path: a brand-new partition map is built from the
    /// snapshot, diffed partition-by-partition against the old map, and
    /// installed. Partitions that vanished entirely count as all-deleted.
    pub fn apply_full_snapshot(&self, rows: Vec<T>) {
        log::info!(
            "[tablelink] applying full snapshot for table '{}' ({} rows)",
            self.table_name,
            rows.len()
        );

        let (changed, deleted) = {
            let mut cache = self.partitions.write().unwrap();
            let old = std::mem::take(&mut *cache);
            for row in rows {
                if !self.admit(&row, "full snapshot") {
                    continue;
                }
                let row = Arc::new(row);
                cache
                    .entry(row.partition_key().to_string())
                    .or_default()
                    .upsert(row);
            }

            let mut changed = Vec::new();
            let mut deleted = Vec::new();
            for (partition_key, fresh) in cache.iter() {
                match old.get(partition_key) {
                    Some(prior) => {
                        let (c, d) = fresh.diff_against(prior);
                        changed.extend(c);
                        deleted.extend(d);
                    }
                    None => changed.extend(fresh.rows().cloned()),
                }
            }
            for (partition_key, prior) in old.iter() {
                if !cache.contains_key(partition_key) {
                    deleted.extend(prior.rows().cloned());
                }
            }

            self.refresh_count(&cache);
            (changed, deleted)
        };

        self.notify_changed(&changed);
        self.notify_deleted(&deleted);
    }

    /// Replace the content of a single partition with a fresh snapshot.
    ///
    /// Only the targeted partition is affected. When no prior store existed
    /// for the key, every snapshot row is reported as changed and nothing
    /// as deleted.
    pub fn apply_partition_snapshot(&self, partition_key: &str, rows: Vec<T>) {
        log::info!(
            "[tablelink] applying partition snapshot for table '{}', partition '{}' ({} rows)",
            self.table_name,
            partition_key,
            rows.len()
        );

        let (changed, deleted) = {
            let mut cache = self.partitions.write().unwrap();

            let mut fresh = PartitionStore::new();
            for row in rows {
                if !self.admit(&row, "partition snapshot") {
                    continue;
                }
                if row.partition_key() != partition_key {
                    log::error!(
                        "[tablelink] partition snapshot for '{}'/'{}' carried a row of partition '{}', dropping it",
                        self.table_name,
                        partition_key,
                        row.partition_key()
                    );
                    continue;
                }
                fresh.upsert(Arc::new(row));
            }

            let diff = match cache.get(partition_key) {
                Some(prior) => fresh.diff_against(prior),
                None => (fresh.rows().cloned().collect(), Vec::new()),
            };

            if fresh.is_empty() {
                cache.remove(partition_key);
            } else {
                cache.insert(partition_key.to_string(), fresh);
            }

            self.refresh_count(&cache);
            diff
        };

        self.notify_changed(&changed);
        self.notify_deleted(&deleted);
    }

    /// Apply a batch of row upserts.
    ///
    /// No diffing happens here: the server only sends rows that actually
    /// changed, so every well-formed row is announced unconditionally.
    pub fn apply_upserts(&self, rows: Vec<T>) {
        let changed = {
            let mut cache = self.partitions.write().unwrap();
            let mut changed = Vec::with_capacity(rows.len());
            for row in rows {
                if !self.admit(&row, "update") {
                    continue;
                }
                let row = Arc::new(row);
                cache
                    .entry(row.partition_key().to_string())
                    .or_default()
                    .upsert(row.clone());
                changed.push(row);
            }
            self.refresh_count(&cache);
            changed
        };

        self.notify_changed(&changed);
    }

    /// Apply a batch of row deletions.
    ///
    /// Keys that are not present are silently ignored. A partition whose
    /// last row is deleted is removed from the table map. Observers are
    /// notified with exactly the rows that were actually removed.
    pub fn apply_deletes(&self, keys: Vec<(String, String)>) {
        let deleted = {
            let mut cache = self.partitions.write().unwrap();
            let mut deleted = Vec::new();
            for (partition_key, row_key) in keys {
                let Some(partition) = cache.get_mut(&partition_key) else {
                    continue;
                };
                if let Some(row) = partition.remove(&row_key) {
                    deleted.push(row);
                }
                if partition.is_empty() {
                    cache.remove(&partition_key);
                }
            }
            self.refresh_count(&cache);
            deleted
        };

        self.notify_deleted(&deleted);
    }

    // ---------------------------------------------------------------
    // Reads (shared section)
    // ---------------------------------------------------------------

    /// Point read of one row.
    pub fn get(&self, partition_key: &str, row_key: &str) -> Option<Arc<T>> {
        let cache = self.partitions.read().unwrap();
        cache.get(partition_key)?.get(row_key)
    }

    /// All rows of one partition, ordered by row key.
    pub fn get_partition(&self, partition_key: &str) -> Vec<Arc<T>> {
        let cache = self.partitions.read().unwrap();
        match cache.get(partition_key) {
            Some(partition) => partition.rows().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Rows of one partition matching a predicate. The predicate runs while
    /// the shared lock is held, so it sees the current state.
    pub fn get_partition_where(
        &self,
        partition_key: &str,
        predicate: impl Fn(&T) -> bool,
    ) -> Vec<Arc<T>> {
        let cache = self.partitions.read().unwrap();
        match cache.get(partition_key) {
            Some(partition) => partition
                .rows()
                .filter(|row| predicate(row))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Page through one partition in row-key order.
    pub fn get_partition_page(&self, partition_key: &str, skip: usize, take: usize) -> Vec<Arc<T>> {
        let cache = self.partitions.read().unwrap();
        match cache.get(partition_key) {
            Some(partition) => partition.rows().skip(skip).take(take).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Page through the predicate-matching rows of one partition.
    /// Filtering happens before paging.
    pub fn get_partition_page_where(
        &self,
        partition_key: &str,
        skip: usize,
        take: usize,
        predicate: impl Fn(&T) -> bool,
    ) -> Vec<Arc<T>> {
        let cache = self.partitions.read().unwrap();
        match cache.get(partition_key) {
            Some(partition) => partition
                .rows()
                .filter(|row| predicate(row))
                .skip(skip)
                .take(take)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Every row of the table, ordered by partition key then row key.
    pub fn get_all(&self) -> Vec<Arc<T>> {
        let cache = self.partitions.read().unwrap();
        cache
            .values()
            .flat_map(|partition| partition.rows().cloned())
            .collect()
    }

    /// Every row matching a predicate.
    pub fn get_all_where(&self, predicate: impl Fn(&T) -> bool) -> Vec<Arc<T>> {
        let cache = self.partitions.read().unwrap();
        cache
            .values()
            .flat_map(|partition| partition.rows())
            .filter(|row| predicate(row))
            .cloned()
            .collect()
    }

    /// Total row count across all partitions.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Row count of one partition; 0 when the partition does not exist.
    pub fn partition_count(&self, partition_key: &str) -> usize {
        let cache = self.partitions.read().unwrap();
        cache.get(partition_key).map_or(0, PartitionStore::len)
    }

    /// Count of predicate-matching rows in one partition.
    pub fn partition_count_where(
        &self,
        partition_key: &str,
        predicate: impl Fn(&T) -> bool,
    ) -> usize {
        let cache = self.partitions.read().unwrap();
        match cache.get(partition_key) {
            Some(partition) => partition.rows().filter(|row| predicate(row)).count(),
            None => 0,
        }
    }

    /// Partition keys currently present, in order.
    pub fn partition_keys(&self) -> Vec<String> {
        let cache = self.partitions.read().unwrap();
        cache.keys().cloned().collect()
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    /// Boundary check for inbound rows: rows without both keys never enter
    /// the store. Dropping one does not abort the rest of the event.
    fn admit(&self, row: &T, operation: &str) -> bool {
        if row.partition_key().is_empty() {
            log::error!(
                "[tablelink] {} for table '{}': dropping row with empty partition key: {}",
                operation,
                self.table_name,
                serde_json::to_string(row).unwrap_or_default()
            );
            return false;
        }
        if row.row_key().is_empty() {
            log::error!(
                "[tablelink] {} for table '{}': dropping row with empty row key: {}",
                operation,
                self.table_name,
                serde_json::to_string(row).unwrap_or_default()
            );
            return false;
        }
        true
    }

    fn refresh_count(&self, cache: &PartitionMap<T>) {
        let total = cache.values().map(PartitionStore::len).sum();
        self.count.store(total, Ordering::Release);
    }

    fn notify_changed(&self, rows: &[Arc<T>]) {
        if rows.is_empty() {
            return;
        }
        let observers = self.changed_observers.lock().unwrap().clone();
        for observer in observers {
            observer(rows);
        }
    }

    fn notify_deleted(&self, rows: &[Arc<T>]) {
        if rows.is_empty() {
            return;
        }
        let observers = self.deleted_observers.lock().unwrap().clone();
        for observer in observers {
            observer(rows);
        }
    }
}
