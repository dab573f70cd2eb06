//! The mutation client for one remote table.
//!
//! [`TableWriter`] issues request/response calls against the remote API.
//! It is stateless and concurrent-safe: every call stands alone, and the
//! only retry logic is the optimistic-concurrency loop of
//! [`replace`](TableWriter::replace) / [`merge`](TableWriter::merge),
//! which is local to each call.
//!
//! Malformed entities (missing partition or row key) are rejected before
//! any network round trip. Every other remote failure surfaces as
//! [`TableLinkError::RemoteCall`] carrying the operation name and the
//! server's response body.

use std::marker::PhantomData;

use crate::entity::{validate_entity, TableEntity};
use crate::error::{Result, TableLinkError};
use crate::models::{OperationResult, SyncPeriod};
use crate::timeouts::TableLinkTimeouts;
use crate::transaction::TransactionBuilder;

/// Mutation client for one table.
///
/// # Examples
///
/// ```rust,no_run
/// use serde::{Deserialize, Serialize};
/// use tablelink::{SyncPeriod, TableEntity, TableWriter};
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Price {
///     partition_key: String,
///     row_key: String,
///     bid: f64,
/// }
///
/// impl TableEntity for Price {
///     fn partition_key(&self) -> &str { &self.partition_key }
///     fn row_key(&self) -> &str { &self.row_key }
/// }
///
/// # async fn example() -> tablelink::Result<()> {
/// let writer = TableWriter::<Price>::builder()
///     .base_url("http://localhost:5123")
///     .table_name("prices")
///     .build()?;
///
/// writer.insert_or_replace(&Price {
///     partition_key: "EURUSD".into(),
///     row_key: "spot".into(),
///     bid: 1.0842,
/// })
/// .await?;
///
/// // Optimistic update: refetches and retries on concurrent modification.
/// let result = writer
///     .replace("EURUSD", "spot", |price| {
///         price.bid += 0.0001;
///         true
///     }, SyncPeriod::Default)
///     .await?;
/// println!("replace outcome: {:?}", result);
/// # Ok(())
/// # }
/// ```
pub struct TableWriter<T> {
    base_url: String,
    table_name: String,
    persist: bool,
    sync_period: SyncPeriod,
    max_conflict_retries: Option<u32>,
    http: reqwest::Client,
    _entity: PhantomData<fn() -> T>,
}

impl<T: TableEntity> TableWriter<T> {
    /// Create a new builder for configuring the writer.
    pub fn builder() -> TableWriterBuilder<T> {
        TableWriterBuilder::new()
    }

    /// The table this writer mutates.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    // ---------------------------------------------------------------
    // Table bootstrap
    // ---------------------------------------------------------------

    /// Create the table on the server if it does not exist yet.
    pub async fn create_table_if_not_exists(&self) -> Result<()> {
        let operation = "Tables/CreateIfNotExists";
        let response = self
            .http
            .post(self.url(operation))
            .query(&[
                ("tableName", self.table_name.as_str()),
                ("persist", if self.persist { "1" } else { "0" }),
            ])
            .send()
            .await
            .map_err(|e| call_failed(operation, e))?;
        ensure_success(operation, response).await?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------

    /// Insert a row. Fails remotely if the row already exists.
    pub async fn insert(&self, entity: &T) -> Result<()> {
        validate_entity(entity)?;
        let operation = "Row/Insert";
        let response = self
            .http
            .post(self.url(operation))
            .query(&[
                ("tableName", self.table_name.as_str()),
                ("syncPeriod", self.sync_period.as_str()),
            ])
            .json(entity)
            .send()
            .await
            .map_err(|e| call_failed(operation, e))?;
        ensure_success(operation, response).await?;
        Ok(())
    }

    /// Insert a row or replace the existing one wholesale.
    pub async fn insert_or_replace(&self, entity: &T) -> Result<()> {
        validate_entity(entity)?;
        let operation = "Row/InsertOrReplace";
        let response = self
            .http
            .post(self.url(operation))
            .query(&[
                ("tableName", self.table_name.as_str()),
                ("syncPeriod", self.sync_period.as_str()),
            ])
            .json(entity)
            .send()
            .await
            .map_err(|e| call_failed(operation, e))?;
        ensure_success(operation, response).await?;
        Ok(())
    }

    /// Insert-or-replace a batch of rows in one call.
    ///
    /// Every row is validated locally first; a single malformed row fails
    /// the whole call without any network round trip.
    pub async fn bulk_insert_or_replace(
        &self,
        entities: &[T],
        sync_period: SyncPeriod,
    ) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        for entity in entities {
            validate_entity(entity)?;
        }

        let operation = "Bulk/InsertOrReplace";
        let response = self
            .http
            .post(self.url(operation))
            .query(&[
                ("tableName", self.table_name.as_str()),
                ("syncPeriod", self.resolve_period(sync_period).as_str()),
            ])
            .json(entities)
            .send()
            .await
            .map_err(|e| call_failed(operation, e))?;
        ensure_success(operation, response).await?;
        Ok(())
    }

    /// Replace the entire table content with the given rows.
    pub async fn clean_and_bulk_insert(&self, entities: &[T], sync_period: SyncPeriod) -> Result<()> {
        for entity in entities {
            validate_entity(entity)?;
        }

        let operation = "Bulk/CleanAndBulkInsert";
        let response = self
            .http
            .post(self.url(operation))
            .query(&[
                ("tableName", self.table_name.as_str()),
                ("syncPeriod", self.resolve_period(sync_period).as_str()),
            ])
            .json(entities)
            .send()
            .await
            .map_err(|e| call_failed(operation, e))?;
        ensure_success(operation, response).await?;
        Ok(())
    }

    /// Replace the content of one partition with the given rows.
    pub async fn clean_and_bulk_insert_partition(
        &self,
        partition_key: &str,
        entities: &[T],
        sync_period: SyncPeriod,
    ) -> Result<()> {
        for entity in entities {
            validate_entity(entity)?;
        }

        let operation = "Bulk/CleanAndBulkInsert";
        let response = self
            .http
            .post(self.url(operation))
            .query(&[
                ("tableName", self.table_name.as_str()),
                ("partitionKey", partition_key),
                ("syncPeriod", self.resolve_period(sync_period).as_str()),
            ])
            .json(entities)
            .send()
            .await
            .map_err(|e| call_failed(operation, e))?;
        ensure_success(operation, response).await?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Conditional writes
    // ---------------------------------------------------------------

    /// Optimistically replace one row.
    ///
    /// Fetches the current row, hands it to `mutate`, and pushes the
    /// mutated row back with a conditional write. When the server reports
    /// the row changed concurrently, the loop refetches and retries.
    /// `mutate` returning `false` aborts without writing.
    ///
    /// Retries are unbounded under contention unless
    /// [`max_conflict_retries`](TableWriterBuilder::max_conflict_retries)
    /// was configured; with a cap, the last
    /// [`OperationResult::RecordChangedConcurrently`] is returned once the
    /// cap is exhausted.
    pub async fn replace(
        &self,
        partition_key: &str,
        row_key: &str,
        mutate: impl FnMut(&mut T) -> bool,
        sync_period: SyncPeriod,
    ) -> Result<OperationResult> {
        self.conditional_update(partition_key, row_key, "Replace", mutate, sync_period)
            .await
    }

    /// Optimistically merge one row: same loop as
    /// [`replace`](TableWriter::replace), but the server merges the pushed
    /// fields into the stored row instead of replacing it wholesale.
    pub async fn merge(
        &self,
        partition_key: &str,
        row_key: &str,
        mutate: impl FnMut(&mut T) -> bool,
        sync_period: SyncPeriod,
    ) -> Result<OperationResult> {
        self.conditional_update(partition_key, row_key, "Merge", mutate, sync_period)
            .await
    }

    async fn conditional_update(
        &self,
        partition_key: &str,
        row_key: &str,
        method: &str,
        mutate: impl FnMut(&mut T) -> bool,
        sync_period: SyncPeriod,
    ) -> Result<OperationResult> {
        let store = RowConditionalStore {
            writer: self,
            partition_key,
            row_key,
            method,
            sync_period: self.resolve_period(sync_period),
        };
        run_conditional_update(&store, mutate, self.max_conflict_retries).await
    }

    async fn push_conditional(
        &self,
        entity: &T,
        method: &str,
        sync_period: SyncPeriod,
    ) -> Result<OperationResult> {
        let operation = format!("Row/{}", method);
        let response = self
            .http
            .put(self.url(&operation))
            .query(&[
                ("tableName", self.table_name.as_str()),
                ("syncPeriod", sync_period.as_str()),
            ])
            .json(entity)
            .send()
            .await
            .map_err(|e| call_failed(&operation, e))?;
        conditional_outcome(&operation, response).await
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    /// Read the whole table.
    pub async fn get_all(&self) -> Result<Vec<T>> {
        let operation = "Row";
        let response = self
            .http
            .get(self.url(operation))
            .query(&[("tableName", self.table_name.as_str())])
            .send()
            .await
            .map_err(|e| call_failed(operation, e))?;
        read_json(operation, ensure_success(operation, response).await?).await
    }

    /// Read one partition.
    pub async fn get_partition(&self, partition_key: &str) -> Result<Vec<T>> {
        let operation = "Row";
        let response = self
            .http
            .get(self.url(operation))
            .query(&[
                ("tableName", self.table_name.as_str()),
                ("partitionKey", partition_key),
            ])
            .send()
            .await
            .map_err(|e| call_failed(operation, e))?;
        read_json(operation, ensure_success(operation, response).await?).await
    }

    /// Point read of one row. `None` when the row does not exist.
    pub async fn get(&self, partition_key: &str, row_key: &str) -> Result<Option<T>> {
        let operation = "Row";
        let response = self
            .http
            .get(self.url(operation))
            .query(&[
                ("tableName", self.table_name.as_str()),
                ("partitionKey", partition_key),
                ("rowKey", row_key),
            ])
            .send()
            .await
            .map_err(|e| call_failed(operation, e))?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = ensure_success(operation, response).await?;
        Ok(Some(read_json(operation, response).await?))
    }

    /// Read several rows of one partition by their row keys.
    pub async fn get_rows(&self, partition_key: &str, row_keys: &[String]) -> Result<Vec<T>> {
        let operation = "Rows/SinglePartitionMultipleRows";
        let response = self
            .http
            .post(self.url(operation))
            .query(&[
                ("tableName", self.table_name.as_str()),
                ("partitionKey", partition_key),
            ])
            .json(row_keys)
            .send()
            .await
            .map_err(|e| call_failed(operation, e))?;

        if response.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        read_json(operation, ensure_success(operation, response).await?).await
    }

    /// Range read: the row at `row_key_from` (or the highest row below it)
    /// and up to `max_amount - 1` rows below that.
    pub async fn get_highest_row_and_below(
        &self,
        partition_key: &str,
        row_key_from: &str,
        max_amount: usize,
    ) -> Result<Vec<T>> {
        let operation = "Rows/HighestRowAndBelow";
        let response = self
            .http
            .get(self.url(operation))
            .query(&[
                ("tableName", self.table_name.as_str()),
                ("partitionKey", partition_key),
                ("rowKey", row_key_from),
            ])
            .query(&[("maxAmount", max_amount)])
            .send()
            .await
            .map_err(|e| call_failed(operation, e))?;
        read_json(operation, ensure_success(operation, response).await?).await
    }

    /// Free-text query against the table.
    pub async fn query(&self, query: &str) -> Result<Vec<T>> {
        let operation = "Query";
        let response = self
            .http
            .get(self.url(operation))
            .query(&[
                ("tableName", self.table_name.as_str()),
                ("query", query),
            ])
            .send()
            .await
            .map_err(|e| call_failed(operation, e))?;
        read_json(operation, ensure_success(operation, response).await?).await
    }

    /// Row count of one partition.
    pub async fn get_count(&self, partition_key: &str) -> Result<usize> {
        let operation = "Count";
        let response = self
            .http
            .get(self.url(operation))
            .query(&[
                ("tableName", self.table_name.as_str()),
                ("partitionKey", partition_key),
            ])
            .send()
            .await
            .map_err(|e| call_failed(operation, e))?;
        let body = ensure_success(operation, response)
            .await?
            .text()
            .await
            .map_err(|e| call_failed(operation, e))?;
        body.trim().parse().map_err(|_| TableLinkError::RemoteCall {
            operation: operation.to_string(),
            response: format!("unparseable count '{}'", body),
        })
    }

    // ---------------------------------------------------------------
    // Deletes and garbage collection
    // ---------------------------------------------------------------

    /// Delete one row, returning its last value. `None` when the row did
    /// not exist (nothing is deleted in that case).
    pub async fn delete(&self, partition_key: &str, row_key: &str) -> Result<Option<T>> {
        let Some(existing) = self.get(partition_key, row_key).await? else {
            return Ok(None);
        };

        let operation = "Row";
        let response = self
            .http
            .delete(self.url(operation))
            .query(&[
                ("tableName", self.table_name.as_str()),
                ("partitionKey", partition_key),
                ("rowKey", row_key),
                ("syncPeriod", self.sync_period.as_str()),
            ])
            .send()
            .await
            .map_err(|e| call_failed(operation, e))?;
        ensure_success(operation, response).await?;
        Ok(Some(existing))
    }

    /// Keep at most `max_amount` partitions in the table; the server drops
    /// the rest.
    pub async fn clean_and_keep_max_partitions(&self, max_amount: usize) -> Result<()> {
        let operation = "GarbageCollector/CleanAndKeepMaxPartitions";
        let response = self
            .http
            .post(self.url(operation))
            .query(&[("tableName", self.table_name.as_str())])
            .query(&[("maxAmount", max_amount)])
            .send()
            .await
            .map_err(|e| call_failed(operation, e))?;
        ensure_success(operation, response).await?;
        Ok(())
    }

    /// Keep at most `max_amount` rows in one partition; the server drops
    /// the lowest row keys beyond that.
    pub async fn clean_and_keep_max_records(
        &self,
        partition_key: &str,
        max_amount: usize,
    ) -> Result<()> {
        let operation = "GarbageCollector/CleanAndKeepMaxRecords";
        let response = self
            .http
            .post(self.url(operation))
            .query(&[
                ("tableName", self.table_name.as_str()),
                ("partitionKey", partition_key),
            ])
            .query(&[("maxAmount", max_amount)])
            .send()
            .await
            .map_err(|e| call_failed(operation, e))?;
        ensure_success(operation, response).await?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Transactions
    // ---------------------------------------------------------------

    /// Start a multi-statement transaction. Statements are applied
    /// server-side when the builder is committed.
    pub async fn begin_transaction(&self) -> Result<TransactionBuilder<T>> {
        let operation = "Transaction/Start";
        let response = self
            .http
            .post(self.url(operation))
            .send()
            .await
            .map_err(|e| call_failed(operation, e))?;
        let started: crate::models::StartTransactionResponse =
            read_json(operation, ensure_success(operation, response).await?).await?;

        Ok(TransactionBuilder::new(
            self.http.clone(),
            self.base_url.clone(),
            self.table_name.clone(),
            started.transaction_id,
        ))
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn resolve_period(&self, period: SyncPeriod) -> SyncPeriod {
        period.or_default(self.sync_period)
    }
}

pub(crate) fn call_failed(operation: &str, err: reqwest::Error) -> TableLinkError {
    TableLinkError::RemoteCall {
        operation: operation.to_string(),
        response: err.to_string(),
    }
}

pub(crate) async fn ensure_success(
    operation: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    log::warn!(
        "[tablelink] {} failed: status={} response={}",
        operation,
        status,
        body
    );
    Err(TableLinkError::RemoteCall {
        operation: operation.to_string(),
        response: format!("{}: {}", status, body),
    })
}

async fn read_json<R: serde::de::DeserializeOwned>(
    operation: &str,
    response: reqwest::Response,
) -> Result<R> {
    response.json().await.map_err(|e| call_failed(operation, e))
}

/// Map a conditional write response to an [`OperationResult`].
///
/// `409 Conflict` responses carry a numeric result code in the body.
async fn conditional_outcome(
    operation: &str,
    response: reqwest::Response,
) -> Result<OperationResult> {
    let status = response.status();
    match status.as_u16() {
        code if (200..300).contains(&code) => Ok(OperationResult::Ok),
        404 => Ok(OperationResult::RecordNotFound),
        409 => {
            let body = response.text().await.unwrap_or_default();
            body.trim()
                .parse::<i32>()
                .ok()
                .and_then(OperationResult::from_code)
                .ok_or_else(|| TableLinkError::RemoteCall {
                    operation: operation.to_string(),
                    response: format!("unknown conflict code '{}'", body),
                })
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(TableLinkError::RemoteCall {
                operation: operation.to_string(),
                response: format!("{}: {}", status, body),
            })
        }
    }
}

// ---------------------------------------------------------------
// Optimistic-concurrency loop
// ---------------------------------------------------------------

/// The remote endpoints the optimistic loop talks to. Factored out of
/// [`TableWriter`] so the loop's fetch/push cadence is testable without a
/// server.
pub(crate) trait ConditionalStore<T> {
    async fn fetch(&self) -> Result<Option<T>>;
    async fn push(&self, entity: &T) -> Result<OperationResult>;
}

struct RowConditionalStore<'a, T> {
    writer: &'a TableWriter<T>,
    partition_key: &'a str,
    row_key: &'a str,
    method: &'a str,
    sync_period: SyncPeriod,
}

impl<T: TableEntity> ConditionalStore<T> for RowConditionalStore<'_, T> {
    async fn fetch(&self) -> Result<Option<T>> {
        self.writer.get(self.partition_key, self.row_key).await
    }

    async fn push(&self, entity: &T) -> Result<OperationResult> {
        self.writer
            .push_conditional(entity, self.method, self.sync_period)
            .await
    }
}

/// Fetch–mutate–push loop with retry on concurrent modification.
///
/// Each attempt is two sequential round trips: a fresh read, then a
/// conditional write. The loop repeats only on
/// [`OperationResult::RecordChangedConcurrently`]; with a retry cap, the
/// conflict result itself is returned once the cap is exhausted, so the
/// caller always sees one of the four documented outcomes.
pub(crate) async fn run_conditional_update<T, S: ConditionalStore<T>>(
    store: &S,
    mut mutate: impl FnMut(&mut T) -> bool,
    max_conflict_retries: Option<u32>,
) -> Result<OperationResult> {
    let mut conflicts = 0u32;
    loop {
        let Some(mut entity) = store.fetch().await? else {
            return Ok(OperationResult::RecordNotFound);
        };

        if !mutate(&mut entity) {
            return Ok(OperationResult::Canceled);
        }

        let result = store.push(&entity).await?;
        if result != OperationResult::RecordChangedConcurrently {
            return Ok(result);
        }

        conflicts += 1;
        if let Some(max) = max_conflict_retries {
            if conflicts > max {
                log::warn!(
                    "[tablelink] conditional update still conflicting after {} attempt(s), giving up",
                    conflicts
                );
                return Ok(result);
            }
        }
        log::debug!(
            "[tablelink] conditional update conflicted (attempt {}), refetching",
            conflicts
        );
    }
}

/// Builder for [`TableWriter`].
pub struct TableWriterBuilder<T> {
    base_url: Option<String>,
    table_name: Option<String>,
    persist: bool,
    sync_period: SyncPeriod,
    timeouts: TableLinkTimeouts,
    max_conflict_retries: Option<u32>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: TableEntity> TableWriterBuilder<T> {
    fn new() -> Self {
        Self {
            base_url: None,
            table_name: None,
            persist: true,
            sync_period: SyncPeriod::Sec5,
            timeouts: TableLinkTimeouts::default(),
            max_conflict_retries: None,
            _entity: PhantomData,
        }
    }

    /// Set the mutation API base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the table to mutate. Stored lower-cased.
    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = Some(name.into());
        self
    }

    /// Whether the server should persist the table to durable storage.
    /// Default: true.
    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    /// The sync period used when a call passes [`SyncPeriod::Default`].
    /// Default: [`SyncPeriod::Sec5`].
    pub fn sync_period(mut self, period: SyncPeriod) -> Self {
        self.sync_period = period;
        self
    }

    /// Set the timeout configuration for HTTP calls.
    pub fn timeouts(mut self, timeouts: TableLinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Cap the number of conflict retries of `replace` / `merge`.
    ///
    /// Default: no cap — the loop refetches and retries for as long as the
    /// server keeps reporting concurrent modification. Callers under
    /// sustained contention should set a bound.
    pub fn max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = Some(retries);
        self
    }

    /// Build the writer.
    pub fn build(self) -> Result<TableWriter<T>> {
        let base_url = self
            .base_url
            .ok_or_else(|| TableLinkError::Configuration("base_url is required".into()))?;
        let table_name = self
            .table_name
            .ok_or_else(|| TableLinkError::Configuration("table_name is required".into()))?;

        let http = reqwest::Client::builder()
            .timeout(self.timeouts.request_timeout)
            .connect_timeout(self.timeouts.connection_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .build()
            .map_err(|e| TableLinkError::Configuration(e.to_string()))?;

        let sync_period = self.sync_period.or_default(SyncPeriod::Sec5);
        Ok(TableWriter {
            base_url: base_url.trim_end_matches('/').to_string(),
            table_name: table_name.to_lowercase(),
            persist: self.persist,
            sync_period,
            max_conflict_retries: self.max_conflict_retries,
            http,
            _entity: PhantomData,
        })
    }
}
