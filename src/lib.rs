//! tablelink — client-side replica and mutation client for partitioned
//! NoSQL tables.
//!
//! The read side keeps an in-process mirror of every subscribed table: a
//! [`TableLinkClient`] holds one persistent connection to the server,
//! subscribes to tables on behalf of the application, and feeds each
//! [`TableReplica`] an unordered mixture of full-table snapshots,
//! partition snapshots, row upserts and row deletions. Snapshots are
//! reconciled by diffing, so observers only hear about rows whose content
//! actually changed. The connection reconnects forever; the server
//! re-sends full snapshots after every reconnect and the replicas
//! reconcile against them.
//!
//! The write side is independent: a [`TableWriter`] issues
//! request/response calls against the mutation API, including the
//! optimistic-concurrency [`replace`](TableWriter::replace) /
//! [`merge`](TableWriter::merge) loop that refetches and retries when a
//! row was modified concurrently.
//!
//! # Reading
//!
//! ```rust,no_run
//! use serde::{Deserialize, Serialize};
//! use tablelink::{TableEntity, TableLinkClient};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Price {
//!     partition_key: String,
//!     row_key: String,
//!     bid: f64,
//! }
//!
//! impl TableEntity for Price {
//!     fn partition_key(&self) -> &str { &self.partition_key }
//!     fn row_key(&self) -> &str { &self.row_key }
//! }
//!
//! # async fn example() -> tablelink::Result<()> {
//! let client = TableLinkClient::builder()
//!     .base_url("http://localhost:5125")
//!     .app_name("pricing-service")
//!     .build()?;
//!
//! let prices = client.subscribe::<Price>("prices");
//! prices.on_changed(|rows| {
//!     for row in rows {
//!         println!("{}/{} -> {}", row.partition_key(), row.row_key(), row.bid);
//!     }
//! });
//!
//! client.start().await?;
//! // The replica now mirrors the server for the life of the process.
//! let eurusd = prices.get("EURUSD", "spot");
//! # let _ = eurusd;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod entity;
pub mod error;
pub mod event_handlers;
pub mod models;
pub mod partition;
pub mod registry;
pub mod replica;
pub mod timeouts;
pub mod transaction;
pub mod writer;

pub use client::{TableLinkClient, TableLinkClientBuilder};
pub use connection::ConnectionState;
pub use entity::TableEntity;
pub use error::{Result, TableLinkError};
pub use event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
pub use models::{ClientMessage, ConnectionOptions, OperationResult, RowId, ServerMessage, SyncPeriod};
pub use partition::PartitionStore;
pub use registry::SubscriptionRegistry;
pub use replica::{RowObserver, TableReplica};
pub use timeouts::{TableLinkTimeouts, TableLinkTimeoutsBuilder};
pub use transaction::TransactionBuilder;
pub use writer::{TableWriter, TableWriterBuilder};
