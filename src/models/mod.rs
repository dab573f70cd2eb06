//! Wire and configuration models for the tablelink client.
//!
//! Defines the messages exchanged over the persistent subscription
//! connection and the request/response types of the mutation API.

pub mod client_message;
pub mod connection_options;
pub mod operation_result;
pub mod row_id;
pub mod server_message;
pub mod sync_period;
pub mod transaction;

#[cfg(test)]
mod tests;

pub use client_message::ClientMessage;
pub use connection_options::ConnectionOptions;
pub use operation_result::OperationResult;
pub use row_id::RowId;
pub use server_message::ServerMessage;
pub use sync_period::SyncPeriod;
pub use transaction::{StartTransactionResponse, TransactionStatement};
