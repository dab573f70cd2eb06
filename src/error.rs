//! Error types for the tablelink client library.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TableLinkError>;

/// Errors surfaced by the replica, protocol and mutation clients.
#[derive(Error, Debug)]
pub enum TableLinkError {
    /// Invalid client configuration (bad URL, missing builder field, ...).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An entity failed local validation (empty partition or row key).
    ///
    /// Raised before any network call is made.
    #[error("Invalid entity: {0}")]
    InvalidEntity(String),

    /// A remote API call failed. Carries the operation name and the
    /// server's response body (or the transport error text when no
    /// response was received).
    #[error("Failed to call {operation}: {response}")]
    RemoteCall {
        /// Name of the remote operation that failed.
        operation: String,
        /// Response body or transport error description.
        response: String,
    },

    /// WebSocket-level failure on the streaming connection.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An operation did not complete within its configured timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
