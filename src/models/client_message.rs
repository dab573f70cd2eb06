use serde::{Deserialize, Serialize};

/// Client-to-server messages on the subscription connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Identifies the connecting application. Sent as the very first
    /// message of every connection, before any subscribe.
    Greeting {
        /// Application name plus client library version.
        name: String,
    },

    /// Subscribe to one table. Fire-and-forget: the server answers with a
    /// full table snapshot, not with an acknowledgement.
    Subscribe {
        /// Name of the table to mirror.
        table_name: String,
    },

    /// Keepalive probe. Sent whenever the connection has been idle for the
    /// configured keepalive interval.
    Ping,
}
