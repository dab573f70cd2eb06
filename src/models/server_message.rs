use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::row_id::RowId;

/// Server-to-client messages on the subscription connection.
///
/// Row payloads are carried as raw JSON values; they are decoded into the
/// subscribed entity type by the table's registered handler set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Keepalive probe from the server. Counts as traffic, nothing more.
    Ping,

    /// Full snapshot of one table. Replaces the whole local replica of
    /// that table. Sent after every subscribe, including resubscribes
    /// after a reconnect.
    InitTable {
        table_name: String,
        /// Encoded rows of the entire table.
        data: Vec<JsonValue>,
    },

    /// Full snapshot of a single partition.
    InitPartition {
        table_name: String,
        partition_key: String,
        /// Encoded rows of the partition.
        data: Vec<JsonValue>,
    },

    /// Incremental row upserts. Only rows that actually changed are sent.
    UpdateRows {
        table_name: String,
        data: Vec<JsonValue>,
    },

    /// Row deletions, addressed by key.
    DeleteRows {
        table_name: String,
        rows: Vec<RowId>,
    },
}

impl ServerMessage {
    /// Short kind label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping => "Ping",
            Self::InitTable { .. } => "InitTable",
            Self::InitPartition { .. } => "InitPartition",
            Self::UpdateRows { .. } => "UpdateRows",
            Self::DeleteRows { .. } => "DeleteRows",
        }
    }

    /// The table this message targets, if any.
    pub fn table_name(&self) -> Option<&str> {
        match self {
            Self::Ping => None,
            Self::InitTable { table_name, .. }
            | Self::InitPartition { table_name, .. }
            | Self::UpdateRows { table_name, .. }
            | Self::DeleteRows { table_name, .. } => Some(table_name.as_str()),
        }
    }
}
