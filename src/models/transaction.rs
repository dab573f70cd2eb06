use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Response of `Transaction/Start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartTransactionResponse {
    pub transaction_id: String,
}

/// One statement of a multi-statement transaction. Statements are posted
/// under the server-issued transaction id and applied server-side on
/// commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionStatement {
    InsertOrReplace {
        table_name: String,
        entities: Vec<JsonValue>,
    },
    DeleteRows {
        table_name: String,
        partition_key: String,
        row_keys: Vec<String>,
    },
    CleanPartitions {
        table_name: String,
        partition_keys: Vec<String>,
    },
}
