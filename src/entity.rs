//! The entity contract shared by the replica and the mutation client.
//!
//! Every row stored in a table is an application-defined type implementing
//! [`TableEntity`]. A row is addressed by its `(partition key, row key)`
//! pair; both keys are case-sensitive, non-empty strings. Rows are treated
//! as immutable value snapshots — an update always replaces the whole row.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, TableLinkError};

/// A row in a partitioned table.
///
/// # Example
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use tablelink::TableEntity;
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct InstrumentPrice {
///     partition_key: String,
///     row_key: String,
///     bid: f64,
///     ask: f64,
/// }
///
/// impl TableEntity for InstrumentPrice {
///     fn partition_key(&self) -> &str {
///         &self.partition_key
///     }
///
///     fn row_key(&self) -> &str {
///         &self.row_key
///     }
/// }
/// ```
pub trait TableEntity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The key of the partition this row belongs to. Must be non-empty.
    fn partition_key(&self) -> &str;

    /// The key of the row within its partition. Must be non-empty.
    fn row_key(&self) -> &str;
}

/// Whether both keys of a row are present.
pub(crate) fn is_well_formed<T: TableEntity>(entity: &T) -> bool {
    !entity.partition_key().is_empty() && !entity.row_key().is_empty()
}

/// Validate an entity before it is sent to the server.
///
/// The mutation client calls this for every outbound row and fails fast,
/// without a network round trip, when a key is missing.
pub(crate) fn validate_entity<T: TableEntity>(entity: &T) -> Result<()> {
    if entity.partition_key().is_empty() {
        return Err(TableLinkError::InvalidEntity(format!(
            "entity has an empty partition key: {}",
            serde_json::to_string(entity).unwrap_or_default()
        )));
    }

    if entity.row_key().is_empty() {
        return Err(TableLinkError::InvalidEntity(format!(
            "entity has an empty row key: {}",
            serde_json::to_string(entity).unwrap_or_default()
        )));
    }

    Ok(())
}

/// Structural equality of two row revisions.
///
/// Two revisions are equal when their encoded JSON values are equal; field
/// order and formatting do not matter. This is the equality the diff
/// algorithm uses to decide whether a row in a fresh snapshot actually
/// changed and needs to be re-announced to observers.
pub(crate) fn entity_content_equal<T: Serialize>(a: &T, b: &T) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Serialize, Deserialize)]
    struct Row {
        partition_key: String,
        row_key: String,
        value: i64,
    }

    impl TableEntity for Row {
        fn partition_key(&self) -> &str {
            &self.partition_key
        }

        fn row_key(&self) -> &str {
            &self.row_key
        }
    }

    fn row(pk: &str, rk: &str, value: i64) -> Row {
        Row {
            partition_key: pk.to_string(),
            row_key: rk.to_string(),
            value,
        }
    }

    #[test]
    fn test_validate_accepts_well_formed_entity() {
        assert!(validate_entity(&row("p1", "r1", 1)).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_partition_key() {
        let err = validate_entity(&row("", "r1", 1)).unwrap_err();
        assert!(matches!(err, TableLinkError::InvalidEntity(_)));
    }

    #[test]
    fn test_validate_rejects_empty_row_key() {
        let err = validate_entity(&row("p1", "", 1)).unwrap_err();
        assert!(matches!(err, TableLinkError::InvalidEntity(_)));
    }

    #[test]
    fn test_content_equality_is_structural() {
        assert!(entity_content_equal(&row("p1", "r1", 7), &row("p1", "r1", 7)));
        assert!(!entity_content_equal(&row("p1", "r1", 7), &row("p1", "r1", 8)));
    }
}
