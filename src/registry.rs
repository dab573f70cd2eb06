//! Routing of inbound subscription events to table replicas.
//!
//! The registry maps a lower-cased table name to the four handlers exposed
//! by a [`TableReplica`](crate::TableReplica). It is owned by the
//! composition root ([`TableLinkClient`](crate::TableLinkClient)) and
//! survives reconnects — only the transport is recreated.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value as JsonValue;

use crate::entity::TableEntity;
use crate::error::Result;
use crate::models::{RowId, ServerMessage};
use crate::replica::TableReplica;

type InitHandler = Box<dyn Fn(Vec<JsonValue>) -> Result<()> + Send + Sync>;
type InitPartitionHandler = Box<dyn Fn(String, Vec<JsonValue>) -> Result<()> + Send + Sync>;
type UpdateHandler = Box<dyn Fn(Vec<JsonValue>) -> Result<()> + Send + Sync>;
type DeleteHandler = Box<dyn Fn(Vec<RowId>) -> Result<()> + Send + Sync>;

/// The four event handlers registered for one table.
pub(crate) struct TableHandlers {
    init: InitHandler,
    init_partition: InitPartitionHandler,
    update: UpdateHandler,
    delete: DeleteHandler,
}

impl TableHandlers {
    /// Build the handler set for a replica: each handler decodes the raw
    /// JSON rows into the entity type and applies them.
    ///
    /// A row that fails to decode at all is a fatal protocol error for the
    /// connection (the decoder is out of sync with the stream); rows that
    /// decode but lack a key are dropped inside the replica.
    pub(crate) fn for_replica<T: TableEntity>(replica: &Arc<TableReplica<T>>) -> Self {
        let target = replica.clone();
        let init: InitHandler = Box::new(move |data| {
            target.apply_full_snapshot(decode_rows(data)?);
            Ok(())
        });

        let target = replica.clone();
        let init_partition: InitPartitionHandler = Box::new(move |partition_key, data| {
            target.apply_partition_snapshot(&partition_key, decode_rows(data)?);
            Ok(())
        });

        let target = replica.clone();
        let update: UpdateHandler = Box::new(move |data| {
            target.apply_upserts(decode_rows(data)?);
            Ok(())
        });

        let target = replica.clone();
        let delete: DeleteHandler = Box::new(move |rows| {
            target.apply_deletes(
                rows.into_iter()
                    .map(|id| (id.partition_key, id.row_key))
                    .collect(),
            );
            Ok(())
        });

        Self {
            init,
            init_partition,
            update,
            delete,
        }
    }
}

fn decode_rows<T: TableEntity>(data: Vec<JsonValue>) -> Result<Vec<T>> {
    data.into_iter()
        .map(|value| serde_json::from_value(value).map_err(Into::into))
        .collect()
}

/// Table name → handler set, shared between the public client handle and
/// its background connection task.
#[derive(Default)]
pub struct SubscriptionRegistry {
    tables: RwLock<HashMap<String, TableHandlers>>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register the handler set for a table. Safe to call before any
    /// connection exists; events only start flowing after connect.
    /// Registering the same table again replaces the previous handler set.
    pub(crate) fn register(&self, table_name: &str, handlers: TableHandlers) {
        let key = table_name.to_lowercase();
        let mut tables = self.tables.write().unwrap();
        if tables.insert(key, handlers).is_some() {
            log::debug!(
                "[tablelink] replacing existing subscription for table '{}'",
                table_name
            );
        }
    }

    /// Whether a handler set is registered for the table.
    pub fn is_subscribed(&self, table_name: &str) -> bool {
        self.tables
            .read()
            .unwrap()
            .contains_key(&table_name.to_lowercase())
    }

    /// Subscribed table names, sorted. Drives the subscribe messages sent
    /// during every handshake.
    pub fn tables(&self) -> Vec<String> {
        let tables = self.tables.read().unwrap();
        let mut names: Vec<String> = tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Route one inbound event to the matching table's handler.
    ///
    /// Lookup is case-insensitive. An event for a table nobody subscribed
    /// to is dropped — that is a no-op, not an error. Handler failures
    /// (row decode mismatches) propagate to the caller, which treats them
    /// as fatal for the current connection.
    pub(crate) fn dispatch(&self, message: ServerMessage) -> Result<()> {
        let tables = self.tables.read().unwrap();
        match message {
            ServerMessage::Ping => Ok(()),
            ServerMessage::InitTable { table_name, data } => {
                match tables.get(&table_name.to_lowercase()) {
                    Some(handlers) => (handlers.init)(data),
                    None => drop_unrouted(&table_name, "InitTable"),
                }
            }
            ServerMessage::InitPartition {
                table_name,
                partition_key,
                data,
            } => match tables.get(&table_name.to_lowercase()) {
                Some(handlers) => (handlers.init_partition)(partition_key, data),
                None => drop_unrouted(&table_name, "InitPartition"),
            },
            ServerMessage::UpdateRows { table_name, data } => {
                match tables.get(&table_name.to_lowercase()) {
                    Some(handlers) => (handlers.update)(data),
                    None => drop_unrouted(&table_name, "UpdateRows"),
                }
            }
            ServerMessage::DeleteRows { table_name, rows } => {
                match tables.get(&table_name.to_lowercase()) {
                    Some(handlers) => (handlers.delete)(rows),
                    None => drop_unrouted(&table_name, "DeleteRows"),
                }
            }
        }
    }
}

fn drop_unrouted(table_name: &str, kind: &str) -> Result<()> {
    log::debug!(
        "[tablelink] no subscriber for table '{}', dropping {} event",
        table_name,
        kind
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

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

    fn subscribed_registry() -> (SubscriptionRegistry, Arc<TableReplica<Row>>) {
        let registry = SubscriptionRegistry::new();
        let replica = Arc::new(TableReplica::new("Prices"));
        registry.register("Prices", TableHandlers::for_replica(&replica));
        (registry, replica)
    }

    #[test]
    fn test_dispatch_routes_case_insensitively() {
        let (registry, replica) = subscribed_registry();

        registry
            .dispatch(ServerMessage::InitTable {
                table_name: "PRICES".to_string(),
                data: vec![json!({"partition_key": "p1", "row_key": "r1", "value": 1})],
            })
            .unwrap();

        assert_eq!(replica.count(), 1);
    }

    #[test]
    fn test_dispatch_to_unknown_table_is_a_noop() {
        let (registry, replica) = subscribed_registry();

        registry
            .dispatch(ServerMessage::UpdateRows {
                table_name: "orders".to_string(),
                data: vec![json!({"partition_key": "p1", "row_key": "r1", "value": 1})],
            })
            .unwrap();

        assert_eq!(replica.count(), 0);
    }

    #[test]
    fn test_dispatch_applies_updates_and_deletes() {
        let (registry, replica) = subscribed_registry();

        registry
            .dispatch(ServerMessage::UpdateRows {
                table_name: "prices".to_string(),
                data: vec![
                    json!({"partition_key": "p1", "row_key": "r1", "value": 1}),
                    json!({"partition_key": "p1", "row_key": "r2", "value": 2}),
                ],
            })
            .unwrap();
        assert_eq!(replica.count(), 2);

        registry
            .dispatch(ServerMessage::DeleteRows {
                table_name: "prices".to_string(),
                rows: vec![RowId::new("p1", "r1")],
            })
            .unwrap();
        assert_eq!(replica.count(), 1);
        assert!(replica.get("p1", "r1").is_none());
    }

    #[test]
    fn test_undecodable_row_is_a_handler_error() {
        let (registry, replica) = subscribed_registry();

        let result = registry.dispatch(ServerMessage::UpdateRows {
            table_name: "prices".to_string(),
            data: vec![json!({"partition_key": "p1", "row_key": "r1", "value": "not a number"})],
        });

        assert!(result.is_err());
        assert_eq!(replica.count(), 0);
    }

    #[test]
    fn test_row_with_missing_key_is_dropped_not_fatal() {
        let (registry, replica) = subscribed_registry();

        registry
            .dispatch(ServerMessage::UpdateRows {
                table_name: "prices".to_string(),
                data: vec![
                    json!({"partition_key": "", "row_key": "r1", "value": 1}),
                    json!({"partition_key": "p1", "row_key": "r2", "value": 2}),
                ],
            })
            .unwrap();

        assert_eq!(replica.count(), 1);
        assert!(replica.get("p1", "r2").is_some());
    }

    #[test]
    fn test_tables_are_sorted_and_lower_cased() {
        let registry = SubscriptionRegistry::new();
        let prices: Arc<TableReplica<Row>> = Arc::new(TableReplica::new("Prices"));
        let orders: Arc<TableReplica<Row>> = Arc::new(TableReplica::new("Orders"));
        registry.register("Prices", TableHandlers::for_replica(&prices));
        registry.register("Orders", TableHandlers::for_replica(&orders));

        assert_eq!(registry.tables(), vec!["orders", "prices"]);
        assert!(registry.is_subscribed("ORDERS"));
        assert!(!registry.is_subscribed("trades"));
    }
}
