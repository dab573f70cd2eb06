use serde_json::json;

use super::*;

// ==================== ClientMessage Tests ====================

#[test]
fn test_greeting_wire_format() {
    let message = ClientMessage::Greeting {
        name: "pricing-service;ClientVersion:0.3.1".to_string(),
    };

    let value = serde_json::to_value(&message).unwrap();
    assert_eq!(
        value,
        json!({"type": "greeting", "name": "pricing-service;ClientVersion:0.3.1"})
    );
}

#[test]
fn test_subscribe_wire_format() {
    let message = ClientMessage::Subscribe {
        table_name: "prices".to_string(),
    };

    let value = serde_json::to_value(&message).unwrap();
    assert_eq!(value, json!({"type": "subscribe", "table_name": "prices"}));
}

#[test]
fn test_ping_wire_format() {
    let value = serde_json::to_value(ClientMessage::Ping).unwrap();
    assert_eq!(value, json!({"type": "ping"}));
}

// ==================== ServerMessage Tests ====================

#[test]
fn test_init_table_parses() {
    let raw = r#"{"type":"init_table","table_name":"prices","data":[{"partition_key":"p1","row_key":"r1"}]}"#;
    let message: ServerMessage = serde_json::from_str(raw).unwrap();

    assert_eq!(message.kind(), "InitTable");
    assert_eq!(message.table_name(), Some("prices"));
    match message {
        ServerMessage::InitTable { data, .. } => assert_eq!(data.len(), 1),
        other => panic!("unexpected message: {:?}", other),
    }
}

#[test]
fn test_init_partition_parses() {
    let raw = r#"{"type":"init_partition","table_name":"prices","partition_key":"p1","data":[]}"#;
    let message: ServerMessage = serde_json::from_str(raw).unwrap();

    match message {
        ServerMessage::InitPartition {
            partition_key,
            data,
            ..
        } => {
            assert_eq!(partition_key, "p1");
            assert!(data.is_empty());
        }
        other => panic!("unexpected message: {:?}", other),
    }
}

#[test]
fn test_delete_rows_parses_row_ids() {
    let raw = r#"{"type":"delete_rows","table_name":"prices","rows":[{"partition_key":"p1","row_key":"r1"}]}"#;
    let message: ServerMessage = serde_json::from_str(raw).unwrap();

    match message {
        ServerMessage::DeleteRows { rows, .. } => {
            assert_eq!(rows, vec![RowId::new("p1", "r1")]);
        }
        other => panic!("unexpected message: {:?}", other),
    }
}

#[test]
fn test_server_ping_has_no_table() {
    let message: ServerMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
    assert_eq!(message.kind(), "Ping");
    assert!(message.table_name().is_none());
}

#[test]
fn test_unknown_message_kind_is_a_decode_error() {
    let result = serde_json::from_str::<ServerMessage>(r#"{"type":"compact_table"}"#);
    assert!(result.is_err());
}

// ==================== OperationResult Tests ====================

#[test]
fn test_operation_result_code_mapping() {
    assert_eq!(OperationResult::from_code(0), Some(OperationResult::Ok));
    assert_eq!(
        OperationResult::from_code(1),
        Some(OperationResult::RecordChangedConcurrently)
    );
    assert_eq!(
        OperationResult::from_code(2),
        Some(OperationResult::RecordNotFound)
    );
    assert_eq!(OperationResult::from_code(3), Some(OperationResult::Canceled));
    assert_eq!(OperationResult::from_code(42), None);
}

// ==================== SyncPeriod Tests ====================

#[test]
fn test_sync_period_wire_values() {
    assert_eq!(SyncPeriod::Immediately.as_str(), "Immediately");
    assert_eq!(SyncPeriod::Sec5.as_str(), "Sec5");
    assert_eq!(SyncPeriod::Min1.as_str(), "Min1");
    assert_eq!(SyncPeriod::Asap.as_str(), "Asap");
}

#[test]
fn test_default_period_resolves_to_configured() {
    assert_eq!(
        SyncPeriod::Default.or_default(SyncPeriod::Sec15),
        SyncPeriod::Sec15
    );
    assert_eq!(
        SyncPeriod::Sec1.or_default(SyncPeriod::Sec15),
        SyncPeriod::Sec1
    );
}

// ==================== ConnectionOptions Tests ====================

#[test]
fn test_connection_options_defaults() {
    let options = ConnectionOptions::default();
    assert!(options.auto_reconnect);
    assert_eq!(options.reconnect_delay_ms, 3000);
}

#[test]
fn test_connection_options_builder() {
    let options = ConnectionOptions::new()
        .with_auto_reconnect(false)
        .with_reconnect_delay_ms(500);
    assert!(!options.auto_reconnect);
    assert_eq!(options.reconnect_delay_ms, 500);
}

#[test]
fn test_connection_options_deserialize_with_defaults() {
    let options: ConnectionOptions = serde_json::from_str(r#"{"auto_reconnect": false}"#).unwrap();
    assert!(!options.auto_reconnect);
    assert_eq!(options.reconnect_delay_ms, 3000);
}
