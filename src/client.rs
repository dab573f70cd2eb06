//! The main subscription client with builder pattern.
//!
//! [`TableLinkClient`] is the composition root of the read side: it owns
//! the [`SubscriptionRegistry`] mapping table names to replica handlers
//! and the background connection task that keeps every replica fed.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::connection::{
    connection_task, greeting_name, resolve_ws_url, ConnCmd, ConnectionConfig, ConnectionState,
};
use crate::entity::TableEntity;
use crate::error::{Result, TableLinkError};
use crate::event_handlers::EventHandlers;
use crate::models::ConnectionOptions;
use crate::registry::{SubscriptionRegistry, TableHandlers};
use crate::replica::TableReplica;
use crate::timeouts::TableLinkTimeouts;

/// Client maintaining local replicas of remote tables.
///
/// Use [`TableLinkClient::builder`] to construct instances. Tables can be
/// subscribed before [`start`](TableLinkClient::start) is called; the
/// subscribe messages go out with the first handshake, and again on every
/// reconnect.
///
/// # Examples
///
/// ```rust,no_run
/// use serde::{Deserialize, Serialize};
/// use tablelink::{TableEntity, TableLinkClient};
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
/// let client = TableLinkClient::builder()
///     .base_url("http://localhost:5125")
///     .app_name("pricing-service")
///     .build()?;
///
/// let prices = client.subscribe::<Price>("prices");
/// prices.on_changed(|rows| println!("{} price(s) changed", rows.len()));
///
/// client.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct TableLinkClient {
    registry: Arc<SubscriptionRegistry>,
    state: Arc<AtomicU8>,
    cmd_tx: mpsc::Sender<ConnCmd>,
    /// Consumed by `start()`.
    startup: Mutex<Option<(mpsc::Receiver<ConnCmd>, ConnectionConfig)>>,
    /// Keeps the background task handle alive for the client's lifetime.
    _task: Mutex<Option<JoinHandle<()>>>,
}

impl TableLinkClient {
    /// Create a new builder for configuring the client.
    pub fn builder() -> TableLinkClientBuilder {
        TableLinkClientBuilder::new()
    }

    /// Create a local replica of `table_name` and register it for events.
    ///
    /// One replica per (table name, entity type) pair; subscribing the same
    /// table again replaces the previous registration. The returned handle
    /// stays valid for the life of the process and keeps reconciling across
    /// reconnects.
    pub fn subscribe<T: TableEntity>(&self, table_name: &str) -> Arc<TableReplica<T>> {
        let replica = Arc::new(TableReplica::new(table_name));
        self.registry
            .register(table_name, TableHandlers::for_replica(&replica));
        replica
    }

    /// Spawn the background connection task.
    ///
    /// Waits for the first connection attempt to finish. A failed first
    /// attempt is logged and does not error: the task keeps reconnecting
    /// in the background, exactly as it does after a mid-stream drop.
    pub async fn start(&self) -> Result<()> {
        let (cmd_rx, config) = self
            .startup
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| TableLinkError::Configuration("Client already started".into()))?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let registry = self.registry.clone();
        let state = self.state.clone();
        let handle = tokio::spawn(async move {
            connection_task(cmd_rx, config, registry, state, Some(ready_tx)).await;
        });
        *self._task.lock().unwrap() = Some(handle);

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::warn!(
                    "[tablelink] initial connection failed (reconnecting in background): {}",
                    e
                );
            }
            Err(_) => {
                return Err(TableLinkError::Transport(
                    "Connection task exited before signalling readiness".into(),
                ));
            }
        }
        Ok(())
    }

    /// Tear down the current transport and rebuild it.
    ///
    /// Runs the same code path as a failure-triggered reconnect: the server
    /// re-sends full snapshots for every subscribed table afterwards.
    pub async fn reconnect(&self) -> Result<()> {
        self.cmd_tx
            .send(ConnCmd::Reconnect)
            .await
            .map_err(|_| TableLinkError::Transport("Connection task is not running".into()))
    }

    /// Close the connection and stop the background task.
    pub async fn shutdown(&self) -> Result<()> {
        self.cmd_tx
            .send(ConnCmd::Shutdown)
            .await
            .map_err(|_| TableLinkError::Transport("Connection task is not running".into()))
    }

    /// Current lifecycle state of the subscription connection.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Whether the connection is live and dispatching events.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Streaming
    }

    /// The tables currently registered for subscription.
    pub fn subscribed_tables(&self) -> Vec<String> {
        self.registry.tables()
    }
}

impl Drop for TableLinkClient {
    fn drop(&mut self) {
        // Best-effort shutdown signal.
        let _ = self.cmd_tx.try_send(ConnCmd::Shutdown);
    }
}

/// Builder for [`TableLinkClient`].
pub struct TableLinkClientBuilder {
    base_url: Option<String>,
    app_name: Option<String>,
    timeouts: TableLinkTimeouts,
    options: ConnectionOptions,
    event_handlers: EventHandlers,
}

impl TableLinkClientBuilder {
    fn new() -> Self {
        Self {
            base_url: None,
            app_name: None,
            timeouts: TableLinkTimeouts::default(),
            options: ConnectionOptions::default(),
            event_handlers: EventHandlers::default(),
        }
    }

    /// Set the server URL. `http(s)` and `ws(s)` schemes are accepted.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the application name sent in the greeting. The library version
    /// is appended automatically.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    /// Set the timeout configuration.
    pub fn timeouts(mut self, timeouts: TableLinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set connection-level options (reconnect behavior).
    pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Set connection lifecycle hooks.
    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.event_handlers = handlers;
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<TableLinkClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| TableLinkError::Configuration("base_url is required".into()))?;
        let app_name = self
            .app_name
            .ok_or_else(|| TableLinkError::Configuration("app_name is required".into()))?;

        let config = ConnectionConfig {
            ws_url: resolve_ws_url(&base_url)?,
            greeting_name: greeting_name(&app_name),
            timeouts: self.timeouts,
            options: self.options,
            event_handlers: self.event_handlers,
        };

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        Ok(TableLinkClient {
            registry: Arc::new(SubscriptionRegistry::new()),
            state: Arc::new(AtomicU8::new(ConnectionState::Disconnected as u8)),
            cmd_tx,
            startup: Mutex::new(Some((cmd_rx, config))),
            _task: Mutex::new(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Serialize, Deserialize)]
    struct Row {
        partition_key: String,
        row_key: String,
    }

    impl TableEntity for Row {
        fn partition_key(&self) -> &str {
            &self.partition_key
        }

        fn row_key(&self) -> &str {
            &self.row_key
        }
    }

    #[test]
    fn test_builder_requires_base_url_and_app_name() {
        assert!(TableLinkClient::builder().build().is_err());
        assert!(TableLinkClient::builder()
            .base_url("http://localhost:5125")
            .build()
            .is_err());
        assert!(TableLinkClient::builder()
            .base_url("http://localhost:5125")
            .app_name("tests")
            .build()
            .is_ok());
    }

    #[test]
    fn test_subscribe_registers_before_start() {
        let client = TableLinkClient::builder()
            .base_url("http://localhost:5125")
            .app_name("tests")
            .build()
            .unwrap();

        let _prices = client.subscribe::<Row>("Prices");
        let _orders = client.subscribe::<Row>("orders");

        assert_eq!(client.subscribed_tables(), vec!["orders", "prices"]);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
    }
}
