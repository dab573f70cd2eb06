//! Connection lifecycle hooks for the subscription client.
//!
//! All hooks are optional and registered with a builder:
//!
//! ```rust
//! use tablelink::EventHandlers;
//!
//! let handlers = EventHandlers::new()
//!     .on_connect(|| println!("streaming"))
//!     .on_disconnect(|reason| println!("dropped: {}", reason))
//!     .on_error(|error| eprintln!("connection error: {}", error));
//! ```

use std::fmt;
use std::sync::Arc;

/// Why the subscription connection closed.
#[derive(Debug, Clone)]
pub struct DisconnectReason {
    /// Human-readable description.
    pub message: String,
    /// Transport close code, when the server supplied one.
    pub code: Option<u16>,
}

impl DisconnectReason {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code: {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Error information passed to the `on_error` hook.
#[derive(Debug, Clone)]
pub struct ConnectionError {
    /// Human-readable error message.
    pub message: String,
    /// Whether reconnecting may resolve the error.
    pub recoverable: bool,
}

impl ConnectionError {
    pub fn new(message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            message: message.into(),
            recoverable,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

type OnConnect = Arc<dyn Fn() + Send + Sync>;
type OnDisconnect = Arc<dyn Fn(DisconnectReason) + Send + Sync>;
type OnError = Arc<dyn Fn(ConnectionError) + Send + Sync>;

/// Optional connection lifecycle callbacks.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub(crate) on_connect: Option<OnConnect>,
    pub(crate) on_disconnect: Option<OnDisconnect>,
    pub(crate) on_error: Option<OnError>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoked each time the connection reaches the streaming state,
    /// including after reconnects.
    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Invoked when the connection is lost or closed.
    pub fn on_disconnect(mut self, f: impl Fn(DisconnectReason) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Invoked on connection or protocol errors.
    pub fn on_error(mut self, f: impl Fn(ConnectionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub(crate) fn emit_connect(&self) {
        if let Some(cb) = &self.on_connect {
            cb();
        }
    }

    pub(crate) fn emit_disconnect(&self, reason: DisconnectReason) {
        if let Some(cb) = &self.on_disconnect {
            cb(reason);
        }
    }

    pub(crate) fn emit_error(&self, error: ConnectionError) {
        if let Some(cb) = &self.on_error {
            cb(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emitting_without_handlers_is_a_noop() {
        let handlers = EventHandlers::new();
        handlers.emit_connect();
        handlers.emit_disconnect(DisconnectReason::new("bye"));
        handlers.emit_error(ConnectionError::new("boom", true));
    }

    #[test]
    fn test_registered_handlers_fire() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let handlers = EventHandlers::new().on_connect(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        handlers.emit_connect();
        handlers.emit_connect();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_disconnect_reason_display() {
        assert_eq!(DisconnectReason::new("gone").to_string(), "gone");
        assert_eq!(
            DisconnectReason::with_code("gone", 1006).to_string(),
            "gone (code: 1006)"
        );
    }
}
