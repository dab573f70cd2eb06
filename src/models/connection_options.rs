use serde::{Deserialize, Serialize};

/// Connection-level options for the subscription client.
///
/// # Example
///
/// ```rust
/// use tablelink::ConnectionOptions;
///
/// let options = ConnectionOptions::new()
///     .with_auto_reconnect(true)
///     .with_reconnect_delay_ms(1000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Reconnect automatically when the connection drops.
    /// Default: true. There is no attempt cap — the client retries for as
    /// long as the process runs.
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Fixed delay between the loss of a connection and the next connect
    /// attempt, in milliseconds. Default: 3000.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_delay_ms: 3000,
        }
    }
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to automatically reconnect on connection loss.
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the fixed delay between reconnection attempts (in milliseconds).
    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }
}
