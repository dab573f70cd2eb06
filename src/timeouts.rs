//! Timeout configuration for tablelink client operations.

use std::time::Duration;

/// Timeouts used by the subscription connection and the mutation client.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use tablelink::TableLinkTimeouts;
///
/// // Defaults are fine for most deployments.
/// let timeouts = TableLinkTimeouts::default();
///
/// // Custom values for a high-latency link.
/// let timeouts = TableLinkTimeouts::builder()
///     .connection_timeout(Duration::from_secs(30))
///     .dead_connection_timeout(Duration::from_secs(90))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TableLinkTimeouts {
    /// Timeout for establishing a connection (TCP + TLS + handshake).
    /// Default: 10 seconds.
    pub connection_timeout: Duration,

    /// Timeout for a single mutation API request.
    /// Default: 30 seconds.
    pub request_timeout: Duration,

    /// Idle interval after which a keepalive ping is sent on the
    /// subscription connection. Set to 0 to disable pings.
    /// Default: 10 seconds.
    pub keepalive_interval: Duration,

    /// The subscription connection is considered dead when no traffic of
    /// any kind (including pings) arrives within this window, and is torn
    /// down and reconnected. Set to 0 to disable.
    /// Default: 30 seconds.
    pub dead_connection_timeout: Duration,
}

impl Default for TableLinkTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(10),
            dead_connection_timeout: Duration::from_secs(30),
        }
    }
}

impl TableLinkTimeouts {
    /// Create a new builder for custom timeout configuration.
    pub fn builder() -> TableLinkTimeoutsBuilder {
        TableLinkTimeoutsBuilder::new()
    }

    /// Aggressive timeouts for local development.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(3),
            dead_connection_timeout: Duration::from_secs(10),
        }
    }

    /// Relaxed timeouts for high-latency or unreliable networks.
    pub fn relaxed() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
            keepalive_interval: Duration::from_secs(30),
            dead_connection_timeout: Duration::from_secs(120),
        }
    }

    /// Check if a duration represents "no timeout" (zero or very large).
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero() || duration > Duration::from_secs(86400 * 365)
    }
}

/// Builder for [`TableLinkTimeouts`].
#[derive(Debug, Clone)]
pub struct TableLinkTimeoutsBuilder {
    timeouts: TableLinkTimeouts,
}

impl TableLinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: TableLinkTimeouts::default(),
        }
    }

    /// Set the connection establishment timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    /// Set the per-request timeout of the mutation client.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.request_timeout = timeout;
        self
    }

    /// Set the keepalive ping interval. 0 disables pings.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.timeouts.keepalive_interval = interval;
        self
    }

    /// Set the dead-connection window. 0 disables the check.
    pub fn dead_connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.dead_connection_timeout = timeout;
        self
    }

    /// Build the timeout configuration.
    pub fn build(self) -> TableLinkTimeouts {
        self.timeouts
    }
}
