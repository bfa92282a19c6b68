//! Timeout configuration for client operations.

use std::time::Duration;

/// Timeouts for HTTP and WebSocket operations against the content backend.
///
/// `Duration::ZERO` disables the corresponding deadline.
///
/// # Example
///
/// ```rust
/// use aula_link::LinkTimeouts;
/// use std::time::Duration;
///
/// let timeouts = LinkTimeouts::default().with_fetch_timeout(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone)]
pub struct LinkTimeouts {
    /// Establishing connections (TCP + TLS + WebSocket handshake).
    /// Default: 10 seconds
    pub connect_timeout: Duration,

    /// A one-shot fetch, end to end.
    /// Default: 30 seconds
    pub fetch_timeout: Duration,

    /// Waiting for the backend to acknowledge a feed subscription.
    /// Default: 5 seconds
    pub subscribe_timeout: Duration,

    /// Keepalive ping interval on feed connections.
    /// Default: 10 seconds
    pub keepalive_interval: Duration,

    /// Maximum wait for a pong (or any frame) after a keepalive ping before
    /// the connection is considered dead.
    /// Default: 5 seconds
    pub pong_timeout: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(30),
            subscribe_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(5),
        }
    }
}

impl LinkTimeouts {
    /// Aggressive timeouts for local development.
    pub fn fast() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            fetch_timeout: Duration::from_secs(2),
            subscribe_timeout: Duration::from_secs(1),
            keepalive_interval: Duration::from_secs(2),
            pong_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    pub fn with_pong_timeout(mut self, timeout: Duration) -> Self {
        self.pong_timeout = timeout;
        self
    }

    /// Whether `timeout` means "no deadline".
    pub fn is_disabled(timeout: Duration) -> bool {
        timeout.is_zero()
    }
}
