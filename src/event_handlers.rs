//! Connection lifecycle hooks.
//!
//! Callback-based hooks for monitoring feed connections, so page chrome can
//! show a "live updates unavailable" indicator without consuming the
//! subscription stream itself:
//!
//! - [`on_connect`](EventHandlers::on_connect): a feed connection was established
//! - [`on_disconnect`](EventHandlers::on_disconnect): a feed connection closed
//! - [`on_error`](EventHandlers::on_error): a feed failed to establish or errored
//!
//! # Example
//!
//! ```rust
//! use aula_link::EventHandlers;
//!
//! let handlers = EventHandlers::new()
//!     .on_connect(|| println!("live"))
//!     .on_disconnect(|reason| println!("feed down: {}", reason))
//!     .on_error(|error| eprintln!("feed error: {}", error));
//! ```

use crate::error::ChannelError;
use std::fmt;
use std::sync::Arc;

/// Why a feed connection closed.
#[derive(Debug, Clone)]
pub struct DisconnectReason {
    /// Human-readable description.
    pub message: String,
    /// WebSocket close code, when the transport supplied one.
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

type ConnectCallback = Arc<dyn Fn() + Send + Sync>;
type DisconnectCallback = Arc<dyn Fn(DisconnectReason) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(ChannelError) + Send + Sync>;

/// Registered lifecycle callbacks. Cheap to clone; every channel task holds
/// a copy.
#[derive(Clone, Default)]
pub struct EventHandlers {
    connect: Option<ConnectCallback>,
    disconnect: Option<DisconnectCallback>,
    error: Option<ErrorCallback>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.connect = Some(Arc::new(callback));
        self
    }

    pub fn on_disconnect(
        mut self,
        callback: impl Fn(DisconnectReason) + Send + Sync + 'static,
    ) -> Self {
        self.disconnect = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(ChannelError) + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(callback));
        self
    }

    pub(crate) fn emit_connect(&self) {
        if let Some(callback) = &self.connect {
            callback();
        }
    }

    pub(crate) fn emit_disconnect(&self, reason: DisconnectReason) {
        if let Some(callback) = &self.disconnect {
            callback(reason);
        }
    }

    pub(crate) fn emit_error(&self, error: &ChannelError) {
        if let Some(callback) = &self.error {
            callback(error.clone());
        }
    }
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("connect", &self.connect.is_some())
            .field("disconnect", &self.disconnect.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}
