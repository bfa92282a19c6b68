//! Error types for aula-link.

use thiserror::Error;

/// Result type for aula-link operations.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Errors that can occur in the client library.
#[derive(Error, Debug)]
pub enum LinkError {
    /// Client was misconfigured (missing base URL, bad header value, ...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// HTTP-level failure talking to the backend.
    #[error("network error: {0}")]
    Network(String),

    /// WebSocket-level failure on the change feed.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Payload could not be serialized or parsed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An operation exceeded its configured deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Initial read of a resource failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The change feed for a resource is unavailable.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Registry misuse, see [`RegistryError`].
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Initial read of a resource failed.
///
/// Never fatal to a subscription: the live channel stays attached and the
/// consumer keeps rendering its last-known (possibly empty) snapshot.
#[derive(Error, Debug, Clone)]
#[error("initial fetch for '{resource}' failed: {message}")]
pub struct FetchError {
    /// Resource the fetch was issued against.
    pub resource: String,
    /// Human-readable failure description.
    pub message: String,
}

impl FetchError {
    pub fn new(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            message: message.into(),
        }
    }
}

/// The live change feed is unavailable.
///
/// `recoverable` distinguishes a transient loss (reconnection in progress)
/// from a persistent failure (retry budget exhausted).
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ChannelError {
    /// Human-readable failure description.
    pub message: String,
    /// Whether reconnection may still succeed.
    pub recoverable: bool,
}

impl ChannelError {
    /// A transient feed failure; the channel keeps retrying.
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: true,
        }
    }

    /// A terminal feed failure; no further retries will be made.
    pub fn persistent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: false,
        }
    }
}

/// Misuse of the subscription registry.
///
/// A release without a matching acquire indicates a leak or double-teardown
/// bug in a consumer, so it is reported loudly instead of being swallowed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("release for unknown channel '{0}'")]
    UnknownChannel(String),

    #[error("release for unknown observer {id} on channel '{key}'")]
    UnknownObserver { key: String, id: u64 },
}
