//! Backend access interfaces.
//!
//! The hosted content backend is an external system; the library consumes it
//! through two narrow interfaces, a one-shot query and a push-based change
//! feed, bundled in the [`Backend`] trait. Production clients use
//! [`RemoteBackend`](crate::remote::RemoteBackend); tests use
//! [`MemoryBackend`](crate::memory::MemoryBackend).

use crate::descriptor::{Filter, ResourceDescriptor};
use crate::error::{ChannelError, FetchError};
use crate::event::ChangeEvent;
use crate::row::Row;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Query and change-feed access to the content backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// One-shot read of the rows matching the descriptor's filter and
    /// projection.
    async fn fetch(&self, descriptor: &ResourceDescriptor) -> Result<Vec<Row>, FetchError>;

    /// Open a change feed for `resource` rows matching `filter`, pushing
    /// events into `events`. Delivery is best-effort. Dropping all clones of
    /// the sender signals that the feed has ended; the returned handle tears
    /// the feed down from the consumer side.
    async fn subscribe(
        &self,
        resource: &str,
        filter: &Filter,
        events: mpsc::Sender<ChangeEvent>,
    ) -> Result<FeedHandle, ChannelError>;
}

/// Teardown handle for one open feed.
///
/// Stopping is idempotent and also happens on drop, so an aborted channel
/// task cannot leak a feed.
pub struct FeedHandle {
    on_stop: Option<Box<dyn FnOnce() + Send>>,
}

impl FeedHandle {
    /// A handle running `on_stop` when stopped or dropped.
    pub fn new(on_stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_stop: Some(Box::new(on_stop)),
        }
    }

    /// Tear the feed down now.
    pub fn stop(mut self) {
        if let Some(stop) = self.on_stop.take() {
            stop();
        }
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.on_stop.take() {
            stop();
        }
    }
}
