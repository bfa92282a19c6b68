//! Client entry point with builder.

use crate::backend::Backend;
use crate::credentials::Credentials;
use crate::descriptor::ResourceDescriptor;
use crate::error::{LinkError, Result};
use crate::event_handlers::EventHandlers;
use crate::feed::run_feed;
use crate::merge::MergePolicy;
use crate::options::ChannelOptions;
use crate::registry::{ChannelDriver, ChannelRegistry};
use crate::remote::RemoteBackend;
use crate::row::Row;
use crate::subscription::{spawn_fetch, Subscription};
use crate::timeouts::LinkTimeouts;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Client for live content queries.
///
/// Cheap to clone; all clones share one backend connection pool and one
/// subscription registry, so equal resource descriptors share one underlying
/// change-feed channel no matter which page opened them.
///
/// # Examples
///
/// ```rust,no_run
/// use aula_link::{LiveClient, ResourceDescriptor, UpsertById};
///
/// # async fn example() -> aula_link::Result<()> {
/// let client = LiveClient::builder()
///     .base_url("https://content.aula.example")
///     .api_key("pk_live_123")
///     .build()?;
///
/// let mut news = client.open(ResourceDescriptor::table("news"), UpsertById::new("id"));
/// while let Some(update) = news.next().await {
///     println!("{:?}", update);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LiveClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    backend: Arc<dyn Backend>,
    registry: Arc<ChannelRegistry>,
    options: ChannelOptions,
    handlers: EventHandlers,
}

impl LiveClient {
    /// Create a new builder for configuring the client.
    pub fn builder() -> LiveClientBuilder {
        LiveClientBuilder::new()
    }

    /// Open a live query: fetch the descriptor's rows, attach to the shared
    /// change-feed channel for it, and fold events through `policy`.
    ///
    /// Returns immediately; the initial fetch runs in the background and the
    /// seeded snapshot arrives as the subscription's first update, with any
    /// events received meanwhile buffered and replayed in order. Must be
    /// called within a Tokio runtime.
    pub fn open<P: MergePolicy>(&self, descriptor: ResourceDescriptor, policy: P) -> Subscription<P> {
        let descriptor = Arc::new(descriptor);
        let key = descriptor.channel_key();
        let inner = &self.inner;

        let (observer, feed_rx) = inner.registry.acquire(&key, |fan_out| {
            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            let task = tokio::spawn(run_feed(
                inner.backend.clone(),
                descriptor.resource().to_string(),
                descriptor.filter().clone(),
                fan_out,
                inner.options.clone(),
                inner.handlers.clone(),
                shutdown_rx,
            ));
            ChannelDriver::new(shutdown_tx, task)
        });
        log::debug!("opened live query on '{}'", key);

        let seed_rx = spawn_fetch(inner.backend.clone(), descriptor.clone());
        Subscription::new(
            descriptor,
            policy,
            seed_rx,
            feed_rx,
            observer,
            inner.registry.clone(),
            inner.backend.clone(),
        )
    }

    /// One-shot read without a subscription.
    pub async fn fetch(&self, descriptor: &ResourceDescriptor) -> Result<Vec<Row>> {
        Ok(self.inner.backend.fetch(descriptor).await?)
    }

    /// The client's subscription registry.
    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.inner.registry
    }
}

/// Builder for [`LiveClient`].
pub struct LiveClientBuilder {
    base_url: Option<String>,
    credentials: Credentials,
    backend: Option<Arc<dyn Backend>>,
    registry: Option<Arc<ChannelRegistry>>,
    timeouts: LinkTimeouts,
    options: ChannelOptions,
    handlers: EventHandlers,
}

impl LiveClientBuilder {
    fn new() -> Self {
        Self {
            base_url: None,
            credentials: Credentials::default(),
            backend: None,
            registry: None,
            timeouts: LinkTimeouts::default(),
            options: ChannelOptions::default(),
            handlers: EventHandlers::default(),
        }
    }

    /// Base URL of the hosted content backend. Ignored when an explicit
    /// backend is set.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Authenticate with the project's publishable API key.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.credentials = Credentials::api_key(key);
        self
    }

    /// Authenticate with a bearer token (admin sessions).
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.credentials = Credentials::bearer(token);
        self
    }

    /// Use a custom backend instead of [`RemoteBackend`]; tests use
    /// [`MemoryBackend`](crate::memory::MemoryBackend) here.
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Share or inject a subscription registry. Defaults to a fresh registry
    /// per client.
    pub fn registry(mut self, registry: Arc<ChannelRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn timeouts(mut self, timeouts: LinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn channel_options(mut self, options: ChannelOptions) -> Self {
        self.options = options;
        self
    }

    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn build(self) -> Result<LiveClient> {
        let backend = match (self.backend, self.base_url) {
            (Some(backend), _) => backend,
            (None, Some(base_url)) => {
                Arc::new(RemoteBackend::new(base_url, self.credentials, self.timeouts)?)
                    as Arc<dyn Backend>
            }
            (None, None) => {
                return Err(LinkError::Configuration(
                    "either a backend or a base_url is required".to_string(),
                ))
            }
        };
        Ok(LiveClient {
            inner: Arc::new(ClientInner {
                backend,
                registry: self.registry.unwrap_or_default(),
                options: self.options,
                handlers: self.handlers,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_without_backend_or_url_fails() {
        let result = LiveClient::builder().build();
        assert!(matches!(result, Err(LinkError::Configuration(_))));
    }

    #[test]
    fn test_build_with_base_url() {
        let client = LiveClient::builder()
            .base_url("http://localhost:3000")
            .api_key("pk_test")
            .build()
            .unwrap();
        assert_eq!(client.registry().channel_count(), 0);
    }

    #[cfg(feature = "memory")]
    #[test]
    fn test_clones_share_the_registry() {
        let client = LiveClient::builder()
            .backend(Arc::new(crate::memory::MemoryBackend::new()))
            .build()
            .unwrap();
        let clone = client.clone();
        assert!(Arc::ptr_eq(client.registry(), clone.registry()));
    }
}
