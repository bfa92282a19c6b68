//! Refcounted registry of open change-feed channels.
//!
//! At most one underlying channel is open per [`ChannelKey`]; every observer
//! of the same filtered resource shares it. The registry holds only the
//! fan-out senders and the channel task's shutdown handle, never the
//! observers' subscriptions, so it cannot extend their lifetime. It is an
//! explicitly constructed instance (one per client by default), injectable
//! for test isolation.

use crate::descriptor::ChannelKey;
use crate::error::RegistryError;
use crate::event::FeedMessage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Capacity of each observer's message queue. The channel task applies
/// backpressure when an observer falls this far behind.
const OBSERVER_CHANNEL_CAPACITY: usize = 256;

/// Process-wide map of channel key to open feed channel.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: Mutex<HashMap<ChannelKey, ChannelEntry>>,
}

struct ChannelEntry {
    observers: ObserverSet,
    next_observer_id: u64,
    driver: Option<ChannelDriver>,
}

type ObserverSet = Arc<Mutex<HashMap<u64, mpsc::Sender<FeedMessage>>>>;

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an observer to the channel for `key`, opening the channel via
    /// `open_channel` if it is not already running. All registry mutation
    /// happens under one lock, so a concurrent acquire/release pair can
    /// neither open two channels nor orphan one.
    pub fn acquire<F>(
        &self,
        key: &ChannelKey,
        open_channel: F,
    ) -> (ObserverHandle, mpsc::Receiver<FeedMessage>)
    where
        F: FnOnce(FanOut) -> ChannelDriver,
    {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let entry = channels.entry(key.clone()).or_insert_with(|| {
            let observers: ObserverSet = Arc::new(Mutex::new(HashMap::new()));
            let driver = open_channel(FanOut {
                observers: observers.clone(),
            });
            log::debug!("opened channel '{}'", key);
            ChannelEntry {
                observers,
                next_observer_id: 0,
                driver: Some(driver),
            }
        });

        let id = entry.next_observer_id;
        entry.next_observer_id += 1;
        let (tx, rx) = mpsc::channel(OBSERVER_CHANNEL_CAPACITY);
        entry
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);

        (
            ObserverHandle {
                key: key.clone(),
                id,
            },
            rx,
        )
    }

    /// Detach an observer. When the last observer of a channel leaves, the
    /// channel task is shut down and the entry evicted. Releasing a handle
    /// that was never acquired, or releasing twice, is a programming error
    /// and returns [`RegistryError`] instead of being silently ignored.
    pub fn release(&self, handle: &ObserverHandle) -> Result<(), RegistryError> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let entry = channels
            .get_mut(&handle.key)
            .ok_or_else(|| RegistryError::UnknownChannel(handle.key.to_string()))?;

        let removed = entry
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle.id);
        if removed.is_none() {
            return Err(RegistryError::UnknownObserver {
                key: handle.key.to_string(),
                id: handle.id,
            });
        }

        let empty = entry
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty();
        if empty {
            if let Some(driver) = entry.driver.take() {
                driver.shutdown();
            }
            channels.remove(&handle.key);
            log::debug!("closed channel '{}'", handle.key);
        }
        Ok(())
    }

    /// Number of observers currently attached to `key`'s channel.
    pub fn observer_count(&self, key: &ChannelKey) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|entry| {
                entry
                    .observers
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .len()
            })
            .unwrap_or(0)
    }

    /// Whether a channel for `key` is open.
    pub fn is_open(&self, key: &ChannelKey) -> bool {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    /// Number of open channels.
    pub fn channel_count(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// Non-owning reference to one observer registration. The subscription that
/// acquired it must release it exactly once.
#[derive(Debug, Clone)]
pub struct ObserverHandle {
    key: ChannelKey,
    id: u64,
}

impl ObserverHandle {
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }
}

/// Sender side of a channel's observer set, handed to the channel task.
#[derive(Clone)]
pub struct FanOut {
    observers: ObserverSet,
}

impl FanOut {
    /// Deliver `message` to every attached observer in registration order.
    pub async fn send(&self, message: FeedMessage) {
        let targets: Vec<(u64, mpsc::Sender<FeedMessage>)> = {
            let observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
            observers.iter().map(|(id, tx)| (*id, tx.clone())).collect()
        };
        for (id, tx) in targets {
            if tx.send(message.clone()).await.is_err() {
                log::debug!("observer {} dropped its receiver", id);
            }
        }
    }
}

/// Shutdown handle for a running channel task.
pub struct ChannelDriver {
    shutdown: oneshot::Sender<()>,
    _task: JoinHandle<()>,
}

impl ChannelDriver {
    pub fn new(shutdown: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            shutdown,
            _task: task,
        }
    }

    /// A driver whose task does nothing but wait for shutdown. Useful for
    /// exercising the registry without a backend.
    pub fn noop() -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let _ = shutdown_rx.await;
        });
        Self::new(shutdown_tx, task)
    }

    fn shutdown(self) {
        // The task may already have exited; nothing to do then.
        let _ = self.shutdown.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ResourceDescriptor;

    fn gallery_key() -> ChannelKey {
        ResourceDescriptor::table("gallery").channel_key()
    }

    #[tokio::test]
    async fn test_second_acquire_shares_the_channel() {
        let registry = ChannelRegistry::new();
        let key = gallery_key();
        let (h1, _rx1) = registry.acquire(&key, |_| ChannelDriver::noop());
        let (h2, _rx2) = registry.acquire(&key, |_| panic!("channel must be shared"));
        assert_eq!(registry.observer_count(&key), 2);
        assert_eq!(registry.channel_count(), 1);
        registry.release(&h1).unwrap();
        registry.release(&h2).unwrap();
    }

    #[tokio::test]
    async fn test_release_closes_only_at_zero_observers() {
        let registry = ChannelRegistry::new();
        let key = gallery_key();
        let (h1, _rx1) = registry.acquire(&key, |_| ChannelDriver::noop());
        let (h2, _rx2) = registry.acquire(&key, |_| ChannelDriver::noop());

        registry.release(&h1).unwrap();
        assert_eq!(registry.observer_count(&key), 1);
        assert!(registry.is_open(&key));

        registry.release(&h2).unwrap();
        assert_eq!(registry.observer_count(&key), 0);
        assert!(!registry.is_open(&key));
    }

    #[tokio::test]
    async fn test_release_without_acquire_is_reported() {
        let registry = ChannelRegistry::new();
        let key = gallery_key();
        let (handle, _rx) = registry.acquire(&key, |_| ChannelDriver::noop());
        registry.release(&handle).unwrap();

        let err = registry.release(&handle).unwrap_err();
        assert_eq!(err, RegistryError::UnknownChannel(key.to_string()));
    }

    #[tokio::test]
    async fn test_stale_observer_on_live_channel_is_reported() {
        let registry = ChannelRegistry::new();
        let key = gallery_key();
        let (h1, _rx1) = registry.acquire(&key, |_| ChannelDriver::noop());
        let (_h2, _rx2) = registry.acquire(&key, |_| ChannelDriver::noop());

        registry.release(&h1).unwrap();
        let err = registry.release(&h1).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownObserver { .. }));
    }

    #[tokio::test]
    async fn test_distinct_filters_get_distinct_channels() {
        let registry = ChannelRegistry::new();
        let all = ResourceDescriptor::table("settings").channel_key();
        let one = ResourceDescriptor::table("settings")
            .filter_eq("id", 1)
            .channel_key();
        let (ha, _rxa) = registry.acquire(&all, |_| ChannelDriver::noop());
        let (hb, _rxb) = registry.acquire(&one, |_| ChannelDriver::noop());
        assert_eq!(registry.channel_count(), 2);
        registry.release(&ha).unwrap();
        registry.release(&hb).unwrap();
    }
}
