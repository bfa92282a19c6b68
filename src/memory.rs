//! In-memory backend for tests and local development.
//!
//! Holds tables and open feeds in a shared map, with knobs to delay or fail
//! operations so subscription lifecycle paths (buffering, retry, degraded
//! mode) can be exercised without a network.

use crate::backend::{Backend, FeedHandle};
use crate::descriptor::{Filter, Projection, ResourceDescriptor};
use crate::error::{ChannelError, FetchError};
use crate::event::ChangeEvent;
use crate::row::Row;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Shared in-memory content backend.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<String, Vec<Row>>,
    feeds: HashMap<String, Vec<FeedEntry>>,
    next_feed_id: u64,
    fetch_delay: Option<Duration>,
    failing_fetches: HashMap<String, u32>,
    failing_subscribes: u32,
}

struct FeedEntry {
    id: u64,
    filter: Filter,
    tx: mpsc::Sender<ChangeEvent>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the rows of `resource`.
    pub fn set_rows(&self, resource: &str, rows: Vec<Row>) {
        self.lock().tables.insert(resource.to_string(), rows);
    }

    /// Push a change event to every open feed on `resource` whose filter
    /// matches the event's row. Does not touch the stored table; tests drive
    /// table state and feed traffic independently.
    pub async fn emit(&self, resource: &str, event: ChangeEvent) {
        let targets: Vec<mpsc::Sender<ChangeEvent>> = {
            let mut state = self.lock();
            if let Some(feeds) = state.feeds.get_mut(resource) {
                feeds.retain(|entry| !entry.tx.is_closed());
                feeds
                    .iter()
                    .filter(|entry| entry.filter.matches(event.row()))
                    .map(|entry| entry.tx.clone())
                    .collect()
            } else {
                Vec::new()
            }
        };
        for tx in targets {
            let _ = tx.send(event.clone()).await;
        }
    }

    /// Fail the next `times` fetches of `resource`.
    pub fn fail_next_fetch(&self, resource: &str, times: u32) {
        self.lock()
            .failing_fetches
            .insert(resource.to_string(), times);
    }

    /// Fail the next `times` subscribe calls, regardless of resource.
    pub fn fail_subscribes(&self, times: u32) {
        self.lock().failing_subscribes = times;
    }

    /// Delay every fetch by `delay` before it resolves.
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.lock().fetch_delay = Some(delay);
    }

    /// Number of live feeds open on `resource`.
    pub fn feed_count(&self, resource: &str) -> usize {
        let mut state = self.lock();
        match state.feeds.get_mut(resource) {
            Some(feeds) => {
                feeds.retain(|entry| !entry.tx.is_closed());
                feeds.len()
            }
            None => 0,
        }
    }

    /// Drop every open feed on `resource`, simulating a feed loss. Channels
    /// observe their event stream ending and go through their reconnect path.
    pub fn drop_feeds(&self, resource: &str) {
        self.lock().feeds.remove(resource);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove_feed(state: &Arc<Mutex<MemoryState>>, resource: &str, id: u64) {
        let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(feeds) = state.feeds.get_mut(resource) {
            feeds.retain(|entry| entry.id != id);
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn fetch(&self, descriptor: &ResourceDescriptor) -> Result<Vec<Row>, FetchError> {
        let resource = descriptor.resource().to_string();
        let delay = {
            let mut state = self.lock();
            match state.failing_fetches.get_mut(&resource) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    return Err(FetchError::new(&resource, "simulated fetch failure"));
                }
                _ => {}
            }
            state.fetch_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let rows = self
            .lock()
            .tables
            .get(&resource)
            .cloned()
            .unwrap_or_default();
        let mut rows: Vec<Row> = rows
            .into_iter()
            .filter(|row| descriptor.filter().matches(row))
            .collect();
        if let Projection::Columns(columns) = descriptor.projection() {
            for row in &mut rows {
                row.project(columns);
            }
        }
        Ok(rows)
    }

    async fn subscribe(
        &self,
        resource: &str,
        filter: &Filter,
        events: mpsc::Sender<ChangeEvent>,
    ) -> Result<FeedHandle, ChannelError> {
        let mut state = self.lock();
        if state.failing_subscribes > 0 {
            state.failing_subscribes -= 1;
            return Err(ChannelError::recoverable("simulated subscribe failure"));
        }

        let id = state.next_feed_id;
        state.next_feed_id += 1;
        state
            .feeds
            .entry(resource.to_string())
            .or_default()
            .push(FeedEntry {
                id,
                filter: filter.clone(),
                tx: events,
            });

        let shared = self.state.clone();
        let resource = resource.to_string();
        Ok(FeedHandle::new(move || {
            Self::remove_feed(&shared, &resource, id);
        }))
    }
}
