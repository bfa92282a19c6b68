//! Consumer handle for one live query.
//!
//! A `Subscription` binds one resource descriptor and one merge policy to a
//! shared change-feed channel. It seeds its snapshot from the initial fetch,
//! folds feed events onto it in receipt order, and delivers materialized
//! snapshots to the consumer either by pulling ([`next`](Subscription::next))
//! or via a callback task ([`on_update`](Subscription::on_update)).
//!
//! Events that arrive while the initial fetch is in flight are buffered and
//! replayed, in arrival order, once the fetch resolves — never dropped,
//! never applied twice. A failed fetch leaves the snapshot empty but keeps
//! the live channel attached, so the consumer still receives later changes.

use crate::backend::Backend;
use crate::descriptor::{ChannelKey, ResourceDescriptor};
use crate::error::{ChannelError, FetchError};
use crate::event::{ChangeEvent, FeedMessage};
use crate::merge::MergePolicy;
use crate::registry::{ChannelRegistry, ObserverHandle};
use crate::row::Row;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

type FetchResult = Result<Vec<Row>, FetchError>;

/// An update delivered to the consumer.
#[derive(Debug, Clone)]
pub enum LiveUpdate<S> {
    /// The snapshot changed (seeded, or an event was folded in).
    Snapshot(S),
    /// The initial fetch (or a resync fetch) failed. The snapshot keeps its
    /// previous value; live events still apply.
    FetchFailed(FetchError),
    /// The change feed is down. `recoverable` on the error says whether the
    /// channel is still retrying.
    FeedDown(ChannelError),
    /// The change feed came back after a loss. Events emitted during the gap
    /// were not delivered; call [`Subscription::resync`] to close it.
    FeedRestored,
}

/// One consumer's live view of a resource.
pub struct Subscription<P: MergePolicy> {
    descriptor: Arc<ResourceDescriptor>,
    policy: P,
    snapshot: P::Snapshot,
    seed_rx: Option<oneshot::Receiver<FetchResult>>,
    feed_rx: mpsc::Receiver<FeedMessage>,
    feed_done: bool,
    buffered: Vec<ChangeEvent>,
    pending: VecDeque<LiveUpdate<P::Snapshot>>,
    observer: Option<ObserverHandle>,
    registry: Arc<ChannelRegistry>,
    backend: Arc<dyn Backend>,
    loading: bool,
    live: bool,
    closed: bool,
}

enum Step {
    Seed(FetchResult),
    SeedLost,
    Feed(FeedMessage),
    FeedClosed,
}

impl<P: MergePolicy> Subscription<P> {
    pub(crate) fn new(
        descriptor: Arc<ResourceDescriptor>,
        policy: P,
        seed_rx: oneshot::Receiver<FetchResult>,
        feed_rx: mpsc::Receiver<FeedMessage>,
        observer: ObserverHandle,
        registry: Arc<ChannelRegistry>,
        backend: Arc<dyn Backend>,
    ) -> Self {
        Self {
            descriptor,
            policy,
            snapshot: P::Snapshot::default(),
            seed_rx: Some(seed_rx),
            feed_rx,
            feed_done: false,
            buffered: Vec::new(),
            pending: VecDeque::new(),
            observer: Some(observer),
            registry,
            backend,
            loading: true,
            live: true,
            closed: false,
        }
    }

    /// Receive the next update.
    ///
    /// Returns `None` once the subscription is closed (or its channel is
    /// gone) and all pending updates have been drained.
    pub async fn next(&mut self) -> Option<LiveUpdate<P::Snapshot>> {
        loop {
            if let Some(update) = self.pending.pop_front() {
                return Some(update);
            }
            if self.closed {
                return None;
            }

            let step = match (self.seed_rx.as_mut(), self.feed_done) {
                (None, true) => return None,
                (Some(seed_rx), true) => match seed_rx.await {
                    Ok(result) => Step::Seed(result),
                    Err(_) => Step::SeedLost,
                },
                (Some(seed_rx), false) => {
                    let feed_rx = &mut self.feed_rx;
                    tokio::select! {
                        seed = seed_rx => match seed {
                            Ok(result) => Step::Seed(result),
                            Err(_) => Step::SeedLost,
                        },
                        message = feed_rx.recv() => match message {
                            Some(message) => Step::Feed(message),
                            None => Step::FeedClosed,
                        },
                    }
                }
                (None, false) => match self.feed_rx.recv().await {
                    Some(message) => Step::Feed(message),
                    None => Step::FeedClosed,
                },
            };

            match step {
                Step::Seed(result) => {
                    self.seed_rx = None;
                    self.apply_seed(result);
                }
                Step::SeedLost => {
                    self.seed_rx = None;
                    let error = FetchError::new(
                        self.descriptor.resource(),
                        "fetch task dropped before completing",
                    );
                    self.apply_seed(Err(error));
                }
                Step::Feed(message) => self.apply_feed(message),
                Step::FeedClosed => self.feed_done = true,
            }
        }
    }

    /// Hand the subscription to a background task that invokes `callback`
    /// for every update. The returned handle closes the subscription.
    pub fn on_update<F>(mut self, mut callback: F) -> UpdateHandle
    where
        F: FnMut(LiveUpdate<P::Snapshot>) + Send + 'static,
    {
        let (close_tx, mut close_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut close_rx => {
                        self.close();
                        break;
                    }
                    update = self.next() => match update {
                        Some(update) => callback(update),
                        None => break,
                    }
                }
            }
        });
        UpdateHandle {
            close_tx: Some(close_tx),
            _task: task,
        }
    }

    /// Current materialized snapshot.
    pub fn snapshot(&self) -> &P::Snapshot {
        &self.snapshot
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    pub fn channel_key(&self) -> ChannelKey {
        self.descriptor.channel_key()
    }

    /// Whether the initial fetch (or a resync) is still in flight.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Whether the change feed is currently believed to be up.
    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Re-run the initial fetch and reseed the snapshot, e.g. after a
    /// [`LiveUpdate::FeedRestored`]. Events arriving during the resync are
    /// buffered and replayed onto the fresh snapshot.
    pub fn resync(&mut self) {
        if self.closed {
            return;
        }
        log::debug!("resync requested for '{}'", self.descriptor.resource());
        self.buffered.clear();
        self.loading = true;
        self.seed_rx = Some(spawn_fetch(self.backend.clone(), self.descriptor.clone()));
    }

    /// Close the subscription and release its channel observer slot.
    ///
    /// Safe to call multiple times — subsequent calls are no-ops. A fetch
    /// that resolves after close is discarded, as are buffered events.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.seed_rx = None;
        self.buffered.clear();
        self.pending.clear();
        if let Some(observer) = self.observer.take() {
            if let Err(error) = self.registry.release(&observer) {
                log::error!("releasing subscription observer failed: {}", error);
            }
        }
    }

    fn apply_seed(&mut self, result: FetchResult) {
        self.loading = false;
        match result {
            Ok(rows) => {
                let rows = self.validate_rows(rows);
                self.snapshot = self.policy.seed(rows);
            }
            Err(error) => {
                log::warn!("{}", error);
                self.pending.push_back(LiveUpdate::FetchFailed(error));
            }
        }
        for event in std::mem::take(&mut self.buffered) {
            self.merge(event);
        }
        self.pending
            .push_back(LiveUpdate::Snapshot(self.snapshot.clone()));
    }

    fn apply_feed(&mut self, message: FeedMessage) {
        match message {
            FeedMessage::Event(event) => {
                if self.loading {
                    self.buffered.push(event);
                } else {
                    self.merge(event);
                    self.pending
                        .push_back(LiveUpdate::Snapshot(self.snapshot.clone()));
                }
            }
            FeedMessage::Down(error) => {
                self.live = false;
                self.pending.push_back(LiveUpdate::FeedDown(error));
            }
            FeedMessage::Restored => {
                self.live = true;
                self.pending.push_back(LiveUpdate::FeedRestored);
            }
        }
    }

    fn merge(&mut self, event: ChangeEvent) {
        let Some(event) = self.validate_event(event) else {
            return;
        };
        let snapshot = std::mem::take(&mut self.snapshot);
        self.snapshot = self.policy.apply(snapshot, &event);
    }

    fn validate_rows(&self, rows: Vec<Row>) -> Vec<Row> {
        let Some(schema) = self.descriptor.schema() else {
            return rows;
        };
        rows.into_iter()
            .filter_map(|row| match schema.validate(row) {
                Ok(row) => Some(row),
                Err(violation) => {
                    log::warn!("dropping fetched row: {}", violation);
                    None
                }
            })
            .collect()
    }

    fn validate_event(&self, event: ChangeEvent) -> Option<ChangeEvent> {
        let Some(schema) = self.descriptor.schema() else {
            return Some(event);
        };
        match schema.validate(event.row().clone()) {
            Ok(row) => Some(event.with_row(row)),
            Err(violation) => {
                log::warn!("dropping change event: {}", violation);
                None
            }
        }
    }
}

impl<P: MergePolicy> Drop for Subscription<P> {
    fn drop(&mut self) {
        if let Some(observer) = self.observer.take() {
            if let Err(error) = self.registry.release(&observer) {
                log::error!("releasing subscription observer on drop failed: {}", error);
            }
        }
    }
}

/// Handle for a callback-driven subscription, returned by
/// [`Subscription::on_update`]. Closing is idempotent and also happens on
/// drop.
pub struct UpdateHandle {
    close_tx: Option<oneshot::Sender<()>>,
    _task: tokio::task::JoinHandle<()>,
}

impl UpdateHandle {
    pub fn close(&mut self) {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
    }
}

impl Drop for UpdateHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Run the descriptor's fetch on a background task; the receiver resolves
/// with the result. Dropping the receiver discards the result, which is what
/// makes closing during an in-flight fetch safe.
pub(crate) fn spawn_fetch(
    backend: Arc<dyn Backend>,
    descriptor: Arc<ResourceDescriptor>,
) -> oneshot::Receiver<FetchResult> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let result = backend.fetch(&descriptor).await;
        let _ = tx.send(result);
    });
    rx
}
