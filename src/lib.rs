//! # aula-link
//!
//! Live content synchronization client for the Aula content backend.
//!
//! Public pages and admin forms render rows from backend tables and want to
//! stay current as staff edit them. This crate provides the one mechanism
//! they all share: a live query that fetches a resource once, attaches to
//! its change feed, folds incoming events onto a snapshot through a merge
//! policy, and hands the consumer a stream of materialized snapshots.
//!
//! - [`LiveClient::open`] performs the fetch-and-subscribe handshake and
//!   returns a [`Subscription`].
//! - [`merge`] has the four snapshot shapes the product uses: singleton row
//!   ([`Replace`]), keyed list ([`UpsertById`]), capped newest-first list
//!   ([`AppendOnInsert`]) and per-key tally ([`CounterAggregate`]).
//! - The [`ChannelRegistry`] guarantees that consumers watching the same
//!   filtered resource share one underlying feed channel.
//!
//! Fetch and feed failures degrade, they never crash: the subscription keeps
//! serving its last-known snapshot and reports the failure in-band as a
//! [`LiveUpdate`] variant.

pub mod backend;
pub mod client;
pub mod credentials;
pub mod descriptor;
pub mod error;
pub mod event;
pub mod event_handlers;
mod feed;
#[cfg(feature = "memory")]
pub mod memory;
pub mod merge;
pub mod optimistic;
pub mod options;
pub mod registry;
pub mod remote;
pub mod row;
pub mod schema;
pub mod subscription;
pub mod timeouts;

pub use backend::{Backend, FeedHandle};
pub use client::{LiveClient, LiveClientBuilder};
pub use credentials::Credentials;
pub use descriptor::{ChannelKey, Filter, Projection, ResourceDescriptor};
pub use error::{ChannelError, FetchError, LinkError, RegistryError, Result};
pub use event::{ChangeEvent, ChangeKind, FeedMessage};
pub use event_handlers::{DisconnectReason, EventHandlers};
#[cfg(feature = "memory")]
pub use memory::MemoryBackend;
pub use merge::{
    AppendOnInsert, CounterAggregate, InsertPosition, MergeConflict, MergePolicy, Replace,
    UpsertById,
};
pub use optimistic::{MutationId, PendingMutations};
pub use options::ChannelOptions;
pub use registry::{ChannelDriver, ChannelRegistry, FanOut, ObserverHandle};
pub use remote::RemoteBackend;
pub use row::{Row, RowKey};
pub use schema::{FieldType, RowSchema, SchemaViolation};
pub use subscription::{LiveUpdate, Subscription, UpdateHandle};
pub use timeouts::LinkTimeouts;
