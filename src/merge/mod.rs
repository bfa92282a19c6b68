//! Merge policies: pure folds of change events onto snapshots.
//!
//! Every page shape observed in the product reduces to one of four policies:
//! a settings-like singleton ([`Replace`]), a keyed list ([`UpsertById`]),
//! a capped newest-first list ([`AppendOnInsert`]), and a per-key tally
//! ([`CounterAggregate`]). All are stateless; feed delivery is at-least-once
//! and not strictly ordered, so the keyed policies are written to make
//! duplicate application a no-op and to self-heal from missed events where
//! possible.

mod append;
mod counter;
mod replace;
mod upsert;

pub use append::AppendOnInsert;
pub use counter::CounterAggregate;
pub use replace::Replace;
pub use upsert::{InsertPosition, UpsertById};

use crate::event::ChangeEvent;
use crate::row::Row;

/// A deterministic fold of one change event onto one snapshot.
///
/// Implementations must be pure: no hidden shared state, the next snapshot
/// depends only on the prior snapshot and the event.
pub trait MergePolicy: Send + Sync + 'static {
    /// The materialized view state this policy produces.
    type Snapshot: Clone + Default + Send + Sync + 'static;

    /// Seed a snapshot from the rows of the initial fetch.
    fn seed(&self, rows: Vec<Row>) -> Self::Snapshot;

    /// Fold one event onto the snapshot.
    fn apply(&self, snapshot: Self::Snapshot, event: &ChangeEvent) -> Self::Snapshot;
}

/// A tolerated inconsistency between the feed and the local snapshot, e.g. a
/// delete for a key the snapshot never held. Logged, never thrown; the
/// consumer can request a resync if it cares.
#[derive(Debug, Clone)]
pub struct MergeConflict {
    /// Policy that observed the conflict.
    pub policy: &'static str,
    /// What was inconsistent.
    pub detail: String,
}

impl MergeConflict {
    pub(crate) fn log(policy: &'static str, detail: impl Into<String>) {
        let conflict = Self {
            policy,
            detail: detail.into(),
        };
        log::warn!("merge conflict in {}: {}", conflict.policy, conflict.detail);
    }
}
