//! Optimistic pending-mutation overlay.
//!
//! Write flows like like/unlike want the UI to move before the backend
//! confirms. Instead of hand-rolled apply-then-rollback, the overlay stages
//! the mutation as a regular change event folded through the subscription's
//! own merge policy: [`view`](PendingMutations::view) is the confirmed base
//! snapshot with all staged mutations applied. When the write lands,
//! [`confirm`](PendingMutations::confirm) folds the mutation into the base
//! (the echoed feed event dedups through the keyed policy); if the write
//! fails, [`revert`](PendingMutations::revert) drops it and the view falls
//! back to confirmed state.

use crate::event::ChangeEvent;
use crate::merge::MergePolicy;

/// Identifier of one staged mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationId(u64);

/// A snapshot overlay holding not-yet-confirmed local mutations.
pub struct PendingMutations<P: MergePolicy> {
    policy: P,
    base: P::Snapshot,
    staged: Vec<(MutationId, ChangeEvent)>,
    next_id: u64,
}

impl<P: MergePolicy> PendingMutations<P> {
    /// An overlay with an empty base snapshot.
    pub fn new(policy: P) -> Self {
        Self {
            policy,
            base: P::Snapshot::default(),
            staged: Vec::new(),
            next_id: 0,
        }
    }

    /// Adopt a confirmed snapshot (typically from
    /// [`LiveUpdate::Snapshot`](crate::subscription::LiveUpdate::Snapshot)).
    /// Staged mutations stay pending and keep overlaying the new base.
    pub fn sync(&mut self, snapshot: P::Snapshot) {
        self.base = snapshot;
    }

    /// Stage a local mutation ahead of its write.
    pub fn stage(&mut self, event: ChangeEvent) -> MutationId {
        let id = MutationId(self.next_id);
        self.next_id += 1;
        self.staged.push((id, event));
        id
    }

    /// The write succeeded: fold the mutation into the confirmed base.
    /// Returns false if `id` was not pending.
    pub fn confirm(&mut self, id: MutationId) -> bool {
        let Some(index) = self.staged.iter().position(|(staged, _)| *staged == id) else {
            return false;
        };
        let (_, event) = self.staged.remove(index);
        let base = std::mem::take(&mut self.base);
        self.base = self.policy.apply(base, &event);
        true
    }

    /// The write failed: drop the mutation. Returns false if `id` was not
    /// pending.
    pub fn revert(&mut self, id: MutationId) -> bool {
        let before = self.staged.len();
        self.staged.retain(|(staged, _)| *staged != id);
        self.staged.len() != before
    }

    /// Confirmed base with all staged mutations applied, in staging order.
    pub fn view(&self) -> P::Snapshot {
        let mut snapshot = self.base.clone();
        for (_, event) in &self.staged {
            snapshot = self.policy.apply(snapshot, event);
        }
        snapshot
    }

    /// Number of staged, unconfirmed mutations.
    pub fn pending_len(&self) -> usize {
        self.staged.len()
    }
}
