//! Capped newest-first append for feed-like resources.

use super::MergePolicy;
use crate::event::ChangeEvent;
use crate::row::Row;

/// Policy for capped newest-first lists (latest comments, recent activity).
///
/// Only inserts apply: the new row is prepended and the list truncated to
/// `max` entries. Updates and deletes are ignored; the rows age out anyway.
#[derive(Debug, Clone)]
pub struct AppendOnInsert {
    max: usize,
}

impl AppendOnInsert {
    /// Keep at most `max` rows, newest first.
    pub fn new(max: usize) -> Self {
        Self { max }
    }
}

impl MergePolicy for AppendOnInsert {
    type Snapshot = Vec<Row>;

    fn seed(&self, mut rows: Vec<Row>) -> Self::Snapshot {
        rows.truncate(self.max);
        rows
    }

    fn apply(&self, snapshot: Self::Snapshot, event: &ChangeEvent) -> Self::Snapshot {
        match event {
            ChangeEvent::Inserted { row } => {
                let mut rows = snapshot;
                rows.insert(0, row.clone());
                rows.truncate(self.max);
                rows
            }
            ChangeEvent::Updated { .. } | ChangeEvent::Deleted { .. } => snapshot,
        }
    }
}
