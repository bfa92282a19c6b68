//! Per-key tallies derived from insert/delete traffic.

use super::{MergeConflict, MergePolicy};
use crate::event::ChangeEvent;
use crate::row::{Row, RowKey};
use std::collections::HashMap;

/// Policy for derived counters keyed by a foreign id (likes per post,
/// comments per article).
///
/// Inserts increment the counter for `row[key_field]`, deletes decrement it.
/// The feed is at-least-once and unordered, so a decrement can arrive for a
/// count already at zero; that is clamped and logged rather than treated as
/// fatal. Updates carry no counting information and are ignored.
#[derive(Debug, Clone)]
pub struct CounterAggregate {
    key_field: String,
}

impl CounterAggregate {
    /// Count rows grouped by `key_field`.
    pub fn new(key_field: impl Into<String>) -> Self {
        Self {
            key_field: key_field.into(),
        }
    }

    fn key_of(&self, row: &Row) -> Option<RowKey> {
        let key = row.key(&self.key_field);
        if key.is_none() {
            MergeConflict::log(
                "counter_aggregate",
                format!("event row has no usable '{}' key", self.key_field),
            );
        }
        key
    }
}

impl MergePolicy for CounterAggregate {
    type Snapshot = HashMap<RowKey, u64>;

    fn seed(&self, rows: Vec<Row>) -> Self::Snapshot {
        let mut counters = HashMap::new();
        for row in &rows {
            if let Some(key) = row.key(&self.key_field) {
                *counters.entry(key).or_insert(0) += 1;
            }
        }
        counters
    }

    fn apply(&self, snapshot: Self::Snapshot, event: &ChangeEvent) -> Self::Snapshot {
        let mut counters = snapshot;
        match event {
            ChangeEvent::Inserted { row } => {
                if let Some(key) = self.key_of(row) {
                    *counters.entry(key).or_insert(0) += 1;
                }
            }
            ChangeEvent::Deleted { row } => {
                if let Some(key) = self.key_of(row) {
                    match counters.get_mut(&key) {
                        Some(count) if *count > 0 => *count -= 1,
                        _ => MergeConflict::log(
                            "counter_aggregate",
                            format!("decrement for key '{}' already at zero", key),
                        ),
                    }
                }
            }
            ChangeEvent::Updated { .. } => {}
        }
        counters
    }
}
