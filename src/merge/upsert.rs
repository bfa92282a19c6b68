//! Keyed upsert for ordered list resources.

use super::{MergeConflict, MergePolicy};
use crate::event::ChangeEvent;
use crate::row::{Row, RowKey};

/// Where newly inserted rows land in the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertPosition {
    /// New rows go to the front (newest-first feeds).
    Prepend,
    /// New rows go to the back (stable admin lists).
    #[default]
    Append,
}

/// Policy for list resources keyed by a primary-key column.
///
/// Inserts land at the configured position (replacing in place if the key is
/// already present, which makes duplicate delivery a no-op). Updates replace
/// the matching row without moving it; an update for an absent key is treated
/// as an insert, self-healing against missed events. Deletes remove by key.
#[derive(Debug, Clone)]
pub struct UpsertById {
    key_field: String,
    position: InsertPosition,
}

impl UpsertById {
    /// Upsert keyed by `key_field`, appending new rows.
    pub fn new(key_field: impl Into<String>) -> Self {
        Self {
            key_field: key_field.into(),
            position: InsertPosition::default(),
        }
    }

    pub fn with_position(mut self, position: InsertPosition) -> Self {
        self.position = position;
        self
    }

    fn key_of(&self, row: &Row) -> Option<RowKey> {
        let key = row.key(&self.key_field);
        if key.is_none() {
            MergeConflict::log(
                "upsert_by_id",
                format!("event row has no usable '{}' key", self.key_field),
            );
        }
        key
    }

    fn upsert(&self, mut rows: Vec<Row>, key: &RowKey, row: &Row) -> Vec<Row> {
        match rows
            .iter()
            .position(|existing| existing.key(&self.key_field).as_ref() == Some(key))
        {
            Some(index) => rows[index] = row.clone(),
            None => match self.position {
                InsertPosition::Prepend => rows.insert(0, row.clone()),
                InsertPosition::Append => rows.push(row.clone()),
            },
        }
        rows
    }
}

impl MergePolicy for UpsertById {
    type Snapshot = Vec<Row>;

    fn seed(&self, rows: Vec<Row>) -> Self::Snapshot {
        rows
    }

    fn apply(&self, snapshot: Self::Snapshot, event: &ChangeEvent) -> Self::Snapshot {
        match event {
            ChangeEvent::Inserted { row } | ChangeEvent::Updated { row, .. } => {
                match self.key_of(row) {
                    Some(key) => self.upsert(snapshot, &key, row),
                    None => snapshot,
                }
            }
            ChangeEvent::Deleted { row } => {
                let Some(key) = self.key_of(row) else {
                    return snapshot;
                };
                let mut rows = snapshot;
                let before = rows.len();
                rows.retain(|existing| existing.key(&self.key_field).as_ref() != Some(&key));
                if rows.len() == before {
                    MergeConflict::log(
                        "upsert_by_id",
                        format!("delete for key '{}' not present in snapshot", key),
                    );
                }
                rows
            }
        }
    }
}
