//! Whole-row replacement for singleton resources.

use super::MergePolicy;
use crate::event::ChangeEvent;
use crate::row::Row;

/// Policy for single-row resources (site settings, contact info, hero text).
///
/// Any insert or update adopts the event's row as the snapshot; a delete
/// clears it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Replace;

impl MergePolicy for Replace {
    type Snapshot = Option<Row>;

    fn seed(&self, rows: Vec<Row>) -> Self::Snapshot {
        rows.into_iter().next()
    }

    fn apply(&self, _snapshot: Self::Snapshot, event: &ChangeEvent) -> Self::Snapshot {
        match event {
            ChangeEvent::Inserted { row } | ChangeEvent::Updated { row, .. } => Some(row.clone()),
            ChangeEvent::Deleted { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        Row::from_value(value).unwrap()
    }

    #[test]
    fn test_seed_takes_first_row() {
        let snapshot = Replace.seed(vec![row(json!({"id": 1})), row(json!({"id": 2}))]);
        assert_eq!(snapshot, Some(row(json!({"id": 1}))));
    }

    #[test]
    fn test_any_write_adopts_row() {
        let updated = row(json!({"id": 1, "phone": "555-0101"}));
        let snapshot = Replace.apply(
            Some(row(json!({"id": 1, "phone": "old"}))),
            &ChangeEvent::Updated {
                row: updated.clone(),
                previous: None,
            },
        );
        assert_eq!(snapshot, Some(updated));
    }

    #[test]
    fn test_delete_clears_snapshot() {
        let snapshot = Replace.apply(
            Some(row(json!({"id": 1}))),
            &ChangeEvent::Deleted {
                row: row(json!({"id": 1})),
            },
        );
        assert_eq!(snapshot, None);
    }
}
