//! Change events delivered by the feed, and the messages fanned out to
//! channel observers.

use crate::error::ChannelError;
use crate::row::Row;

/// A single row change received from the change feed.
///
/// Events arrive asynchronously and unordered relative to the initial fetch;
/// the subscription buffers them while the fetch is in flight and the keyed
/// merge policies tolerate duplicates and gaps.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A row was inserted.
    Inserted {
        /// The new row.
        row: Row,
    },

    /// A row was updated.
    Updated {
        /// Current row values.
        row: Row,
        /// Previous row values, when the backend supplies them.
        previous: Option<Row>,
    },

    /// A row was deleted.
    Deleted {
        /// The deleted row (at least its key fields).
        row: Row,
    },
}

impl ChangeEvent {
    /// The row the event refers to (current values for insert/update, last
    /// known values for delete).
    pub fn row(&self) -> &Row {
        match self {
            Self::Inserted { row } | Self::Updated { row, .. } | Self::Deleted { row } => row,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Inserted { .. } => ChangeKind::Inserted,
            Self::Updated { .. } => ChangeKind::Updated,
            Self::Deleted { .. } => ChangeKind::Deleted,
        }
    }

    /// Replace the event's row, keeping kind and previous values.
    pub(crate) fn with_row(self, row: Row) -> Self {
        match self {
            Self::Inserted { .. } => Self::Inserted { row },
            Self::Updated { previous, .. } => Self::Updated { row, previous },
            Self::Deleted { .. } => Self::Deleted { row },
        }
    }
}

/// Discriminant of a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Inserted,
    Updated,
    Deleted,
}

/// What a channel delivers to each of its observers.
#[derive(Debug, Clone)]
pub enum FeedMessage {
    /// A row change on the watched resource.
    Event(ChangeEvent),
    /// The feed is down; `recoverable` on the error says whether the channel
    /// is still retrying.
    Down(ChannelError),
    /// The feed was re-established after a loss. Events emitted while the
    /// feed was down are gone; consumers may resync.
    Restored,
}
