//! Resource descriptors: what to fetch and what to watch.

use crate::schema::RowSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identifies a watchable resource: a backend table, an optional row filter,
/// and a column projection. Immutable once a subscription is opened from it.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    resource: String,
    filter: Filter,
    projection: Projection,
    schema: Option<RowSchema>,
}

impl ResourceDescriptor {
    /// Watch a whole table.
    pub fn table(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            filter: Filter::All,
            projection: Projection::All,
            schema: None,
        }
    }

    /// Narrow the watch to rows where `column == value`.
    pub fn filter_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter = Filter::Eq {
            column: column.into(),
            value: value.into(),
        };
        self
    }

    /// Project to the listed columns; the default is all columns.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Projection::Columns(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Validate and coerce rows against `schema` at the fetch/event boundary.
    pub fn with_schema(mut self, schema: RowSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn schema(&self) -> Option<&RowSchema> {
        self.schema.as_ref()
    }

    /// Key of the underlying change-feed channel. Descriptors with equal keys
    /// share one channel regardless of projection or schema, which only shape
    /// the local view.
    pub fn channel_key(&self) -> ChannelKey {
        ChannelKey(format!("{}|{}", self.resource, self.filter.signature()))
    }
}

/// Row filter applied server-side to both the fetch and the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Every row of the resource.
    All,
    /// Rows where `column` equals `value`.
    Eq { column: String, value: Value },
}

impl Filter {
    /// Stable text form used in channel keys.
    fn signature(&self) -> String {
        match self {
            Filter::All => "all".to_string(),
            Filter::Eq { column, value } => match value {
                Value::String(s) => format!("{}={}", column, s),
                other => format!("{}={}", column, other),
            },
        }
    }

    /// Whether `row` passes the filter.
    pub fn matches(&self, row: &crate::row::Row) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq { column, value } => row.get(column) == Some(value),
        }
    }
}

/// Column projection for the initial fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// All columns.
    All,
    /// Only the listed columns.
    Columns(Vec<String>),
}

/// Identity of one underlying change-feed channel: resource name plus filter
/// signature, e.g. `gallery|all` or `settings|id=1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey(String);

impl ChannelKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Row;
    use serde_json::json;

    #[test]
    fn test_channel_key_for_full_table() {
        let descriptor = ResourceDescriptor::table("gallery");
        assert_eq!(descriptor.channel_key().to_string(), "gallery|all");
    }

    #[test]
    fn test_channel_key_for_filtered_resource() {
        let descriptor = ResourceDescriptor::table("settings").filter_eq("id", 1);
        assert_eq!(descriptor.channel_key().to_string(), "settings|id=1");
    }

    #[test]
    fn test_channel_key_ignores_projection() {
        let wide = ResourceDescriptor::table("news");
        let narrow = ResourceDescriptor::table("news").columns(["id", "title"]);
        assert_eq!(wide.channel_key(), narrow.channel_key());
    }

    #[test]
    fn test_eq_filter_matches_rows() {
        let filter = Filter::Eq {
            column: "unit".to_string(),
            value: json!("kindergarten"),
        };
        let hit = Row::from_value(json!({"id": 1, "unit": "kindergarten"})).unwrap();
        let miss = Row::from_value(json!({"id": 2, "unit": "preschool"})).unwrap();
        assert!(filter.matches(&hit));
        assert!(!filter.matches(&miss));
    }
}
