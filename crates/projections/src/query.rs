//! Filter and paging model for query stores.

use serde::Serialize;

/// AND-conjunction of field equality filters plus paging.
///
/// Field names refer to the serialized (JSON) form of the row; values are
/// compared as JSON.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    filters: Vec<(String, serde_json::Value)>,
    offset: usize,
    limit: Option<usize>,
}

impl Query {
    /// Matches every row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the filter `field == value`.
    pub fn and_eq(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn filters(&self) -> &[(String, serde_json::Value)] {
        &self.filters
    }

    pub fn skip(&self) -> usize {
        self.offset
    }

    pub fn take(&self) -> Option<usize> {
        self.limit
    }

    /// Returns true if the JSON form of a row passes every filter.
    /// A missing field only matches a `null` filter value.
    pub fn matches(&self, row: &serde_json::Value) -> bool {
        self.filters.iter().all(|(field, expected)| {
            row.get(field).unwrap_or(&serde_json::Value::Null) == expected
        })
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResults<R> {
    pub rows: Vec<R>,
    /// Number of matching rows before paging.
    pub total: usize,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl<R> QueryResults<R> {
    pub fn first(&self) -> Option<&R> {
        self.rows.first()
    }

    pub fn into_rows(self) -> Vec<R> {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
