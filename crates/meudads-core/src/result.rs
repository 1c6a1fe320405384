//! Normalized execution results.
//!
//! Every statement the adapter executes produces a [`QueryResult`]: a row
//! sequence (never "null" - an empty result is an empty vector) plus
//! [`QueryMeta`] describing the round trip. Write statements surface a
//! [`RunResult`] acknowledgement instead of the rows themselves.

use crate::row::Row;
use serde::Serialize;

/// Execution metadata attached to every result.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryMeta {
    /// Round-trip duration in milliseconds.
    pub duration_ms: f64,
    /// Number of rows read (result rows returned).
    pub rows_read: u64,
    /// Number of rows written. Native count when the backend reports one,
    /// heuristic estimate otherwise (see `changes_estimated`).
    pub changes: u64,
    /// True when `changes` was estimated rather than reported by the backend.
    pub changes_estimated: bool,
}

/// The normalized result of executing one statement.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Result rows, in arrival order. Empty for statements returning no rows.
    pub rows: Vec<Row>,
    /// Execution metadata.
    pub meta: QueryMeta,
}

impl QueryResult {
    /// Create a result from rows and metadata.
    pub fn new(rows: Vec<Row>, meta: QueryMeta) -> Self {
        Self { rows, meta }
    }

    /// Take the first row, if any.
    pub fn into_first(mut self) -> Option<Row> {
        if self.rows.is_empty() {
            None
        } else {
            Some(self.rows.swap_remove(0))
        }
    }

    /// Number of rows in the result.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the result contains no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Acknowledgement returned by `run()` for write statements.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// Always true when the statement executed without error; failures are
    /// reported through the error channel, never through this flag.
    pub success: bool,
    /// Execution metadata; `meta.changes` carries the changed-row count.
    pub meta: QueryMeta,
}

impl RunResult {
    /// Build a success acknowledgement from execution metadata.
    pub fn ok(meta: QueryMeta) -> Self {
        Self {
            success: true,
            meta,
        }
    }

    /// Changed-row count shortcut.
    pub fn changes(&self) -> u64 {
        self.meta.changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn empty_result_is_empty_sequence() {
        let result = QueryResult::default();
        assert!(result.is_empty());
        assert_eq!(result.len(), 0);
        assert!(result.into_first().is_none());
    }

    #[test]
    fn into_first_returns_leading_row() {
        let rows = vec![
            Row::new(vec!["n".to_string()], vec![Value::Int(1)]),
            Row::new(vec!["n".to_string()], vec![Value::Int(2)]),
        ];
        let result = QueryResult::new(rows, QueryMeta::default());
        let first = result.into_first().expect("row");
        assert_eq!(first.get(0), Some(&Value::Int(1)));
    }

    #[test]
    fn run_result_reports_changes() {
        let meta = QueryMeta {
            changes: 3,
            ..Default::default()
        };
        let ack = RunResult::ok(meta);
        assert!(ack.success);
        assert_eq!(ack.changes(), 3);
    }
}
