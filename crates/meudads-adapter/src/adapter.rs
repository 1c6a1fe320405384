//! Statement executor and prepared-statement facade.
//!
//! `Adapter::execute` is the single pipeline every statement goes
//! through: dialect rewrite, placeholder normalization, parameter-count
//! validation, backend dispatch, result normalization. The facade
//! (`prepare` / `bind` / `first` / `all` / `run`) is a thin layer over
//! it matching the interface the worker was written against.

use std::sync::Arc;
use std::time::Instant;

use asupersync::{Cx, Outcome};
use meudads_core::{
    Error, QueryErrorKind, QueryMeta, QueryResult, Result, Row, RunResult, Value,
};
use meudads_rewrite::{normalize_placeholders, parameter_count, rewrite};
use tracing::{debug, error};

use crate::backend::{Backend, BackendKind};

/// A handle over one backend. Cheap to clone; all clones share the
/// same connection.
#[derive(Clone)]
pub struct Adapter {
    backend: Arc<Backend>,
}

impl Adapter {
    pub(crate) fn new(backend: Arc<Backend>) -> Self {
        Self { backend }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Prepare a statement for later binding and execution.
    ///
    /// No round trip happens here; the SQL is rewritten and validated
    /// when the statement runs.
    pub fn prepare(&self, sql: impl Into<String>) -> Statement {
        Statement {
            adapter: self.clone(),
            sql: sql.into(),
        }
    }

    /// Execute a statement against the backend.
    pub fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<QueryResult, Error>> + Send {
        let result = self.execute_sync(sql, params);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn execute_sync(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let rewritten = rewrite(sql);
        let normalized = normalize_placeholders(&rewritten);
        let expected = parameter_count(&normalized);
        if expected != params.len() {
            return Err(Error::query(
                QueryErrorKind::Parameters,
                format!(
                    "statement expects {expected} parameters but {} were bound",
                    params.len()
                ),
            ));
        }

        let start = Instant::now();
        match self.backend.execute(&normalized, params) {
            Ok(raw) => {
                let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
                let (changes, changes_estimated) = match raw.affected {
                    Some(n) => (n, false),
                    // Backends without native counts (the fallback) get the
                    // leading-keyword estimate the original shim used.
                    None if is_write_statement(&normalized) => {
                        (u64::try_from(raw.rows.len()).unwrap_or(0).max(1), true)
                    }
                    None => (0, false),
                };
                let meta = QueryMeta {
                    duration_ms,
                    rows_read: raw.rows.len() as u64,
                    changes,
                    changes_estimated,
                };
                debug!(
                    sql = %normalized,
                    rows = raw.rows.len(),
                    changes,
                    backend = self.backend.kind().as_str(),
                    "statement executed"
                );
                Ok(QueryResult::new(raw.rows, meta))
            }
            Err(err) => {
                error!(
                    original_sql = sql,
                    rewritten_sql = %normalized,
                    param_count = params.len(),
                    error = %err,
                    "statement failed"
                );
                Err(err)
            }
        }
    }
}

/// Leading-keyword write detection, case-insensitive.
fn is_write_statement(sql: &str) -> bool {
    let trimmed = sql.trim_start();
    ["INSERT", "UPDATE", "DELETE"]
        .iter()
        .any(|kw| starts_with_keyword(trimmed, kw))
}

fn starts_with_keyword(sql: &str, keyword: &str) -> bool {
    let (sql, keyword) = (sql.as_bytes(), keyword.as_bytes());
    sql.len() >= keyword.len()
        && sql[..keyword.len()].eq_ignore_ascii_case(keyword)
        && sql
            .get(keyword.len())
            .is_none_or(|b| !b.is_ascii_alphanumeric() && *b != b'_')
}

/// A prepared statement. Bind parameters with [`bind`](Self::bind), or
/// call the terminal operations directly when there are none.
pub struct Statement {
    adapter: Adapter,
    sql: String,
}

impl Statement {
    /// Bind positional parameters.
    pub fn bind<I>(&self, params: I) -> BoundStatement
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        BoundStatement {
            adapter: self.adapter.clone(),
            sql: self.sql.clone(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    /// First row, or `None` for an empty result.
    pub fn first(&self, _cx: &Cx) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        let result = self
            .adapter
            .execute_sync(&self.sql, &[])
            .map(QueryResult::into_first);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    /// Full row sequence with metadata.
    pub fn all(&self, _cx: &Cx) -> impl Future<Output = Outcome<QueryResult, Error>> + Send {
        let result = self.adapter.execute_sync(&self.sql, &[]);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    /// Execute for effect, returning a write acknowledgement.
    pub fn run(&self, _cx: &Cx) -> impl Future<Output = Outcome<RunResult, Error>> + Send {
        let result = self
            .adapter
            .execute_sync(&self.sql, &[])
            .map(|r| RunResult::ok(r.meta));
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }
}

/// A statement with its parameters attached.
pub struct BoundStatement {
    adapter: Adapter,
    sql: String,
    params: Vec<Value>,
}

impl BoundStatement {
    /// First row, or `None` for an empty result.
    pub fn first(&self, _cx: &Cx) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        let result = self
            .adapter
            .execute_sync(&self.sql, &self.params)
            .map(QueryResult::into_first);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    /// Full row sequence with metadata.
    pub fn all(&self, _cx: &Cx) -> impl Future<Output = Outcome<QueryResult, Error>> + Send {
        let result = self.adapter.execute_sync(&self.sql, &self.params);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    /// Execute for effect. `success` is true whenever the statement
    /// ran, including writes that touched zero rows.
    pub fn run(&self, _cx: &Cx) -> impl Future<Output = Outcome<RunResult, Error>> + Send {
        let result = self
            .adapter
            .execute_sync(&self.sql, &self.params)
            .map(|r| RunResult::ok(r.meta));
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_detection_is_leading_keyword_only() {
        assert!(is_write_statement("INSERT INTO t VALUES ($1)"));
        assert!(is_write_statement("  update t set x = $1"));
        assert!(is_write_statement("DELETE FROM t"));
        assert!(!is_write_statement("SELECT * FROM inserts"));
        assert!(!is_write_statement("UPDATES_VIEW"));
        assert!(!is_write_statement("WITH x AS (SELECT 1) SELECT * FROM x"));
    }
}
