//! Backend dispatch: a live PostgreSQL connection or the in-memory fallback.

use std::sync::Mutex;

use meudads_core::{Result, Row, Value};
use meudads_postgres::PgConnection;

use crate::fallback::FallbackBackend;

/// Which backend a handle ended up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Postgres,
    Fallback,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Fallback => "fallback",
        }
    }
}

/// Raw rows plus the native affected-row count, when the backend has one.
#[derive(Debug)]
pub(crate) struct BackendResult {
    pub rows: Vec<Row>,
    pub affected: Option<u64>,
}

pub(crate) enum Backend {
    Postgres(Mutex<PgConnection>),
    Fallback(FallbackBackend),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Postgres(_) => BackendKind::Postgres,
            Self::Fallback(_) => BackendKind::Fallback,
        }
    }

    /// Execute one statement. `sql` is already rewritten to `$n` placeholders.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<BackendResult> {
        match self {
            Self::Postgres(conn) => {
                // A poisoned lock means a prior statement panicked mid-query;
                // the stream offset is unknown, so recover the guard and let
                // the next round trip surface any desync as a protocol error.
                let mut conn = match conn.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let result = conn.query(sql, params)?;
                Ok(BackendResult {
                    affected: result.rows_affected(),
                    rows: result.rows,
                })
            }
            Self::Fallback(fallback) => Ok(fallback.execute(sql, params)),
        }
    }
}
