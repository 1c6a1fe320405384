//! Core types for the MeuDads database adapter.
//!
//! This crate provides the foundational types shared by the dialect rewriter,
//! the PostgreSQL client and the adapter facade:
//!
//! - [`Value`] - dynamically typed SQL parameter/result values
//! - [`Row`] - a result row with shared column metadata
//! - [`QueryResult`] / [`QueryMeta`] - normalized execution results
//! - [`Error`] / [`Result`] - the error taxonomy
//! - `Outcome` re-export from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod error;
pub mod result;
pub mod row;
pub mod value;

pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, ProtocolError, QueryError,
    QueryErrorKind, Result, TypeError,
};
pub use result::{QueryMeta, QueryResult, RunResult};
pub use row::{ColumnInfo, Row};
pub use value::Value;
