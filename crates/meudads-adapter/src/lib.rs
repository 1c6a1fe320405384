//! SQLite-flavored prepared-statement interface over PostgreSQL.
//!
//! The worker was written against an embedded-database API:
//! `prepare(sql).bind(params).first() / .all() / .run()`, with SQL in
//! SQLite's dialect. This crate keeps that contract while executing
//! against PostgreSQL: statements are rewritten textually (see
//! `meudads-rewrite`), placeholders normalized to `$n`, and results
//! surfaced as `QueryResult` rows plus execution metadata.
//!
//! The [`AdapterHandle`] is built once from [`EnvConfig`] and shared;
//! without a `DATABASE_URL`, or when the probe fails, it downgrades to
//! an in-memory fallback backend that keeps the login path answerable
//! (opt-in, see [`fallback`]).

pub mod adapter;
pub mod backend;
pub mod factory;
pub mod fallback;

pub use adapter::{Adapter, BoundStatement, Statement};
pub use backend::BackendKind;
pub use factory::{AdapterHandle, EnvConfig};
pub use fallback::FALLBACK_ADMIN_EMAIL;

pub use meudads_core::{
    Cx, Error, Outcome, QueryMeta, QueryResult, Result, Row, RunResult, Value,
};
