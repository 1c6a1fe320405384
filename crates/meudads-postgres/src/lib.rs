//! Minimal synchronous PostgreSQL client.
//!
//! Implements the slice of the v3 wire protocol the MeuDads adapter
//! needs: password authentication (cleartext and MD5) and the extended
//! query flow with text-format parameters. No TLS, no SCRAM, no
//! pipelining.

pub mod config;
pub mod connection;
pub mod protocol;
pub mod types;

pub use config::PgConfig;
pub use connection::{PgConnection, PgQueryResult, parse_command_tag};
