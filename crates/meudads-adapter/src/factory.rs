//! Environment factory: configuration, backend selection, memoization.
//!
//! `Unconfigured -> Probing -> Ready(postgres) | Ready(fallback)`. The
//! probe runs once, on first use; whichever backend comes out of it is
//! fixed for the process lifetime. No retries, no reconnection.

use std::env;
use std::sync::{Arc, Mutex};

use meudads_core::Result;
use meudads_postgres::{PgConfig, PgConnection};
use tracing::{info, warn};

use crate::adapter::Adapter;
use crate::backend::{Backend, BackendKind};
use crate::fallback::FallbackBackend;

/// Environment configuration for the adapter.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    /// Postgres connection string. Absent means fallback mode.
    pub database_url: Option<String>,
    /// Session-signing secret, carried for the HTTP layer.
    pub session_secret: Option<String>,
    /// Opt-in for the fallback administrator record. Emergency access
    /// is never a silent default.
    pub fallback_admin: bool,
}

impl EnvConfig {
    /// Read `DATABASE_URL`, `SESSION_SECRET` and `MEUDADS_FALLBACK_ADMIN`.
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            session_secret: env::var("SESSION_SECRET").ok().filter(|v| !v.is_empty()),
            fallback_admin: env::var("MEUDADS_FALLBACK_ADMIN")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_fallback_admin(mut self, enabled: bool) -> Self {
        self.fallback_admin = enabled;
        self
    }
}

enum HandleState {
    Unconfigured,
    Ready(Arc<Backend>),
}

/// Long-lived holder of the backend. Construct one per process and
/// pass it by reference to request handlers.
///
/// Initialization is lazy and memoized: the first call to
/// [`adapter`](Self::adapter) connects and probes; concurrent first
/// use serializes on the internal mutex so only one connection is
/// opened.
pub struct AdapterHandle {
    config: EnvConfig,
    state: Mutex<HandleState>,
}

impl AdapterHandle {
    pub fn new(config: EnvConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HandleState::Unconfigured),
        }
    }

    /// The adapter for this process. Never fails: connectivity problems
    /// downgrade to the fallback backend instead of crashing callers.
    pub fn adapter(&self) -> Adapter {
        Adapter::new(self.backend())
    }

    /// Which backend this handle resolved to, once initialized.
    pub fn backend_kind(&self) -> Option<BackendKind> {
        match &*self.lock_state() {
            HandleState::Unconfigured => None,
            HandleState::Ready(backend) => Some(backend.kind()),
        }
    }

    fn backend(&self) -> Arc<Backend> {
        let mut state = self.lock_state();
        if let HandleState::Ready(backend) = &*state {
            return Arc::clone(backend);
        }
        let backend = Arc::new(self.probe());
        *state = HandleState::Ready(Arc::clone(&backend));
        backend
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, HandleState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn probe(&self) -> Backend {
        let Some(url) = self.config.database_url.as_deref() else {
            warn!("DATABASE_URL is not set; using the in-memory fallback backend");
            return self.fallback();
        };
        match connect_and_probe(url) {
            Ok(conn) => {
                info!("database probe succeeded; using the PostgreSQL backend");
                Backend::Postgres(Mutex::new(conn))
            }
            Err(err) => {
                warn!(
                    error = %err,
                    "database unreachable; downgrading to the in-memory fallback backend"
                );
                self.fallback()
            }
        }
    }

    fn fallback(&self) -> Backend {
        if self.config.fallback_admin {
            warn!("fallback administrator login is ENABLED (MEUDADS_FALLBACK_ADMIN)");
        }
        Backend::Fallback(FallbackBackend::new(self.config.fallback_admin))
    }
}

fn connect_and_probe(url: &str) -> Result<PgConnection> {
    let config = PgConfig::from_url(url)?;
    let mut conn = PgConnection::connect(&config)?;
    conn.ping()?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_env_resolves_to_fallback() {
        let handle = AdapterHandle::new(EnvConfig::default());
        assert!(handle.backend_kind().is_none());
        let adapter = handle.adapter();
        assert_eq!(adapter.backend_kind(), BackendKind::Fallback);
        assert_eq!(handle.backend_kind(), Some(BackendKind::Fallback));
    }

    #[test]
    fn unreachable_database_downgrades_to_fallback() {
        // Reserved port on localhost, nothing listening.
        let config = EnvConfig::default().with_database_url("postgres://u:p@127.0.0.1:1/db");
        let handle = AdapterHandle::new(config);
        assert_eq!(
            handle.adapter().backend_kind(),
            BackendKind::Fallback
        );
    }

    #[test]
    fn resolution_is_memoized() {
        let handle = AdapterHandle::new(EnvConfig::default());
        let first = handle.adapter();
        let second = handle.adapter();
        assert_eq!(first.backend_kind(), second.backend_kind());
        assert_eq!(handle.backend_kind(), Some(BackendKind::Fallback));
    }
}
