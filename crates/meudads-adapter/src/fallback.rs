//! In-memory fallback backend.
//!
//! Stands in when no database is configured or the configured one is
//! unreachable. It exists to keep the login path alive during
//! misconfiguration, nothing more: queries never fail, and every query
//! except the administrator login returns an empty result set.

use meudads_core::{Row, Value};
use tracing::{debug, warn};

use crate::backend::BackendResult;

/// The one email the fallback will authenticate, when enabled.
pub const FALLBACK_ADMIN_EMAIL: &str = "admin@meudads.com.br";

pub struct FallbackBackend {
    admin_enabled: bool,
}

impl FallbackBackend {
    /// `admin_enabled` comes from the explicit opt-in flag; without it
    /// the synthetic administrator record is never served.
    pub fn new(admin_enabled: bool) -> Self {
        Self { admin_enabled }
    }

    /// Answer a statement. Infallible: unknown shapes yield an empty
    /// result, so callers see "no data" rather than an error.
    pub(crate) fn execute(&self, sql: &str, params: &[Value]) -> BackendResult {
        if self.admin_enabled && is_admin_login(sql, params) {
            warn!(
                email = FALLBACK_ADMIN_EMAIL,
                "serving synthetic administrator record from the fallback backend"
            );
            return BackendResult {
                rows: vec![admin_row()],
                affected: None,
            };
        }
        debug!(sql, "fallback backend returning empty result");
        BackendResult {
            rows: Vec::new(),
            affected: None,
        }
    }
}

/// An authentication-shaped query: a user lookup by email whose bound
/// email is the administrator's.
fn is_admin_login(sql: &str, params: &[Value]) -> bool {
    let lowered = sql.to_lowercase();
    if !lowered.contains("from users") || !lowered.contains("email") {
        return false;
    }
    params
        .iter()
        .any(|p| p.as_str() == Some(FALLBACK_ADMIN_EMAIL))
}

fn admin_row() -> Row {
    Row::new(
        vec![
            "id".to_string(),
            "email".to_string(),
            "name".to_string(),
            "role".to_string(),
            "active".to_string(),
        ],
        vec![
            Value::Text("fallback-admin".to_string()),
            Value::Text(FALLBACK_ADMIN_EMAIL.to_string()),
            Value::Text("Administrador".to_string()),
            Value::Text("admin".to_string()),
            Value::Int(1),
        ],
    )
}
