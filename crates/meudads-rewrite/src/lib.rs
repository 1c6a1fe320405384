//! SQLite-to-PostgreSQL dialect rewriting.
//!
//! The dashboard worker authors its SQL in the SQLite dialect of the original
//! edge deployment. This crate translates those statements, purely textually,
//! into PostgreSQL-flavored equivalents before they reach the wire.
//!
//! # Contract
//!
//! The rewriter is best-effort string substitution, not a parser. It is only
//! correct for the statement set this codebase authors itself: a string
//! literal that happens to contain a rule token (say, the word `BOOLEAN`)
//! will be rewritten too. That is an accepted precondition - no untrusted
//! SQL reaches the rewriter - and a mis-rewrite surfaces downstream as a
//! database error, never as a rewriter error. [`rewrite`] itself never fails.
//!
//! Rules apply in a fixed order (datetime functions, autoincrement, conflict
//! clauses, type coercions); a later rule never re-matches text produced by
//! an earlier one, so re-applying the rewriter to its own output happens to
//! be a no-op. Callers should not rely on that: idempotence is an artifact
//! of the current rule set, not a guarantee.

pub mod placeholders;

pub use placeholders::{normalize_placeholders, parameter_count};

use regex::Regex;
use std::sync::OnceLock;

fn re(cell: &'static OnceLock<Regex>, pattern: &'static str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static rewrite pattern"))
}

fn datetime_offset_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"(?i)datetime\('now',\s*'([^']+)'\)")
}

fn datetime_now_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"(?i)datetime\('now'\)")
}

fn autoincrement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"(?i)INTEGER\s+PRIMARY\s+KEY\s+AUTOINCREMENT")
}

fn insert_or_replace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"(?i)INSERT\s+OR\s+REPLACE")
}

fn insert_or_ignore_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"(?i)INSERT\s+OR\s+IGNORE")
}

fn on_conflict_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"(?i)ON\s+CONFLICT")
}

fn boolean_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"(?i)\bBOOLEAN\b")
}

/// A single ordered rewrite rule.
///
/// Rules are static, process-wide constants; [`RULES`] lists them in
/// application order.
#[derive(Clone, Copy)]
pub struct RewriteRule {
    /// Rule name, used in trace output.
    pub name: &'static str,
    apply: fn(&str) -> String,
}

impl RewriteRule {
    /// Apply this rule to a statement.
    pub fn apply(&self, sql: &str) -> String {
        (self.apply)(sql)
    }
}

impl std::fmt::Debug for RewriteRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewriteRule").field("name", &self.name).finish()
    }
}

/// The rule set, in its fixed application order.
pub const RULES: &[RewriteRule] = &[
    RewriteRule {
        name: "datetime_offset",
        apply: apply_datetime_offset,
    },
    RewriteRule {
        name: "datetime_now",
        apply: apply_datetime_now,
    },
    RewriteRule {
        name: "autoincrement",
        apply: apply_autoincrement,
    },
    RewriteRule {
        name: "create_table_if_not_exists",
        apply: apply_create_table,
    },
    RewriteRule {
        name: "insert_or_replace",
        apply: apply_insert_or_replace,
    },
    RewriteRule {
        name: "insert_or_ignore",
        apply: apply_insert_or_ignore,
    },
    RewriteRule {
        name: "boolean_to_integer",
        apply: apply_boolean,
    },
];

/// Rewrite a SQLite-flavored statement into its PostgreSQL equivalent.
///
/// Never fails; see the crate-level contract for the textual-rewrite
/// precondition.
pub fn rewrite(sql: &str) -> String {
    let mut out = sql.to_string();
    for rule in RULES {
        let next = rule.apply(&out);
        if next != out {
            tracing::debug!(rule = rule.name, "dialect rule applied");
            out = next;
        }
    }
    out
}

/// `datetime('now', '<offset>')` -> `NOW() + INTERVAL '<offset>'`.
///
/// The offset text is carried verbatim; PostgreSQL accepts signed interval
/// literals, so `'-7 days'` stays an addition of a negative interval.
fn apply_datetime_offset(sql: &str) -> String {
    datetime_offset_re()
        .replace_all(sql, "NOW() + INTERVAL '$1'")
        .into_owned()
}

/// `datetime('now')` -> `NOW()`.
fn apply_datetime_now(sql: &str) -> String {
    datetime_now_re().replace_all(sql, "NOW()").into_owned()
}

/// `INTEGER PRIMARY KEY AUTOINCREMENT` -> `SERIAL PRIMARY KEY`.
fn apply_autoincrement(sql: &str) -> String {
    autoincrement_re()
        .replace_all(sql, "SERIAL PRIMARY KEY")
        .into_owned()
}

/// `CREATE TABLE IF NOT EXISTS` is valid on both engines; the rule exists
/// so the ordered rule list documents the full statement surface.
fn apply_create_table(sql: &str) -> String {
    sql.to_string()
}

/// `INSERT OR REPLACE` -> plain `INSERT`.
///
/// Known gap: the caller owns upsert correctness. PostgreSQL needs an
/// `ON CONFLICT ... DO UPDATE` clause that this textual rule cannot
/// synthesize without knowing the conflict target.
fn apply_insert_or_replace(sql: &str) -> String {
    insert_or_replace_re().replace_all(sql, "INSERT").into_owned()
}

/// `INSERT OR IGNORE` -> `INSERT ... ON CONFLICT DO NOTHING`.
///
/// The conflict clause is appended (before a trailing semicolon when one is
/// present) only when the statement does not already carry an `ON CONFLICT`
/// clause, so the rule cannot double-append.
fn apply_insert_or_ignore(sql: &str) -> String {
    if !insert_or_ignore_re().is_match(sql) {
        return sql.to_string();
    }
    let replaced = insert_or_ignore_re().replace_all(sql, "INSERT").into_owned();
    if on_conflict_re().is_match(&replaced) {
        return replaced;
    }
    let trimmed = replaced.trim_end();
    match trimmed.strip_suffix(';') {
        Some(body) => format!("{} ON CONFLICT DO NOTHING;", body.trim_end()),
        None => format!("{trimmed} ON CONFLICT DO NOTHING"),
    }
}

/// `BOOLEAN` column types -> `INTEGER`, for storage compatibility with the
/// 0/1 integers the SQLite deployment wrote.
fn apply_boolean(sql: &str) -> String {
    boolean_re().replace_all(sql, "INTEGER").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datetime_now_is_replaced() {
        let out = rewrite("SELECT * FROM sessions WHERE expires_at > datetime('now')");
        assert!(out.contains("NOW()"));
        assert!(!out.contains("datetime('now')"));
    }

    #[test]
    fn datetime_offset_becomes_interval() {
        let out = rewrite("UPDATE sessions SET expires_at = datetime('now', '+7 days')");
        assert_eq!(
            out,
            "UPDATE sessions SET expires_at = NOW() + INTERVAL '+7 days'"
        );
    }

    #[test]
    fn negative_offset_carried_verbatim() {
        let out = rewrite("SELECT datetime('now', '-30 minutes')");
        assert_eq!(out, "SELECT NOW() + INTERVAL '-30 minutes'");
    }

    #[test]
    fn autoincrement_becomes_serial() {
        let out = rewrite("CREATE TABLE IF NOT EXISTS roles (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT)");
        assert!(out.contains("SERIAL PRIMARY KEY"));
        assert!(!out.contains("AUTOINCREMENT"));
        // IF NOT EXISTS passes through untouched
        assert!(out.starts_with("CREATE TABLE IF NOT EXISTS"));
    }

    #[test]
    fn insert_or_replace_is_demoted() {
        let out = rewrite("INSERT OR REPLACE INTO kv (k, v) VALUES ($1, $2)");
        assert_eq!(out, "INSERT INTO kv (k, v) VALUES ($1, $2)");
    }

    #[test]
    fn insert_or_ignore_appends_conflict_clause() {
        let out = rewrite("INSERT OR IGNORE INTO roles (id, name) VALUES ($1, $2)");
        assert_eq!(
            out,
            "INSERT INTO roles (id, name) VALUES ($1, $2) ON CONFLICT DO NOTHING"
        );
    }

    #[test]
    fn insert_or_ignore_with_trailing_semicolon() {
        let out = rewrite("INSERT OR IGNORE INTO roles (id, name) VALUES ($1, $2);");
        assert!(out.ends_with("ON CONFLICT DO NOTHING;"));
        assert_eq!(out.matches("ON CONFLICT DO NOTHING").count(), 1);
    }

    #[test]
    fn existing_on_conflict_is_respected() {
        let out = rewrite(
            "INSERT OR IGNORE INTO roles (id) VALUES ($1) ON CONFLICT (id) DO NOTHING",
        );
        assert_eq!(out.matches("ON CONFLICT").count(), 1);
        assert!(out.starts_with("INSERT INTO"));
    }

    #[test]
    fn boolean_token_becomes_integer() {
        let out = rewrite("CREATE TABLE flags (active BOOLEAN NOT NULL)");
        assert_eq!(out, "CREATE TABLE flags (active INTEGER NOT NULL)");
    }

    #[test]
    fn boolean_inside_identifier_is_untouched() {
        let out = rewrite("SELECT boolean_flags FROM t");
        assert_eq!(out, "SELECT boolean_flags FROM t");
    }

    #[test]
    fn plain_select_is_unchanged() {
        let sql = "SELECT id, email FROM users WHERE email = $1";
        assert_eq!(rewrite(sql), sql);
    }

    #[test]
    fn double_rewrite_is_a_no_op() {
        // Not a contractual guarantee, but the current rule set happens to be
        // idempotent: the conflict appender only fires on the consumed
        // INSERT OR IGNORE token.
        let inputs = [
            "INSERT OR IGNORE INTO roles (id, name) VALUES ($1, $2);",
            "CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, ok BOOLEAN)",
            "SELECT datetime('now'), datetime('now', '+1 hour')",
        ];
        for sql in inputs {
            let once = rewrite(sql);
            assert_eq!(rewrite(&once), once, "double rewrite diverged for {sql:?}");
        }
    }

    #[test]
    fn rules_are_in_documented_order() {
        let names: Vec<&str> = RULES.iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            [
                "datetime_offset",
                "datetime_now",
                "autoincrement",
                "create_table_if_not_exists",
                "insert_or_replace",
                "insert_or_ignore",
                "boolean_to_integer",
            ]
        );
    }
}
