//! Placeholder normalization.
//!
//! The embedded-database interface the worker was written against binds
//! positional parameters with `?` (or numbered `?3`); PostgreSQL wants
//! `$1..$n`. Normalization walks the statement once, skipping single-quoted
//! string literals (with `''` escapes), so a question mark inside a literal
//! survives untouched. Statements already using `$n` pass through unchanged.

/// Convert `?` / `?N` placeholders to `$1..$n`.
///
/// Bare `?` placeholders are numbered left to right; numbered `?N`
/// placeholders keep their index. Mixing both styles in one statement is
/// not supported by either source engine and is not handled specially.
pub fn normalize_placeholders(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut next_ordinal = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                // Copy the literal through, honoring '' escapes.
                out.push('\'');
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\'' {
                        if bytes.get(i + 1) == Some(&b'\'') {
                            out.push_str("''");
                            i += 2;
                            continue;
                        }
                        out.push('\'');
                        i += 1;
                        break;
                    }
                    // Literals are valid UTF-8; copy byte-wise is safe only
                    // for ASCII, so push the full char.
                    let ch = sql[i..].chars().next().unwrap_or('\'');
                    out.push(ch);
                    i += ch.len_utf8();
                }
            }
            b'?' => {
                i += 1;
                let mut num = 0usize;
                let mut has_digits = false;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    num = num * 10 + usize::from(bytes[i] - b'0');
                    has_digits = true;
                    i += 1;
                }
                if has_digits {
                    out.push_str(&format!("${num}"));
                } else {
                    next_ordinal += 1;
                    out.push_str(&format!("${next_ordinal}"));
                }
            }
            _ => {
                let ch = sql[i..].chars().next().unwrap_or(' ');
                out.push(ch);
                i += ch.len_utf8();
            }
        }
    }

    out
}

/// Count the parameters a normalized statement expects: the highest `$N`
/// ordinal appearing outside string literals, or zero when there is none.
pub fn parameter_count(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\'' {
                        if bytes.get(i + 1) == Some(&b'\'') {
                            i += 2;
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    i += 1;
                }
            }
            b'$' => {
                i += 1;
                let mut num = 0usize;
                let mut has_digits = false;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    num = num * 10 + usize::from(bytes[i] - b'0');
                    has_digits = true;
                    i += 1;
                }
                if has_digits && num > max {
                    max = num;
                }
            }
            _ => i += 1,
        }
    }

    max
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_placeholders_are_numbered_in_order() {
        assert_eq!(
            normalize_placeholders("SELECT * FROM users WHERE email = ? AND active = ?"),
            "SELECT * FROM users WHERE email = $1 AND active = $2"
        );
    }

    #[test]
    fn numbered_placeholders_keep_their_index() {
        assert_eq!(
            normalize_placeholders("UPDATE t SET a = ?2, b = ?1"),
            "UPDATE t SET a = $2, b = $1"
        );
    }

    #[test]
    fn question_mark_in_literal_is_untouched() {
        assert_eq!(
            normalize_placeholders("SELECT * FROM faq WHERE title = 'why?' AND id = ?"),
            "SELECT * FROM faq WHERE title = 'why?' AND id = $1"
        );
    }

    #[test]
    fn escaped_quote_inside_literal() {
        assert_eq!(
            normalize_placeholders("SELECT 'it''s a ?' , ?"),
            "SELECT 'it''s a ?' , $1"
        );
    }

    #[test]
    fn dollar_placeholders_pass_through() {
        let sql = "INSERT INTO roles (id, name) VALUES ($1, $2)";
        assert_eq!(normalize_placeholders(sql), sql);
    }

    #[test]
    fn counts_highest_ordinal() {
        assert_eq!(parameter_count("SELECT $1, $3, $2"), 3);
        assert_eq!(parameter_count("SELECT 1"), 0);
        assert_eq!(parameter_count("SELECT '$9', $2"), 2);
    }

    #[test]
    fn normalize_then_count_round_trip() {
        let sql = normalize_placeholders("SELECT ?, ?, ?");
        assert_eq!(parameter_count(&sql), 3);
    }
}
