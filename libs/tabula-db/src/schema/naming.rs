//! Table and column name hygiene.

use crate::error::EngineError;

const MAX_IDENTIFIER_LEN: usize = 63;

// Words that would need quoting in at least one supported backend.
const RESERVED: &[&str] = &[
    "all", "alter", "and", "any", "as", "asc", "between", "by", "case", "check", "column",
    "constraint", "create", "cross", "current_date", "current_time", "current_timestamp",
    "current_user", "default", "delete", "desc", "distinct", "drop", "else", "end", "except",
    "exists", "false", "fetch", "for", "foreign", "from", "full", "grant", "group", "having",
    "in", "index", "inner", "insert", "intersect", "into", "is", "join", "key", "left", "like",
    "limit", "not", "null", "offset", "on", "or", "order", "outer", "primary", "references",
    "right", "select", "session_user", "set", "table", "then", "to", "true", "union", "unique",
    "update", "user", "using", "values", "when", "where", "with",
];

#[must_use]
pub fn is_reserved(word: &str) -> bool {
    RESERVED.contains(&word.to_ascii_lowercase().as_str())
}

/// Trim, turn spaces into underscores, lower-case, then validate.
///
/// # Errors
/// Returns [`EngineError::QueryConstruction`] for empty, overlong, reserved or
/// non-identifier names.
pub fn normalize_identifier(raw: &str) -> Result<String, EngineError> {
    let name = raw.trim().replace(' ', "_").to_lowercase();

    if name.is_empty() {
        return Err(EngineError::query("identifier is empty"));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(EngineError::query(format!(
            "identifier '{name}' is longer than {MAX_IDENTIFIER_LEN} characters"
        )));
    }
    let mut chars = name.chars();
    let starts_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    if !starts_ok || !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(EngineError::query(format!("'{raw}' is not a valid identifier")));
    }
    if is_reserved(&name) {
        return Err(EngineError::query(format!("'{name}' is a reserved word")));
    }
    Ok(name)
}
