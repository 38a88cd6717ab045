//! The pattern engine: decides whether a stored grant or rejection pattern
//! covers an observed request key.
//!
//! Patterns and request keys share the same string shapes:
//!
//! * HTTP: `METHOD /path/with/segments` where a pattern segment `*` matches
//!   exactly one concrete segment, and a pattern path of just `*` matches
//!   any path.
//! * GraphQL: `GRAPHQL <query|mutation> <field-expression|*>` where the
//!   variable `$ANY` in a pattern argument value matches any request value.
//!
//! Patterns are kept as strings (the persistent, operator-auditable form)
//! and re-parsed at match time. Exact string equality is the fast path.

mod graphql;
mod http;

use crate::graphql::InvalidFieldExpression;

/// Token that starts every GraphQL pattern and request key.
pub const GRAPHQL_METHOD: &str = "GRAPHQL";

/// The only variable admitted in pattern argument values.
pub const ANY_VARIABLE: &str = "ANY";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    /// The pattern (or key) does not have the `METHOD <rest>` shape.
    #[error("malformed pattern or request key: {0:?}")]
    Malformed(String),
    /// A GraphQL pattern used a variable other than `$ANY`.
    #[error("unsupported variable ${0} in pattern (only $ANY is allowed)")]
    UnsupportedVariable(String),
    #[error(transparent)]
    FieldExpression(#[from] InvalidFieldExpression),
}

/// Returns whether `pattern` covers `request_key`.
///
/// Errors are reserved for patterns (or keys) that cannot be interpreted at
/// all; callers treat an erroring pattern as non-matching and surface the
/// diagnostic.
pub fn matches(pattern: &str, request_key: &str) -> Result<bool, PatternError> {
    if pattern == request_key {
        return Ok(true);
    }
    let (pattern_method, pattern_rest) = split_method(pattern)?;
    let (key_method, key_rest) = split_method(request_key)?;

    if pattern_method == GRAPHQL_METHOD || key_method == GRAPHQL_METHOD {
        if pattern_method != key_method {
            return Ok(false);
        }
        graphql::matches(pattern_rest, key_rest)
    } else {
        if pattern_method != key_method {
            return Ok(false);
        }
        Ok(http::path_matches(pattern_rest, key_rest))
    }
}

fn split_method(s: &str) -> Result<(&str, &str), PatternError> {
    s.split_once(' ')
        .filter(|(method, rest)| !method.is_empty() && !rest.is_empty())
        .ok_or_else(|| PatternError::Malformed(s.to_string()))
}

/// Builds the canonical HTTP request key: the method plus the path with any
/// query string stripped.
pub fn http_request_key(method: &str, path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    format!("{method} {path}")
}
