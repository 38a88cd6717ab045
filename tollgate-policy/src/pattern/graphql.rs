//! GraphQL pattern matching: structural comparison of a pattern field
//! expression against a request field expression, with `$ANY` as the single
//! value wildcard.

use apollo_compiler::ast;

use super::ANY_VARIABLE;
use super::PatternError;
use crate::graphql::ArgValue;
use crate::graphql::GraphQLField;
use crate::graphql::parse_const_field;
use crate::graphql::parse_field_expression;

pub(super) fn matches(pattern_rest: &str, key_rest: &str) -> Result<bool, PatternError> {
    let (pattern_op, pattern_expr) = split_operation(pattern_rest)?;
    let (key_op, key_expr) = split_operation(key_rest)?;
    if pattern_op != key_op {
        return Ok(false);
    }
    if pattern_expr == "*" {
        return Ok(true);
    }
    let pattern_field = parse_field_expression(pattern_expr)?;
    let request_field = parse_const_field(key_expr)?;
    field_matches(&pattern_field, &request_field)
}

fn split_operation(rest: &str) -> Result<(&str, &str), PatternError> {
    let (op, expr) = rest
        .split_once(' ')
        .ok_or_else(|| PatternError::Malformed(rest.to_string()))?;
    if op != "query" && op != "mutation" {
        return Err(PatternError::Malformed(rest.to_string()));
    }
    if expr.is_empty() {
        return Err(PatternError::Malformed(rest.to_string()));
    }
    Ok((op, expr))
}

fn field_matches(
    pattern: &ast::Field,
    request: &GraphQLField,
) -> Result<bool, PatternError> {
    if pattern.name.as_str() != request.name {
        return Ok(false);
    }
    if pattern.arguments.len() != request.args.len() {
        return Ok(false);
    }
    for pattern_arg in &pattern.arguments {
        let Some((_, request_value)) = request
            .args
            .iter()
            .find(|(name, _)| name == pattern_arg.name.as_str())
        else {
            return Ok(false);
        };
        if !value_matches(&pattern_arg.value, request_value)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn value_matches(pattern: &ast::Value, request: &ArgValue) -> Result<bool, PatternError> {
    match (pattern, request) {
        (ast::Value::Variable(name), _) => {
            if name.as_str() == ANY_VARIABLE {
                Ok(true)
            } else {
                Err(PatternError::UnsupportedVariable(name.to_string()))
            }
        }
        (ast::Value::Null, ArgValue::Null) => Ok(true),
        (ast::Value::Boolean(p), ArgValue::Bool(r)) => Ok(p == r),
        (ast::Value::Enum(p), ArgValue::Enum(r)) => Ok(p.as_str() == r),
        (ast::Value::String(p), ArgValue::String(r)) => Ok(p == r),
        (ast::Value::Int(p), ArgValue::Number(r)) => {
            if !ArgValue::is_int_kind(r) {
                return Ok(false);
            }
            let pattern_int = p
                .as_str()
                .parse::<i128>()
                .map_err(|_| PatternError::Malformed(p.as_str().to_string()))?;
            let request_int = r
                .as_i64()
                .map(i128::from)
                .or_else(|| r.as_u64().map(i128::from));
            Ok(request_int == Some(pattern_int))
        }
        (ast::Value::Float(p), ArgValue::Number(r)) => {
            if ArgValue::is_int_kind(r) {
                return Ok(false);
            }
            let pattern_float = p
                .as_str()
                .parse::<f64>()
                .map_err(|_| PatternError::Malformed(p.as_str().to_string()))?;
            Ok(r.as_f64() == Some(pattern_float))
        }
        (ast::Value::List(pattern_items), ArgValue::List(request_items)) => {
            if pattern_items.len() != request_items.len() {
                return Ok(false);
            }
            for (p, r) in pattern_items.iter().zip(request_items) {
                if !value_matches(p, r)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (ast::Value::Object(pattern_fields), ArgValue::Object(request_fields)) => {
            if pattern_fields.len() != request_fields.len() {
                return Ok(false);
            }
            for (name, pattern_value) in pattern_fields {
                let Some((_, request_value)) = request_fields
                    .iter()
                    .find(|(request_name, _)| request_name == name.as_str())
                else {
                    return Ok(false);
                };
                if !value_matches(pattern_value, request_value)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::super::matches;
    use super::*;

    #[test]
    fn field_names_and_operation_types_must_agree() {
        assert!(matches("GRAPHQL query user", "GRAPHQL query user").unwrap());
        assert!(!matches("GRAPHQL query user", "GRAPHQL query viewer").unwrap());
        assert!(!matches("GRAPHQL query user", "GRAPHQL mutation user").unwrap());
    }

    #[test]
    fn star_matches_any_field_of_the_operation_type() {
        assert!(matches("GRAPHQL query *", "GRAPHQL query user(id: 3)").unwrap());
        assert!(matches("GRAPHQL mutation *", r#"GRAPHQL mutation deleteUser(id: "1")"#).unwrap());
        assert!(!matches("GRAPHQL mutation *", "GRAPHQL query user").unwrap());
    }

    #[test]
    fn argument_counts_must_be_equal() {
        assert!(!matches("GRAPHQL query user", "GRAPHQL query user(id: 3)").unwrap());
        assert!(!matches("GRAPHQL query user(id: 3)", "GRAPHQL query user").unwrap());
        assert!(
            !matches(
                "GRAPHQL query user(id: 3)",
                "GRAPHQL query user(id: 3, full: true)"
            )
            .unwrap()
        );
    }

    #[test]
    fn any_wildcard_in_nested_object() {
        let pattern =
            r#"GRAPHQL mutation createPullRequest(input: {branch: "main", title: $ANY})"#;
        assert!(
            matches(
                pattern,
                r#"GRAPHQL mutation createPullRequest(input: {branch: "main", title: "x"})"#
            )
            .unwrap()
        );
        assert!(
            !matches(
                pattern,
                r#"GRAPHQL mutation createPullRequest(input: {branch: "dev", title: "x"})"#
            )
            .unwrap()
        );
    }

    #[test]
    fn unknown_variables_are_an_error_not_a_mismatch() {
        let result = matches(
            "GRAPHQL mutation createUser(name: $FOO)",
            r#"GRAPHQL mutation createUser(name: "ada")"#,
        );
        assert_eq!(
            result,
            Err(PatternError::UnsupportedVariable("FOO".to_string()))
        );
    }

    #[test]
    fn scalar_kinds_do_not_cross_match() {
        assert!(!matches("GRAPHQL query f(x: 1)", "GRAPHQL query f(x: 1.0)").unwrap());
        assert!(!matches("GRAPHQL query f(x: 1.0)", "GRAPHQL query f(x: 1)").unwrap());
        assert!(!matches(r#"GRAPHQL query f(x: "1")"#, "GRAPHQL query f(x: 1)").unwrap());
        assert!(!matches("GRAPHQL query f(x: OPEN)", r#"GRAPHQL query f(x: "OPEN")"#).unwrap());
    }

    #[test]
    fn any_dollar_any_string_literal_is_an_ordinary_string() {
        // `"$ANY"` as a *string value* has no wildcard meaning.
        assert!(
            matches(
                r#"GRAPHQL query f(x: "$ANY")"#,
                r#"GRAPHQL query f(x: "$ANY")"#
            )
            .unwrap()
        );
        assert!(
            !matches(
                r#"GRAPHQL query f(x: "$ANY")"#,
                r#"GRAPHQL query f(x: "anything")"#
            )
            .unwrap()
        );
    }

    #[test]
    fn lists_match_pairwise() {
        assert!(
            matches(
                "GRAPHQL query f(ids: [1, $ANY, 3])",
                "GRAPHQL query f(ids: [1, 2, 3])"
            )
            .unwrap()
        );
        assert!(!matches("GRAPHQL query f(ids: [1, 2])", "GRAPHQL query f(ids: [1, 2, 3])").unwrap());
    }

    #[test]
    fn object_field_sets_must_have_equal_cardinality() {
        assert!(
            !matches(
                "GRAPHQL query f(input: {a: 1})",
                "GRAPHQL query f(input: {a: 1, b: 2})"
            )
            .unwrap()
        );
    }

    #[test]
    fn argument_order_is_irrelevant_but_names_must_exist() {
        assert!(
            matches(
                "GRAPHQL query f(a: 1, b: 2)",
                "GRAPHQL query f(b: 2, a: 1)"
            )
            .unwrap()
        );
        assert!(!matches("GRAPHQL query f(a: 1)", "GRAPHQL query f(b: 1)").unwrap());
    }
}
