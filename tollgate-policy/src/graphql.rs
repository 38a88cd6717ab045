//! GraphQL field and argument-value model shared by the normalizer, the
//! pattern engine, and the suggestion engine.
//!
//! A [`GraphQLField`] is the unit the proxy reasons about: one top-level
//! field of an operation together with its fully substituted argument
//! values. Its canonical rendering (GraphQL literal syntax) doubles as the
//! request-key format and the deduplication key, so rendering must stay
//! stable and re-parseable.

use std::fmt;
use std::fmt::Display;
use std::fmt::Formatter;

use apollo_compiler::ast;

/// The two operation kinds the proxy distinguishes. Subscriptions are
/// folded into [`OperationKind::Query`] during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Query,
    Mutation,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
        }
    }
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully substituted GraphQL argument value.
///
/// This is the request-side value tree: variables have already been
/// replaced by their JSON values (a missing variable becomes `Null`), so
/// unlike `apollo_compiler::ast::Value` there is no variable case. Numbers
/// keep `serde_json`'s representation, which preserves the int/float kind
/// distinction the matcher needs.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Enum(String),
    List(Vec<ArgValue>),
    /// Keys keep their source order; GraphQL object literals are ordered.
    Object(Vec<(String, ArgValue)>),
}

impl ArgValue {
    /// Converts an AST value, substituting variables from `variables`.
    /// A variable absent from the map resolves to `Null`.
    pub(crate) fn from_ast(
        value: &ast::Value,
        variables: &serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        match value {
            ast::Value::Variable(name) => variables
                .get(name.as_str())
                .map(Self::from_json)
                .unwrap_or(ArgValue::Null),
            ast::Value::Null => ArgValue::Null,
            ast::Value::Boolean(b) => ArgValue::Bool(*b),
            ast::Value::Enum(name) => ArgValue::Enum(name.to_string()),
            ast::Value::String(s) => ArgValue::String(s.clone()),
            ast::Value::Int(i) => match i.as_str().parse::<i64>() {
                Ok(n) => ArgValue::Number(n.into()),
                // Out-of-range integer literal: keep the numeric value even
                // if the int/float kind distinction is lost.
                Err(_) => Self::float(i.as_str()),
            },
            ast::Value::Float(f) => Self::float(f.as_str()),
            ast::Value::List(items) => {
                ArgValue::List(items.iter().map(|v| Self::from_ast(v, variables)).collect())
            }
            ast::Value::Object(fields) => ArgValue::Object(
                fields
                    .iter()
                    .map(|(name, v)| (name.to_string(), Self::from_ast(v, variables)))
                    .collect(),
            ),
        }
    }

    /// Converts an AST value that must not contain variables (the request
    /// side of a match, re-parsed from a canonical request key).
    pub(crate) fn from_const_ast(value: &ast::Value) -> Result<Self, InvalidFieldExpression> {
        match value {
            ast::Value::Variable(name) => Err(InvalidFieldExpression(format!(
                "unexpected variable ${name} in a constant value"
            ))),
            ast::Value::List(items) => Ok(ArgValue::List(
                items
                    .iter()
                    .map(|v| Self::from_const_ast(v))
                    .collect::<Result<_, _>>()?,
            )),
            ast::Value::Object(fields) => Ok(ArgValue::Object(
                fields
                    .iter()
                    .map(|(name, v)| Ok((name.to_string(), Self::from_const_ast(v)?)))
                    .collect::<Result<_, InvalidFieldExpression>>()?,
            )),
            other => Ok(Self::from_ast(other, &serde_json::Map::new())),
        }
    }

    pub(crate) fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ArgValue::Null,
            serde_json::Value::Bool(b) => ArgValue::Bool(*b),
            serde_json::Value::Number(n) => ArgValue::Number(n.clone()),
            serde_json::Value::String(s) => ArgValue::String(s.clone()),
            serde_json::Value::Array(items) => {
                ArgValue::List(items.iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(fields) => ArgValue::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// True when the number carries an integral JSON value.
    pub(crate) fn is_int_kind(n: &serde_json::Number) -> bool {
        n.is_i64() || n.is_u64()
    }

    fn float(literal: &str) -> Self {
        match literal.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            Some(n) => ArgValue::Number(n),
            None => ArgValue::Null,
        }
    }
}

impl Display for ArgValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Null => f.write_str("null"),
            ArgValue::Bool(b) => write!(f, "{b}"),
            ArgValue::Number(n) => write!(f, "{n}"),
            ArgValue::String(s) => write_escaped_string(f, s),
            ArgValue::Enum(name) => f.write_str(name),
            ArgValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            ArgValue::Object(fields) => {
                f.write_str("{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// A top-level field of a GraphQL operation with substituted arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphQLField {
    pub name: String,
    pub args: Vec<(String, ArgValue)>,
}

impl GraphQLField {
    /// The canonical request key, e.g. `GRAPHQL mutation deleteUser(id: "1")`.
    pub fn request_key(&self, kind: OperationKind) -> String {
        format!("GRAPHQL {kind} {self}")
    }
}

impl Display for GraphQLField {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.args.is_empty() {
            f.write_str("(")?;
            for (i, (name, value)) in self.args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{name}: {value}")?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

/// A field expression could not be parsed as a single GraphQL field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid field expression: {0}")]
pub struct InvalidFieldExpression(pub String);

/// Parses a field expression such as `createPullRequest(input: {title: $ANY})`
/// into its AST by wrapping it in a synthetic anonymous operation.
pub(crate) fn parse_field_expression(
    expr: &str,
) -> Result<apollo_compiler::Node<ast::Field>, InvalidFieldExpression> {
    let source = format!("{{ {expr} }}");
    let document = ast::Document::parse(source, "field-expression.graphql")
        .map_err(|e| InvalidFieldExpression(e.errors.to_string()))?;
    let mut operations = document.definitions.iter().filter_map(|def| match def {
        ast::Definition::OperationDefinition(op) => Some(op),
        _ => None,
    });
    let operation = operations
        .next()
        .ok_or_else(|| InvalidFieldExpression("no selection".into()))?;
    if operations.next().is_some() {
        return Err(InvalidFieldExpression(
            "expected a single selection".into(),
        ));
    }
    let mut selections = operation.selection_set.iter();
    let field = match selections.next() {
        Some(ast::Selection::Field(field)) => field.clone(),
        Some(_) => {
            return Err(InvalidFieldExpression(
                "expected a field, not a fragment".into(),
            ));
        }
        None => return Err(InvalidFieldExpression("no selection".into())),
    };
    if selections.next().is_some() {
        return Err(InvalidFieldExpression(
            "expected a single field".into(),
        ));
    }
    Ok(field)
}

/// Parses a *request-side* field expression (no variables allowed) into a
/// [`GraphQLField`].
pub(crate) fn parse_const_field(expr: &str) -> Result<GraphQLField, InvalidFieldExpression> {
    let field = parse_field_expression(expr)?;
    let args = field
        .arguments
        .iter()
        .map(|arg| Ok((arg.name.to_string(), ArgValue::from_const_ast(&arg.value)?)))
        .collect::<Result<_, InvalidFieldExpression>>()?;
    Ok(GraphQLField {
        name: field.name.to_string(),
        args,
    })
}

fn write_escaped_string(f: &mut Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if (c as u32) < 0x20 => write!(f, "\\u{:04x}", c as u32)?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn json_map(pairs: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn renders_scalars_canonically() {
        assert_eq!(ArgValue::Null.to_string(), "null");
        assert_eq!(ArgValue::Bool(true).to_string(), "true");
        assert_eq!(ArgValue::Number(7.into()).to_string(), "7");
        assert_eq!(ArgValue::String("a \"b\"\n".into()).to_string(), "\"a \\\"b\\\"\\n\"");
        assert_eq!(ArgValue::Enum("OPEN".into()).to_string(), "OPEN");
    }

    #[test]
    fn renders_fields_with_nested_values() {
        let field = GraphQLField {
            name: "createPullRequest".into(),
            args: vec![(
                "input".into(),
                ArgValue::Object(vec![
                    ("branch".into(), ArgValue::String("main".into())),
                    ("draft".into(), ArgValue::Bool(false)),
                    ("labels".into(), ArgValue::List(vec![ArgValue::String("bug".into())])),
                ]),
            )],
        };
        assert_eq!(
            field.to_string(),
            r#"createPullRequest(input: {branch: "main", draft: false, labels: ["bug"]})"#
        );
        assert_eq!(
            field.request_key(OperationKind::Mutation),
            r#"GRAPHQL mutation createPullRequest(input: {branch: "main", draft: false, labels: ["bug"]})"#
        );
    }

    #[test]
    fn substitutes_variables_and_defaults_missing_to_null() {
        let field = parse_field_expression("createUser(name: $name, age: $age)").unwrap();
        let variables = json_map(&[("name", serde_json::json!("ada"))]);
        let args: Vec<_> = field
            .arguments
            .iter()
            .map(|a| (a.name.to_string(), ArgValue::from_ast(&a.value, &variables)))
            .collect();
        assert_eq!(
            args,
            vec![
                ("name".to_string(), ArgValue::String("ada".into())),
                ("age".to_string(), ArgValue::Null),
            ]
        );
    }

    #[test]
    fn canonical_rendering_reparses_to_the_same_field() {
        let field = GraphQLField {
            name: "search".into(),
            args: vec![
                ("first".into(), ArgValue::Number(10.into())),
                (
                    "filter".into(),
                    ArgValue::Object(vec![
                        ("state".into(), ArgValue::Enum("OPEN".into())),
                        ("title".into(), ArgValue::String("a \"quoted\" title".into())),
                    ]),
                ),
            ],
        };
        let reparsed = parse_const_field(&field.to_string()).unwrap();
        assert_eq!(reparsed, field);
    }

    #[test]
    fn const_parsing_rejects_variables() {
        let err = parse_const_field("user(id: $id)").unwrap_err();
        assert!(err.to_string().contains("variable"), "{err}");
    }

    #[test]
    fn rejects_multi_field_expressions() {
        assert!(parse_field_expression("user admin").is_err());
        assert!(parse_field_expression("... on User").is_err());
    }
}
