//! GraphQL request normalization.
//!
//! Turns a raw GraphQL HTTP request (POST body or GET query parameters,
//! single or batched) into the canonical list of top-level fields the
//! mediation layer matches patterns against: fragments inlined, variables
//! substituted, batches flattened, duplicates removed.

use std::collections::HashMap;

use apollo_compiler::Node;
use apollo_compiler::ast;
use indexmap::IndexMap;
use serde::Deserialize;

use crate::graphql::ArgValue;
use crate::graphql::GraphQLField;
use crate::graphql::OperationKind;

/// The deduplicated top-level fields of a request, split by operation kind.
/// Field order is first-seen across the whole (possibly batched) request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedRequest {
    pub queries: Vec<GraphQLField>,
    pub mutations: Vec<GraphQLField>,
}

impl NormalizedRequest {
    /// Canonical request keys for every field, queries first. This is the
    /// order rejection and grant lookups iterate in.
    pub fn request_keys(&self) -> Vec<(OperationKind, GraphQLField, String)> {
        self.queries
            .iter()
            .map(|f| (OperationKind::Query, f.clone(), f.request_key(OperationKind::Query)))
            .chain(self.mutations.iter().map(|f| {
                (
                    OperationKind::Mutation,
                    f.clone(),
                    f.request_key(OperationKind::Mutation),
                )
            }))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty() && self.mutations.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("request body is not a GraphQL request envelope: {0}")]
    Envelope(#[from] serde_json::Error),
    #[error("GraphQL parse error: {0}")]
    Parse(String),
    #[error("no operation named {0:?} in document")]
    UnknownOperation(String),
    #[error("unknown fragment {0:?}")]
    UnknownFragment(String),
    #[error("fragment cycle involving {0:?}")]
    FragmentCycle(String),
    #[error("variables must be a JSON object")]
    VariablesNotAnObject,
    #[error("missing query text")]
    MissingQuery,
    #[error("request body is not UTF-8")]
    BodyNotUtf8,
}

/// One GraphQL request envelope, as sent in a POST body or spread across
/// GET query parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRequest {
    pub query: String,
    #[serde(rename = "operationName")]
    pub operation_name: Option<String>,
    pub variables: Option<serde_json::Value>,
}

/// A body is either a single envelope or a batch of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawBatch {
    Single(RawRequest),
    Batch(Vec<RawRequest>),
}

/// Normalizes a POST body (single request or batch).
pub fn normalize_body(body: &str) -> Result<NormalizedRequest, NormalizeError> {
    let batch: RawBatch = serde_json::from_str(body)?;
    let requests = match batch {
        RawBatch::Single(request) => vec![request],
        RawBatch::Batch(requests) => requests,
    };
    normalize_all(&requests)
}

/// Normalizes a GET request from its decoded query parameters. `variables`
/// is the raw JSON text of the `variables` parameter, if present.
pub fn normalize_get(
    query: Option<&str>,
    variables: Option<&str>,
    operation_name: Option<&str>,
) -> Result<NormalizedRequest, NormalizeError> {
    let query = query.ok_or(NormalizeError::MissingQuery)?;
    let variables = variables
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()?;
    let request = RawRequest {
        query: query.to_string(),
        operation_name: operation_name.map(str::to_string),
        variables,
    };
    normalize_all(std::slice::from_ref(&request))
}

fn normalize_all(requests: &[RawRequest]) -> Result<NormalizedRequest, NormalizeError> {
    // Keyed by canonical rendering so duplicates collapse to first-seen.
    let mut queries: IndexMap<String, GraphQLField> = IndexMap::new();
    let mut mutations: IndexMap<String, GraphQLField> = IndexMap::new();
    for request in requests {
        normalize_one(request, &mut queries, &mut mutations)?;
    }
    Ok(NormalizedRequest {
        queries: queries.into_values().collect(),
        mutations: mutations.into_values().collect(),
    })
}

fn normalize_one(
    request: &RawRequest,
    queries: &mut IndexMap<String, GraphQLField>,
    mutations: &mut IndexMap<String, GraphQLField>,
) -> Result<(), NormalizeError> {
    let document = ast::Document::parse(request.query.clone(), "request.graphql")
        .map_err(|e| NormalizeError::Parse(e.errors.to_string()))?;

    let mut fragments: HashMap<&str, &Node<ast::FragmentDefinition>> = HashMap::new();
    let mut operations: Vec<&Node<ast::OperationDefinition>> = Vec::new();
    for definition in &document.definitions {
        match definition {
            ast::Definition::OperationDefinition(op) => operations.push(op),
            ast::Definition::FragmentDefinition(fragment) => {
                fragments.insert(fragment.name.as_str(), fragment);
            }
            _ => {}
        }
    }

    if let Some(name) = &request.operation_name {
        operations.retain(|op| op.name.as_ref().map(|n| n.as_str()) == Some(name.as_str()));
        if operations.is_empty() {
            return Err(NormalizeError::UnknownOperation(name.clone()));
        }
    }

    let variables = match &request.variables {
        None | Some(serde_json::Value::Null) => serde_json::Map::new(),
        Some(serde_json::Value::Object(map)) => map.clone(),
        Some(_) => return Err(NormalizeError::VariablesNotAnObject),
    };

    for operation in operations {
        let mut fields = Vec::new();
        collect_top_level_fields(
            &operation.selection_set,
            &fragments,
            &mut Vec::new(),
            &mut fields,
        )?;
        let out = match operation.operation_type {
            ast::OperationType::Mutation => &mut *mutations,
            // Subscriptions are mediated like queries.
            ast::OperationType::Query | ast::OperationType::Subscription => &mut *queries,
        };
        for field in fields {
            let substituted = GraphQLField {
                name: field.name.to_string(),
                args: field
                    .arguments
                    .iter()
                    .map(|arg| (arg.name.to_string(), ArgValue::from_ast(&arg.value, &variables)))
                    .collect(),
            };
            out.entry(substituted.to_string()).or_insert(substituted);
        }
    }
    Ok(())
}

/// Expands fragment spreads and inline fragments until only fields remain,
/// collecting the top-level fields in document order.
fn collect_top_level_fields<'doc>(
    selections: &'doc [ast::Selection],
    fragments: &HashMap<&str, &'doc Node<ast::FragmentDefinition>>,
    active_spreads: &mut Vec<&'doc str>,
    out: &mut Vec<&'doc ast::Field>,
) -> Result<(), NormalizeError> {
    for selection in selections {
        match selection {
            ast::Selection::Field(field) => out.push(field),
            ast::Selection::FragmentSpread(spread) => {
                let name = spread.fragment_name.as_str();
                if active_spreads.contains(&name) {
                    return Err(NormalizeError::FragmentCycle(name.to_string()));
                }
                let fragment = fragments
                    .get(name)
                    .ok_or_else(|| NormalizeError::UnknownFragment(name.to_string()))?;
                active_spreads.push(name);
                collect_top_level_fields(&fragment.selection_set, fragments, active_spreads, out)?;
                active_spreads.pop();
            }
            ast::Selection::InlineFragment(inline) => {
                collect_top_level_fields(&inline.selection_set, fragments, active_spreads, out)?;
            }
        }
    }
    Ok(())
}
