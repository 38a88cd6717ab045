//! Suggestion engine: from one observed request, propose an ordered list of
//! patterns from most specific to catch-all.
//!
//! The generalization direction is right-to-left because the rightmost path
//! segments and arguments are empirically the most variable (run IDs, row
//! IDs, free-form content) while the leftmost are stable scopes.

use indexmap::IndexSet;

use crate::graphql::GraphQLField;
use crate::graphql::OperationKind;
use crate::openapi::OpenApiPath;

/// One pattern candidate presented to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternOption {
    pub pattern: String,
    pub description: String,
}

/// Suggestions for an HTTP request. `template` is the OpenAPI path the
/// request matched, when the host has an indexed document.
pub fn http_suggestions(
    method: &str,
    path: &str,
    template: Option<&OpenApiPath>,
) -> Vec<PatternOption> {
    let path = path.split('?').next().unwrap_or(path);
    let mut seen = IndexSet::new();
    let mut options = Vec::new();
    let mut push = |pattern: String, description: String, options: &mut Vec<PatternOption>| {
        if seen.insert(pattern.clone()) {
            options.push(PatternOption {
                pattern,
                description,
            });
        }
    };

    push(
        format!("{method} {path}"),
        "this exact request".to_string(),
        &mut options,
    );

    if let Some(template) = template {
        let parts: Vec<&str> = path.split('/').collect();
        // Positions (in `parts`) of the non-empty segments, aligned with the
        // template's segment list by the index lookup that matched it.
        let segment_positions: Vec<usize> = parts
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_empty())
            .map(|(i, _)| i)
            .collect();
        let parameter_indices: Vec<usize> = template
            .segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_parameter)
            .map(|(i, _)| i)
            .collect();
        if segment_positions.len() == template.segments.len() {
            for i in (0..parameter_indices.len()).rev() {
                let widened = &parameter_indices[i..];
                let mut generalized = parts.clone();
                for &segment_index in widened {
                    generalized[segment_positions[segment_index]] = "*";
                }
                let names = widened
                    .iter()
                    .map(|&j| template.segments[j].value.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                push(
                    format!("{method} {}", generalized.join("/")),
                    format!("any {names}"),
                    &mut options,
                );
            }
        }
    }

    push(
        format!("{method} *"),
        format!("any {method} request"),
        &mut options,
    );
    options
}

/// Suggestions for one GraphQL top-level field.
pub fn graphql_suggestions(kind: OperationKind, field: &GraphQLField) -> Vec<PatternOption> {
    let mut seen = IndexSet::new();
    let mut options = Vec::new();
    let mut push = |pattern: String, description: String, options: &mut Vec<PatternOption>| {
        if seen.insert(pattern.clone()) {
            options.push(PatternOption {
                pattern,
                description,
            });
        }
    };

    push(
        field.request_key(kind),
        "this exact request".to_string(),
        &mut options,
    );

    for i in (0..field.args.len()).rev() {
        let rendered = field
            .args
            .iter()
            .enumerate()
            .map(|(j, (name, value))| {
                if j >= i {
                    format!("{name}: $ANY")
                } else {
                    format!("{name}: {value}")
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        let names = field.args[i..]
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        push(
            format!("GRAPHQL {kind} {}({rendered})", field.name),
            format!("any {names}"),
            &mut options,
        );
    }

    push(
        format!("GRAPHQL {kind} *"),
        format!("any {kind} field"),
        &mut options,
    );
    options
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::graphql::ArgValue;
    use crate::openapi::OpenApiIndex;
    use crate::pattern;

    fn patterns(options: &[PatternOption]) -> Vec<&str> {
        options.iter().map(|o| o.pattern.as_str()).collect()
    }

    #[test]
    fn http_without_template_is_exact_plus_catch_all() {
        let options = http_suggestions("GET", "/user", None);
        assert_eq!(patterns(&options), vec!["GET /user", "GET *"]);
    }

    #[test]
    fn http_query_strings_are_stripped() {
        let options = http_suggestions("GET", "/user?per_page=10", None);
        assert_eq!(patterns(&options), vec!["GET /user", "GET *"]);
    }

    #[test]
    fn openapi_template_widens_right_to_left() {
        let index = OpenApiIndex::from_document(&serde_json::json!({
            "paths": {
                "/repos/{owner}/{repo}/actions/runs/{run_id}/jobs": {"get": {}},
            },
        }));
        let template = index.lookup("GET", "/repos/a/b/actions/runs/7/jobs").unwrap();
        let options = http_suggestions("GET", "/repos/a/b/actions/runs/7/jobs", Some(template));
        assert_eq!(
            patterns(&options),
            vec![
                "GET /repos/a/b/actions/runs/7/jobs",
                "GET /repos/a/b/actions/runs/*/jobs",
                "GET /repos/a/*/actions/runs/*/jobs",
                "GET /repos/*/*/actions/runs/*/jobs",
                "GET *",
            ]
        );
        assert_eq!(options[1].description, "any run_id");
        assert_eq!(options[3].description, "any owner, repo, run_id");
    }

    #[test]
    fn graphql_field_without_arguments() {
        let field = GraphQLField {
            name: "viewer".into(),
            args: vec![],
        };
        let options = graphql_suggestions(OperationKind::Query, &field);
        assert_eq!(
            patterns(&options),
            vec!["GRAPHQL query viewer", "GRAPHQL query *"]
        );
    }

    #[test]
    fn graphql_arguments_widen_right_to_left() {
        let field = GraphQLField {
            name: "createPullRequest".into(),
            args: vec![
                ("branch".into(), ArgValue::String("main".into())),
                ("title".into(), ArgValue::String("x".into())),
            ],
        };
        let options = graphql_suggestions(OperationKind::Mutation, &field);
        assert_eq!(
            patterns(&options),
            vec![
                r#"GRAPHQL mutation createPullRequest(branch: "main", title: "x")"#,
                r#"GRAPHQL mutation createPullRequest(branch: "main", title: $ANY)"#,
                "GRAPHQL mutation createPullRequest(branch: $ANY, title: $ANY)",
                "GRAPHQL mutation *",
            ]
        );
        assert_eq!(options[1].description, "any title");
        assert_eq!(options[2].description, "any branch, title");
    }

    #[test]
    fn each_suggestion_matches_what_its_predecessors_match() {
        // Monotonicity: later patterns cover supersets of earlier ones.
        let index = OpenApiIndex::from_document(&serde_json::json!({
            "paths": {"/repos/{owner}/{repo}/issues/{number}": {"post": {}}},
        }));
        let concrete = "/repos/acme/widget/issues/12";
        let template = index.lookup("POST", concrete).unwrap();
        let options = http_suggestions("POST", concrete, Some(template));

        let similar_keys = [
            "POST /repos/acme/widget/issues/12",
            "POST /repos/acme/widget/issues/90",
            "POST /repos/acme/gadget/issues/5",
            "POST /repos/other/gadget/issues/5",
            "POST /totally/different",
        ];
        let mut previous_matched: Vec<&str> = Vec::new();
        for option in &options {
            let matched: Vec<&str> = similar_keys
                .iter()
                .filter(|key| pattern::matches(&option.pattern, key).unwrap())
                .copied()
                .collect();
            for key in &previous_matched {
                assert!(
                    matched.contains(key),
                    "{} no longer matches {key}",
                    option.pattern
                );
            }
            previous_matched = matched;
        }
        // The final element is the catch-all.
        assert_eq!(previous_matched.len(), similar_keys.len());
    }

    #[test]
    fn graphql_suggestions_all_match_the_originating_request() {
        let field = GraphQLField {
            name: "search".into(),
            args: vec![
                ("first".into(), ArgValue::Number(10.into())),
                ("query".into(), ArgValue::String("is:open".into())),
            ],
        };
        let key = field.request_key(OperationKind::Query);
        for option in graphql_suggestions(OperationKind::Query, &field) {
            assert!(
                pattern::matches(&option.pattern, &key).unwrap(),
                "{} does not match {key}",
                option.pattern
            );
        }
    }
}
