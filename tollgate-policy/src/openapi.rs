//! OpenAPI path-template index.
//!
//! A loaded index answers one question: for a concrete method and path,
//! which templated path (with `{param}` segments) does the origin's API
//! documentation declare? The answer drives suggestion generation; nothing
//! else of the OpenAPI document is retained.

use std::collections::HashSet;

use itertools::EitherOrBoth;
use itertools::Itertools;

const HTTP_METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

#[derive(Debug, thiserror::Error)]
pub enum OpenApiError {
    #[error("failed to parse OpenAPI document as JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse OpenAPI document as YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// One templated path from the document, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenApiPath {
    /// The raw template, e.g. `/repos/{owner}/{repo}/actions/runs/{run_id}`.
    pub template: String,
    pub segments: Vec<TemplateSegment>,
    /// Uppercased HTTP methods declared on the path item.
    pub methods: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSegment {
    /// The literal segment, or the parameter name without braces.
    pub value: String,
    pub is_parameter: bool,
}

/// An indexed OpenAPI document for one host.
#[derive(Debug, Clone, Default)]
pub struct OpenApiIndex {
    paths: Vec<OpenApiPath>,
}

impl OpenApiIndex {
    /// Parses a document, sniffing JSON vs YAML from the first character.
    pub fn parse(text: &str) -> Result<Self, OpenApiError> {
        let document = if text.trim_start().starts_with('{') {
            serde_json::from_str::<serde_json::Value>(text)?
        } else {
            serde_yaml::from_str::<serde_json::Value>(text)?
        };
        Ok(Self::from_document(&document))
    }

    /// Indexes the `paths` table of a parsed document. Anything that is not
    /// a path item with method keys is ignored; an absent table yields an
    /// empty index.
    pub fn from_document(document: &serde_json::Value) -> Self {
        let mut paths = Vec::new();
        let Some(table) = document.get("paths").and_then(|p| p.as_object()) else {
            return Self { paths };
        };
        for (template, item) in table {
            let Some(item) = item.as_object() else {
                continue;
            };
            let methods: HashSet<String> = item
                .keys()
                .filter(|k| HTTP_METHODS.contains(&k.as_str()))
                .map(|k| k.to_ascii_uppercase())
                .collect();
            if methods.is_empty() {
                continue;
            }
            let segments = template
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    Some(name) => TemplateSegment {
                        value: name.to_string(),
                        is_parameter: true,
                    },
                    None => TemplateSegment {
                        value: s.to_string(),
                        is_parameter: false,
                    },
                })
                .collect();
            paths.push(OpenApiPath {
                template: template.clone(),
                segments,
                methods,
            });
        }
        Self { paths }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Finds the first declared template matching the concrete request, in
    /// document order: method declared, equal segment count, and every
    /// non-parameter segment byte-identical.
    pub fn lookup(&self, method: &str, concrete_path: &str) -> Option<&OpenApiPath> {
        let path = concrete_path.split('?').next().unwrap_or(concrete_path);
        let concrete: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let method = method.to_ascii_uppercase();
        self.paths.iter().find(|candidate| {
            candidate.methods.contains(&method)
                && candidate
                    .segments
                    .iter()
                    .zip_longest(&concrete)
                    .all(|pair| match pair {
                        EitherOrBoth::Both(template, concrete) => {
                            template.is_parameter || template.value == *concrete
                        }
                        _ => false,
                    })
        })
    }
}
