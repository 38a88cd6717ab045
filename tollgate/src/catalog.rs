//! Startup loading of per-host OpenAPI documents into path-template indexes.
//!
//! Loading is best-effort: a host whose document cannot be fetched or parsed
//! simply has no index, and suggestions for it fall back to exact +
//! catch-all.

use std::collections::HashMap;

use tollgate_policy::OpenApiIndex;
use tollgate_policy::OpenApiPath;

use crate::configuration::ConfigDocument;
use crate::configuration::OpenApiSource;

#[derive(Default)]
pub struct OpenApiCatalog {
    indexes: HashMap<String, OpenApiIndex>,
}

impl OpenApiCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds the catalog for every host that declares an OpenAPI source.
    pub async fn load(document: &ConfigDocument, http: &reqwest::Client) -> Self {
        let mut indexes = HashMap::new();
        for (host, config) in document {
            let Some(source) = &config.openapi_spec else {
                continue;
            };
            match fetch(source, http).await {
                Ok(text) => match OpenApiIndex::parse(&text) {
                    Ok(index) => {
                        if index.is_empty() {
                            tracing::warn!(host, "OpenAPI document declares no usable paths");
                        }
                        indexes.insert(host.clone(), index);
                    }
                    Err(e) => {
                        tracing::warn!(host, error = %e, "ignoring unparseable OpenAPI document");
                    }
                },
                Err(e) => {
                    tracing::warn!(host, error = %e, "could not load OpenAPI document");
                }
            }
        }
        Self { indexes }
    }

    pub fn lookup(&self, host: &str, method: &str, path: &str) -> Option<&OpenApiPath> {
        self.indexes.get(host)?.lookup(method, path)
    }
}

async fn fetch(source: &OpenApiSource, http: &reqwest::Client) -> Result<String, FetchError> {
    match source {
        OpenApiSource::Path { path } => Ok(tokio::fs::read_to_string(path).await?),
        OpenApiSource::Url { url } => {
            let response = http.get(url).send().await?.error_for_status()?;
            Ok(response.text().await?)
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum FetchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::HostConfig;

    #[tokio::test]
    async fn loads_documents_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let spec_path = dir.path().join("openapi.yaml");
        std::fs::write(&spec_path, "paths:\n  /user:\n    get: {}\n").unwrap();

        let mut document = ConfigDocument::new();
        document.insert(
            "api.example.com".to_string(),
            HostConfig {
                graphql_endpoints: vec![],
                openapi_spec: Some(OpenApiSource::Path { path: spec_path }),
                secrets: vec![],
            },
        );

        let catalog = OpenApiCatalog::load(&document, &reqwest::Client::new()).await;
        assert!(catalog.lookup("api.example.com", "GET", "/user").is_some());
        assert!(catalog.lookup("api.example.com", "POST", "/user").is_none());
        assert!(catalog.lookup("other.example.com", "GET", "/user").is_none());
    }

    #[tokio::test]
    async fn unreadable_documents_are_skipped() {
        let mut document = ConfigDocument::new();
        document.insert(
            "api.example.com".to_string(),
            HostConfig {
                graphql_endpoints: vec![],
                openapi_spec: Some(OpenApiSource::Path {
                    path: "/nonexistent/openapi.yaml".into(),
                }),
                secrets: vec![],
            },
        );
        let catalog = OpenApiCatalog::load(&document, &reqwest::Client::new()).await;
        assert!(catalog.lookup("api.example.com", "GET", "/user").is_none());
    }
}
