//! The persisted configuration document.
//!
//! A JSON object keyed by hostname; each host declares where its GraphQL
//! endpoints live, where its OpenAPI document can be found, and which fake
//! secrets the proxy should watch for. The grant and rejection lists inside
//! each secret are the only parts that mutate at runtime; every mutation
//! re-serializes the whole document.

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

/// The whole document: hostname → per-host configuration.
pub type ConfigDocument = IndexMap<String, HostConfig>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    /// Paths on this host that speak GraphQL and get per-field mediation.
    #[serde(
        rename = "graphqlEndpoints",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub graphql_endpoints: Vec<String>,
    /// Where to find the host's OpenAPI document, if it has one.
    #[serde(rename = "openApiSpec", default, skip_serializing_if = "Option::is_none")]
    pub openapi_spec: Option<OpenApiSource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged, deny_unknown_fields)]
pub enum OpenApiSource {
    Url { url: String },
    Path { path: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretConfig {
    /// The fake secret the guest was configured with. Detection is a
    /// substring search over header values.
    pub secret: String,
    /// Environment variable holding the real credential, resolved lazily at
    /// forward time and never persisted.
    #[serde(rename = "secretEnvVarName")]
    pub secret_env_var_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grants: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejections: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read configuration at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse configuration at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("could not serialize configuration: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("could not persist configuration: {0}")]
    Persist(#[from] std::io::Error),
    #[error("configuration writer task aborted")]
    WriterAborted,
}

/// Loads the document, treating an absent file as an empty configuration.
pub fn load_document(path: &Path) -> Result<ConfigDocument, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ConfigDocument::new()),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Serializes the document the way it is persisted: pretty-printed with a
/// trailing newline.
pub fn serialize_document(document: &ConfigDocument) -> Result<String, ConfigError> {
    let mut contents = serde_json::to_string_pretty(document)?;
    contents.push('\n');
    Ok(contents)
}

/// Writes the serialized document next to its final path and renames it into
/// place, so a crash mid-write never leaves a torn file.
pub(crate) fn write_document_atomically(path: &Path, contents: &str) -> Result<(), ConfigError> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut file = tempfile::NamedTempFile::new_in(dir.unwrap_or(Path::new(".")))?;
    file.write_all(contents.as_bytes())?;
    file.persist(path).map_err(|e| ConfigError::Persist(e.error))?;
    Ok(())
}
