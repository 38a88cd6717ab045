//! In-memory policy store: the loaded configuration document plus the
//! write-through persistence of grant/rejection mutations.
//!
//! Reads take a brief shared lock. Mutations serialize through a dedicated
//! async writer mutex so two concurrent `*-forever` decisions cannot write
//! the file out of order; the insert itself is idempotent, so racing to add
//! the same pattern is harmless.

use std::path::Path;
use std::path::PathBuf;

use http::HeaderMap;
use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::configuration::ConfigDocument;
use crate::configuration::ConfigError;
use crate::configuration::SecretConfig;
use crate::configuration::load_document;
use crate::configuration::serialize_document;
use crate::configuration::write_document_atomically;

pub struct PolicyStore {
    hosts: RwLock<ConfigDocument>,
    path: Option<PathBuf>,
    writer: Mutex<()>,
}

/// Which of a secret's pattern lists to touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternList {
    Grants,
    Rejections,
}

impl PolicyStore {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self {
            hosts: RwLock::new(load_document(path)?),
            path: Some(path.to_path_buf()),
            writer: Mutex::new(()),
        })
    }

    /// An in-memory store that never persists; used by tests.
    pub fn in_memory(document: ConfigDocument) -> Self {
        Self {
            hosts: RwLock::new(document),
            path: None,
            writer: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> ConfigDocument {
        self.hosts.read().clone()
    }

    pub fn is_known_host(&self, host: &str) -> bool {
        self.hosts.read().contains_key(host)
    }

    /// The GraphQL endpoint paths configured for `host`.
    pub fn graphql_endpoints(&self, host: &str) -> Vec<String> {
        self.hosts
            .read()
            .get(host)
            .map(|h| h.graphql_endpoints.clone())
            .unwrap_or_default()
    }

    /// Finds the first configured secret whose fake value appears as a
    /// substring in any header value of the request.
    pub fn find_secret_config(&self, host: &str, headers: &HeaderMap) -> Option<SecretConfig> {
        let hosts = self.hosts.read();
        let config = hosts.get(host)?;
        config
            .secrets
            .iter()
            .find(|secret| {
                headers.iter().any(|(_, value)| {
                    value
                        .to_str()
                        .map(|v| v.contains(&secret.secret))
                        .unwrap_or(false)
                })
            })
            .cloned()
    }

    /// First rejection pattern covering `key`, in insertion order. Patterns
    /// that fail to parse are skipped with a diagnostic.
    pub fn matching_rejection(&self, host: &str, fake_secret: &str, key: &str) -> Option<String> {
        self.first_match(host, fake_secret, key, PatternList::Rejections)
    }

    /// First grant pattern covering `key`, in insertion order.
    pub fn matching_grant(&self, host: &str, fake_secret: &str, key: &str) -> Option<String> {
        self.first_match(host, fake_secret, key, PatternList::Grants)
    }

    fn first_match(
        &self,
        host: &str,
        fake_secret: &str,
        key: &str,
        list: PatternList,
    ) -> Option<String> {
        let hosts = self.hosts.read();
        let secret = secret_of(&hosts, host, fake_secret)?;
        let patterns = match list {
            PatternList::Grants => &secret.grants,
            PatternList::Rejections => &secret.rejections,
        };
        patterns.iter().find_map(|pattern| {
            match tollgate_policy::pattern::matches(pattern, key) {
                Ok(true) => Some(pattern.clone()),
                Ok(false) => None,
                Err(e) => {
                    tracing::warn!(host, pattern, error = %e, "skipping unmatchable pattern");
                    None
                }
            }
        })
    }

    pub async fn add_grant(
        &self,
        host: &str,
        fake_secret: &str,
        pattern: &str,
    ) -> Result<bool, ConfigError> {
        self.append(host, fake_secret, pattern, PatternList::Grants)
            .await
    }

    pub async fn add_rejection(
        &self,
        host: &str,
        fake_secret: &str,
        pattern: &str,
    ) -> Result<bool, ConfigError> {
        self.append(host, fake_secret, pattern, PatternList::Rejections)
            .await
    }

    /// Idempotent ordered insert; returns whether the list changed. A change
    /// re-serializes the whole document and replaces the file on disk.
    async fn append(
        &self,
        host: &str,
        fake_secret: &str,
        pattern: &str,
        list: PatternList,
    ) -> Result<bool, ConfigError> {
        let _writer = self.writer.lock().await;
        let serialized = {
            let mut hosts = self.hosts.write();
            let Some(secret) = hosts.get_mut(host).and_then(|h| {
                h.secrets
                    .iter_mut()
                    .find(|s| s.secret == fake_secret)
            }) else {
                return Ok(false);
            };
            let patterns = match list {
                PatternList::Grants => &mut secret.grants,
                PatternList::Rejections => &mut secret.rejections,
            };
            if patterns.iter().any(|p| p == pattern) {
                return Ok(false);
            }
            patterns.push(pattern.to_string());
            serialize_document(&hosts)?
        };
        if let Some(path) = self.path.clone() {
            tokio::task::spawn_blocking(move || write_document_atomically(&path, &serialized))
                .await
                .map_err(|_| ConfigError::WriterAborted)??;
        }
        Ok(true)
    }

    /// Resolves the real credential for a secret from the process
    /// environment. `None` means the variable is unset or not UTF-8.
    pub fn resolve_real_secret(&self, secret: &SecretConfig) -> Option<String> {
        std::env::var(&secret.secret_env_var_name).ok()
    }
}

fn secret_of<'doc>(
    hosts: &'doc ConfigDocument,
    host: &str,
    fake_secret: &str,
) -> Option<&'doc SecretConfig> {
    hosts
        .get(host)?
        .secrets
        .iter()
        .find(|s| s.secret == fake_secret)
}
