//! SNI-driven leaf certificate resolution.
//!
//! The proxy terminates TLS for every origin the guest talks to, presenting
//! a per-hostname leaf minted by an external PKI tool into the certificate
//! directory: `<dir>/<hostname>.crt` and `<dir>/<hostname>.key`, PEM
//! encoded. Certificates are loaded on first handshake and cached.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use rustls::ServerConfig;
use rustls::crypto::ring::sign::any_supported_type;
use rustls::server::ClientHello;
use rustls::server::ResolvesServerCert;
use rustls::sign::CertifiedKey;

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no certificates in {0}")]
    EmptyCertChain(PathBuf),
    #[error("no private key in {0}")]
    MissingKey(PathBuf),
    #[error("unusable private key in {path}: {source}")]
    BadKey {
        path: PathBuf,
        source: rustls::Error,
    },
}

#[derive(Debug)]
pub struct SniCertResolver {
    cert_dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<CertifiedKey>>>,
}

impl SniCertResolver {
    pub fn new(cert_dir: PathBuf) -> Self {
        Self {
            cert_dir,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn load(&self, hostname: &str) -> Result<Arc<CertifiedKey>, TlsError> {
        let cert_path = self.cert_dir.join(format!("{hostname}.crt"));
        let key_path = self.cert_dir.join(format!("{hostname}.key"));

        let cert_pem = std::fs::read(&cert_path).map_err(|source| TlsError::Read {
            path: cert_path.clone(),
            source,
        })?;
        let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| TlsError::Read {
                path: cert_path.clone(),
                source,
            })?;
        if certs.is_empty() {
            return Err(TlsError::EmptyCertChain(cert_path));
        }

        let key_pem = std::fs::read(&key_path).map_err(|source| TlsError::Read {
            path: key_path.clone(),
            source,
        })?;
        let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
            .map_err(|source| TlsError::Read {
                path: key_path.clone(),
                source,
            })?
            .ok_or_else(|| TlsError::MissingKey(key_path.clone()))?;
        let signing_key = any_supported_type(&key).map_err(|source| TlsError::BadKey {
            path: key_path,
            source,
        })?;

        Ok(Arc::new(CertifiedKey::new(certs, signing_key)))
    }
}

impl ResolvesServerCert for SniCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let hostname = client_hello.server_name()?;
        // Certificate file names are plain hostnames; refuse anything that
        // could escape the directory.
        if hostname.contains(['/', '\\']) || hostname.contains("..") {
            return None;
        }
        if let Some(cached) = self.cache.read().get(hostname) {
            return Some(Arc::clone(cached));
        }
        match self.load(hostname) {
            Ok(key) => {
                self.cache
                    .write()
                    .insert(hostname.to_string(), Arc::clone(&key));
                Some(key)
            }
            Err(e) => {
                tracing::warn!(hostname, error = %e, "no leaf certificate for SNI");
                None
            }
        }
    }
}

/// A server config that answers every SNI from the certificate directory
/// and speaks HTTP/1.1 to the guest.
pub fn server_config(cert_dir: PathBuf) -> Arc<ServerConfig> {
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SniCertResolver::new(cert_dir)));
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Arc::new(config)
}
