//! The serving layer: an axum application fronted by a plaintext listener
//! and a TLS listener, both feeding the same proxy handler.
//!
//! The handler buffers the body, runs mediation, and either relays the
//! upstream exchange or answers with the mediation rejection. Client
//! disconnects cancel in-flight approval prompts through a per-request
//! token guard.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::response::Response;
use http::StatusCode;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crate::mediate::InboundRequest;
use crate::mediate::Mediator;
use crate::mediate::Outcome;
use crate::policy::PolicyStore;
use crate::upstream::UpstreamClient;

/// Liveness probe path, answered only for authorities the proxy does not
/// mediate (a configured origin keeps its whole path space).
pub const HEALTH_PATH: &str = "/.well-known/tollgate/health";

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct AppState {
    mediator: Arc<Mediator>,
    store: Arc<PolicyStore>,
    upstream: Arc<UpstreamClient>,
    /// Scheme used for the upstream URL; mirrors the listener the request
    /// arrived on.
    scheme: &'static str,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        mediator: Arc<Mediator>,
        store: Arc<PolicyStore>,
        upstream: Arc<UpstreamClient>,
        scheme: &'static str,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            mediator,
            store,
            upstream,
            scheme,
            shutdown,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().fallback(proxy).with_state(state)
}

async fn proxy(State(state): State<Arc<AppState>>, request: axum::extract::Request) -> Response {
    let (parts, body) = request.into_parts();

    let Some(authority) = request_authority(&parts) else {
        if parts.uri.path() == HEALTH_PATH {
            return (StatusCode::OK, "ok\n").into_response();
        }
        return (StatusCode::BAD_REQUEST, "missing Host header").into_response();
    };
    let host = strip_port(&authority).to_string();
    if parts.uri.path() == HEALTH_PATH && !state.store.is_known_host(&host) {
        return (StatusCode::OK, "ok\n").into_response();
    }

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, "could not buffer request body");
            return (StatusCode::BAD_REQUEST, "could not read request body").into_response();
        }
    };

    // Dropping the handler (client disconnect) trips the guard and cancels
    // any approval prompts spawned below.
    let cancel = state.shutdown.child_token();
    let _guard = cancel.clone().drop_guard();

    let inbound = InboundRequest {
        method: parts.method.clone(),
        path_and_query,
        headers: parts.headers.clone(),
        body,
    };
    let headers = match state.mediator.mediate(&host, &inbound, &cancel).await {
        Outcome::Passthrough { headers } | Outcome::Forward { headers } => headers,
        Outcome::Reject { status, reason } => {
            return (status, reason).into_response();
        }
    };

    match state
        .upstream
        .forward(
            state.scheme,
            &authority,
            &inbound.path_and_query,
            inbound.method.clone(),
            headers,
            inbound.body.clone(),
        )
        .await
    {
        Ok(upstream) => {
            let mut response = Response::new(Body::from(upstream.body));
            *response.status_mut() = upstream.status;
            *response.headers_mut() = upstream.headers;
            response
        }
        Err(e) => {
            tracing::error!(host = %host, error = %e, "upstream exchange failed");
            (StatusCode::BAD_GATEWAY, format!("upstream error: {e}")).into_response()
        }
    }
}

/// The authority the guest addressed: the `Host` header, or the URI
/// authority for absolute-form requests.
fn request_authority(parts: &http::request::Parts) -> Option<String> {
    parts
        .headers
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|a| a.as_str().to_string()))
}

/// Hostname without the port; IPv6 literals keep their brackets.
fn strip_port(authority: &str) -> &str {
    if authority.starts_with('[') {
        match authority.find(']') {
            Some(end) => &authority[..=end],
            None => authority,
        }
    } else {
        authority.split(':').next().unwrap_or(authority)
    }
}

/// Serves plaintext HTTP until the shutdown token fires.
pub async fn run_plain(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

/// Serves TLS with per-SNI certificates until the shutdown token fires.
pub async fn run_tls(
    listener: TcpListener,
    router: Router,
    config: Arc<rustls::ServerConfig>,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let acceptor = TlsAcceptor::from(config);
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            },
        };
        let acceptor = acceptor.clone();
        let router = router.clone();
        let connection_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(tls_stream) => tls_stream,
                Err(e) => {
                    tracing::debug!(%peer, error = %e, "TLS handshake failed");
                    return;
                }
            };
            let service = hyper::service::service_fn(
                move |request: hyper::Request<hyper::body::Incoming>| {
                    router.clone().oneshot(request)
                },
            );
            let connection = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(tls_stream), service);
            tokio::pin!(connection);
            tokio::select! {
                result = connection.as_mut() => {
                    if let Err(e) = result {
                        tracing::debug!(%peer, error = %e, "connection closed with error");
                    }
                }
                _ = connection_shutdown.cancelled() => {
                    connection.as_mut().graceful_shutdown();
                    let _ = connection.await;
                }
            }
        });
    }
}
