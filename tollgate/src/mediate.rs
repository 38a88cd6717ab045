//! The per-request mediation flow.
//!
//! Every inbound request moves through the same stages: detect a fake
//! secret, classify as HTTP or GraphQL, look up rejections (always before
//! grants), and either forward with the real credential substituted or ask
//! the bound approval transport. The flow is fail-closed: no transport, a
//! parse failure, or an unresolvable pattern all end in a rejection, never
//! in silent forwarding.
//!
//! A GraphQL request is mediated per top-level field. When several fields
//! need approval the prompts run in parallel; the first rejection cancels
//! the siblings and rejects the whole request, since a GraphQL document is
//! atomic on the wire and cannot be partially forwarded.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use http::HeaderMap;
use http::Method;
use http::StatusCode;
use tokio_util::sync::CancellationToken;
use tollgate_policy::GraphQLField;
use tollgate_policy::NormalizedRequest;
use tollgate_policy::OperationKind;
use tollgate_policy::normalize;
use tollgate_policy::pattern;
use tollgate_policy::suggest;

use crate::approval::ApprovalDecision;
use crate::approval::ApprovalPrompt;
use crate::approval::ApprovalTransport;
use crate::catalog::OpenApiCatalog;
use crate::configuration::SecretConfig;
use crate::policy::PolicyStore;
use crate::secret;

/// The normalized pieces of an inbound request the mediator needs.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Path plus query string, as received.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// What the serving layer should do with the request.
#[derive(Debug)]
pub enum Outcome {
    /// No fake secret present: forward unmodified (minus `Host`).
    Passthrough { headers: HeaderMap },
    /// Mediation passed: forward with the real credential substituted.
    Forward { headers: HeaderMap },
    Reject { status: StatusCode, reason: String },
}

impl Outcome {
    fn reject(status: StatusCode, reason: impl Into<String>) -> Self {
        Outcome::Reject {
            status,
            reason: reason.into(),
        }
    }
}

pub struct Mediator {
    store: Arc<PolicyStore>,
    transport: Option<Arc<dyn ApprovalTransport>>,
    catalog: Arc<OpenApiCatalog>,
}

impl Mediator {
    pub fn new(
        store: Arc<PolicyStore>,
        transport: Option<Arc<dyn ApprovalTransport>>,
        catalog: Arc<OpenApiCatalog>,
    ) -> Self {
        Self {
            store,
            transport,
            catalog,
        }
    }

    /// Runs the whole flow for one request. `cancel` is cancelled when the
    /// client goes away; outstanding approval prompts are withdrawn through
    /// child tokens.
    pub async fn mediate(
        &self,
        host: &str,
        request: &InboundRequest,
        cancel: &CancellationToken,
    ) -> Outcome {
        let Some(secret) = self.store.find_secret_config(host, &request.headers) else {
            return Outcome::Passthrough {
                headers: secret::without_host(&request.headers),
            };
        };
        let path = request
            .path_and_query
            .split('?')
            .next()
            .unwrap_or(&request.path_and_query);
        if self.store.graphql_endpoints(host).iter().any(|e| e == path) {
            self.mediate_graphql(host, &secret, request, cancel).await
        } else {
            self.mediate_http(host, &secret, request, path, cancel).await
        }
    }

    async fn mediate_http(
        &self,
        host: &str,
        secret: &SecretConfig,
        request: &InboundRequest,
        path: &str,
        cancel: &CancellationToken,
    ) -> Outcome {
        let key = pattern::http_request_key(request.method.as_str(), &request.path_and_query);
        if let Some(matched) = self.store.matching_rejection(host, &secret.secret, &key) {
            tracing::info!(host, pattern = %matched, "permanent rejection matched pattern");
            return Outcome::reject(
                StatusCode::FORBIDDEN,
                format!("rejected by permanent policy ({matched})"),
            );
        }
        if let Some(matched) = self.store.matching_grant(host, &secret.secret, &key) {
            tracing::info!(host, pattern = %matched, "permanent grant matched pattern");
            return self.substitute(host, secret, &request.headers);
        }
        let Some(transport) = &self.transport else {
            tracing::warn!(host, %key, "no approval handler bound; rejecting");
            return Outcome::reject(StatusCode::FORBIDDEN, "no approval handler bound");
        };

        let template = self.catalog.lookup(host, request.method.as_str(), path);
        let options =
            suggest::http_suggestions(request.method.as_str(), &request.path_and_query, template);
        let decision = transport
            .request(
                ApprovalPrompt {
                    host,
                    method_label: request.method.as_str(),
                    resource: &request.path_and_query,
                    options: &options,
                },
                cancel.child_token(),
            )
            .await;
        self.apply_decision(host, secret, &request.headers, decision)
            .await
    }

    async fn mediate_graphql(
        &self,
        host: &str,
        secret: &SecretConfig,
        request: &InboundRequest,
        cancel: &CancellationToken,
    ) -> Outcome {
        let normalized = match normalize_request(request) {
            Ok(normalized) => normalized,
            Err(e) => {
                tracing::info!(host, error = %e, "rejecting malformed GraphQL request");
                return Outcome::reject(
                    StatusCode::BAD_REQUEST,
                    format!("invalid GraphQL request: {e}"),
                );
            }
        };
        let keys = normalized.request_keys();

        // Rejections short-circuit before any approval is requested: a
        // rejected field cannot be forwarded in isolation.
        for (_, _, key) in &keys {
            if let Some(matched) = self.store.matching_rejection(host, &secret.secret, key) {
                tracing::info!(host, pattern = %matched, "permanent rejection matched pattern");
                return Outcome::reject(
                    StatusCode::FORBIDDEN,
                    format!("rejected by permanent policy ({matched})"),
                );
            }
        }

        let needs_approval: Vec<(OperationKind, GraphQLField, String)> = keys
            .into_iter()
            .filter(|(_, _, key)| {
                match self.store.matching_grant(host, &secret.secret, key) {
                    Some(matched) => {
                        tracing::info!(host, pattern = %matched, "permanent grant matched pattern");
                        false
                    }
                    None => true,
                }
            })
            .collect();
        if needs_approval.is_empty() {
            return self.substitute(host, secret, &request.headers);
        }
        let Some(transport) = &self.transport else {
            tracing::warn!(host, "no approval handler bound; rejecting");
            return Outcome::reject(StatusCode::FORBIDDEN, "no approval handler bound");
        };

        if let [(kind, field, _)] = needs_approval.as_slice() {
            let options = suggest::graphql_suggestions(*kind, field);
            let resource = format!("{kind} {field}");
            let decision = transport
                .request(
                    ApprovalPrompt {
                        host,
                        method_label: pattern::GRAPHQL_METHOD,
                        resource: &resource,
                        options: &options,
                    },
                    cancel.child_token(),
                )
                .await;
            return self
                .apply_decision(host, secret, &request.headers, decision)
                .await;
        }

        self.parallel_approvals(host, secret, request, transport, &needs_approval, cancel)
            .await
    }

    /// One approval round per non-granted field, in parallel. The first
    /// rejection cancels the siblings. Grants picked up along the way are
    /// persisted only if every sibling allows; a cancelled round discards
    /// them, because the operator never approved the batch as a whole.
    async fn parallel_approvals(
        &self,
        host: &str,
        secret: &SecretConfig,
        request: &InboundRequest,
        transport: &Arc<dyn ApprovalTransport>,
        needs_approval: &[(OperationKind, GraphQLField, String)],
        cancel: &CancellationToken,
    ) -> Outcome {
        let round_cancel = cancel.child_token();
        let mut pending = FuturesUnordered::new();
        for (kind, field, key) in needs_approval {
            let options = suggest::graphql_suggestions(*kind, field);
            let resource = format!("{kind} {field}");
            let transport = Arc::clone(transport);
            let token = round_cancel.clone();
            pending.push(async move {
                let decision = transport
                    .request(
                        ApprovalPrompt {
                            host,
                            method_label: pattern::GRAPHQL_METHOD,
                            resource: &resource,
                            options: &options,
                        },
                        token,
                    )
                    .await;
                (key, decision)
            });
        }

        let mut grants_to_add: Vec<String> = Vec::new();
        while let Some((key, decision)) = pending.next().await {
            match decision {
                ApprovalDecision::AllowOnce => {}
                ApprovalDecision::AllowForever(pattern) => grants_to_add.push(pattern),
                ApprovalDecision::RejectOnce => {
                    round_cancel.cancel();
                    tracing::info!(host, %key, "approval denied; cancelling sibling prompts");
                    return Outcome::reject(StatusCode::FORBIDDEN, "rejected by operator");
                }
                ApprovalDecision::RejectForever(pattern) => {
                    round_cancel.cancel();
                    tracing::info!(host, pattern = %pattern, "rejected forever with pattern");
                    if let Err(e) = self.store.add_rejection(host, &secret.secret, &pattern).await {
                        tracing::error!(host, error = %e, "could not persist rejection");
                    }
                    return Outcome::reject(
                        StatusCode::FORBIDDEN,
                        format!("rejected by permanent policy ({pattern})"),
                    );
                }
            }
        }

        for pattern in grants_to_add {
            tracing::info!(host, pattern = %pattern, "approved forever with pattern");
            if let Err(e) = self.store.add_grant(host, &secret.secret, &pattern).await {
                tracing::error!(host, error = %e, "could not persist grant");
            }
        }
        self.substitute(host, secret, &request.headers)
    }

    async fn apply_decision(
        &self,
        host: &str,
        secret: &SecretConfig,
        headers: &HeaderMap,
        decision: ApprovalDecision,
    ) -> Outcome {
        match decision {
            ApprovalDecision::AllowOnce => {
                tracing::info!(host, "approved once");
                self.substitute(host, secret, headers)
            }
            ApprovalDecision::AllowForever(pattern) => {
                tracing::info!(host, pattern = %pattern, "approved forever with pattern");
                if let Err(e) = self.store.add_grant(host, &secret.secret, &pattern).await {
                    tracing::error!(host, error = %e, "could not persist grant");
                }
                self.substitute(host, secret, headers)
            }
            ApprovalDecision::RejectOnce => {
                tracing::info!(host, "approval denied");
                Outcome::reject(StatusCode::FORBIDDEN, "rejected by operator")
            }
            ApprovalDecision::RejectForever(pattern) => {
                tracing::info!(host, pattern = %pattern, "rejected forever with pattern");
                if let Err(e) = self.store.add_rejection(host, &secret.secret, &pattern).await {
                    tracing::error!(host, error = %e, "could not persist rejection");
                }
                Outcome::reject(
                    StatusCode::FORBIDDEN,
                    format!("rejected by permanent policy ({pattern})"),
                )
            }
        }
    }

    fn substitute(&self, host: &str, secret: &SecretConfig, headers: &HeaderMap) -> Outcome {
        let Some(real) = self.store.resolve_real_secret(secret) else {
            tracing::error!(
                host,
                env_var = %secret.secret_env_var_name,
                "no real secret configured"
            );
            return Outcome::reject(StatusCode::INTERNAL_SERVER_ERROR, "no real secret configured");
        };
        match secret::substitute(headers, &secret.secret, &real) {
            Ok(headers) => Outcome::Forward { headers },
            Err(e) => {
                tracing::error!(host, error = %e, "could not substitute real secret");
                Outcome::reject(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }
}

/// Parses the GraphQL request from wherever this HTTP method carries it:
/// query parameters for GET and HEAD, the body for everything else.
fn normalize_request(request: &InboundRequest) -> Result<NormalizedRequest, normalize::NormalizeError> {
    if request.method == Method::GET || request.method == Method::HEAD {
        let query = request
            .path_and_query
            .split_once('?')
            .map(|(_, q)| q)
            .unwrap_or("");
        let params: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        let find = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };
        normalize::normalize_get(find("query"), find("variables"), find("operationName"))
    } else {
        let body = std::str::from_utf8(&request.body)
            .map_err(|_| normalize::NormalizeError::BodyNotUtf8)?;
        normalize::normalize_body(body)
    }
}
