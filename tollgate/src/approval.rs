//! The approval-transport boundary.
//!
//! The mediation core never talks to an operator directly; it hands an
//! [`ApprovalPrompt`] to whatever [`ApprovalTransport`] is bound and waits
//! for a decision. Transports own their timeout policy (a timed-out prompt
//! resolves to [`ApprovalDecision::RejectOnce`]) and must honor the
//! cancellation token by withdrawing or amending the prompt.

pub mod terminal;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tollgate_policy::PatternOption;

/// The operator's answer to one prompt. The two `Forever` variants carry
/// the pattern chosen from the offered [`PatternOption`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    AllowOnce,
    AllowForever(String),
    RejectOnce,
    RejectForever(String),
}

/// One pending question for the operator. `method_label` is the HTTP method,
/// or the literal `GRAPHQL` for per-field GraphQL prompts; `resource` is the
/// path (with query) or the rendered field expression. Secret values never
/// appear here.
#[derive(Debug, Clone)]
pub struct ApprovalPrompt<'a> {
    pub host: &'a str,
    pub method_label: &'a str,
    pub resource: &'a str,
    pub options: &'a [PatternOption],
}

#[async_trait]
pub trait ApprovalTransport: Send + Sync {
    /// Asks the operator about one request (or one GraphQL field). May
    /// suspend up to the transport's timeout; must support many concurrent
    /// outstanding prompts. When `cancel` fires the transport should
    /// withdraw the prompt and return promptly (the returned decision is
    /// then ignored).
    async fn request(
        &self,
        prompt: ApprovalPrompt<'_>,
        cancel: CancellationToken,
    ) -> ApprovalDecision;
}
