//! tollgate: a TLS-terminating forward proxy that mediates credential use.
//!
//! A guest workload is configured with fake secrets. The proxy detects them
//! in request headers, asks the operator through an approval transport, and
//! only then rewrites fake to real (resolved from the proxy host's
//! environment) and forwards. Requests that carry no fake secret pass
//! through untouched. See the `tollgate-policy` crate for the pattern
//! language and request normalization.

pub mod approval;
pub mod catalog;
pub mod configuration;
pub mod mediate;
pub mod policy;
pub mod secret;
pub mod server;
pub mod tls;
pub mod upstream;

pub use crate::approval::ApprovalDecision;
pub use crate::approval::ApprovalTransport;
pub use crate::mediate::Mediator;
pub use crate::mediate::Outcome;
pub use crate::policy::PolicyStore;
