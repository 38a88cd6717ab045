//! Request-analysis core for the tollgate proxy.
//!
//! This crate is deliberately free of I/O and async: it normalizes observed
//! requests into canonical request keys, matches them against stored
//! grant/rejection patterns, and proposes new patterns for the operator to
//! approve. The serving layer in the `tollgate` crate composes these pieces
//! into the per-request mediation flow.

pub mod graphql;
pub mod normalize;
pub mod openapi;
pub mod pattern;
pub mod suggest;

pub use crate::graphql::ArgValue;
pub use crate::graphql::GraphQLField;
pub use crate::graphql::OperationKind;
pub use crate::normalize::NormalizeError;
pub use crate::normalize::NormalizedRequest;
pub use crate::openapi::OpenApiIndex;
pub use crate::openapi::OpenApiPath;
pub use crate::pattern::PatternError;
pub use crate::suggest::PatternOption;
