//! Access control error types.

use thiserror::Error;

/// Errors produced when parsing access-control identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// Role name not in the policy.
    #[error("unknown role: {0}")]
    UnknownRole(String),

    /// Module name not in the policy.
    #[error("unknown module: {0}")]
    UnknownModule(String),

    /// Action name not in the policy.
    #[error("unknown action: {0}")]
    UnknownAction(String),
}
