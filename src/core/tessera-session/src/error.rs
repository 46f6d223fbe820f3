//! Session error types.

use tessera_access::Role;
use thiserror::Error;

/// Errors that can occur while establishing or maintaining a session.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Identity Service rejected the email/password pair.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Caller supplied unusable input (empty email, etc.).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A refresh was requested but no refresh token is stored.
    #[error("no refresh token stored")]
    NoRefreshToken,

    /// Identity Service refused the refresh token (invalid, expired or reused).
    #[error("refresh token rejected")]
    RefreshRejected,

    /// The requested role is not among the user's granted roles.
    #[error("role not granted: {0}")]
    RoleNotGranted(Role),

    /// Operation requires an authenticated session.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Access token claims could not be decoded.
    #[error("access token could not be decoded")]
    DecodeFailure,

    /// Identity Service could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// Identity Service answered with something unusable.
    #[error("identity service error: {0}")]
    Identity(String),

    /// A newer login, signup or logout took over while this call was in flight.
    #[error("superseded by a newer session transition")]
    Superseded,
}

impl AuthError {
    /// Text suitable for [`SessionState::error`](crate::SessionState::error).
    ///
    /// `None` for failures the user should not be told about.
    pub fn user_message(&self) -> Option<String> {
        match self {
            AuthError::InvalidCredentials => Some("Invalid email or password.".into()),
            AuthError::RefreshRejected => {
                Some("Your session has expired. Please sign in again.".into())
            },
            AuthError::Network(_) => Some("Unable to reach the identity service.".into()),
            AuthError::NoRefreshToken | AuthError::Superseded => None,
            other => Some(other.to_string()),
        }
    }
}
