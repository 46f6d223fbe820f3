//! Identity Service collaborator.
//!
//! The session core never speaks HTTP itself. Anything that can sign users
//! in, rotate refresh tokens and describe the current user implements
//! [`IdentityService`].

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{AuthError, TokenResponse, UserRecord};

/// Email/password pair for `login`.
#[derive(Clone, Serialize, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    /// Account email. Sent as the username.
    pub email: String,
    /// Account password.
    pub password: String,
}

impl Credentials {
    /// Creates a credential pair.
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    /// Rejects blank fields before anything goes over the wire.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.email.trim().is_empty() {
            return Err(AuthError::InvalidInput("email must not be empty".into()));
        }
        if self.password.is_empty() {
            return Err(AuthError::InvalidInput("password must not be empty".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Registration payload for `signup`.
#[derive(Clone, Serialize, Zeroize, ZeroizeOnDrop)]
pub struct SignupData {
    /// Account email.
    pub email: String,
    /// Chosen password.
    pub password: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Organization to join, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

impl SignupData {
    /// Rejects blank required fields.
    pub fn validate(&self) -> Result<(), AuthError> {
        for (field, value) in [
            ("email", self.email.trim()),
            ("password", self.password.as_str()),
            ("first_name", self.first_name.trim()),
            ("last_name", self.last_name.trim()),
        ] {
            if value.is_empty() {
                return Err(AuthError::InvalidInput(format!("{field} must not be empty")));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SignupData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignupData")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("organization_id", &self.organization_id)
            .finish()
    }
}

/// Remote Identity Service.
///
/// Implementations map their transport failures onto [`AuthError`]:
/// a rejected password is [`AuthError::InvalidCredentials`], a refused
/// refresh token is [`AuthError::RefreshRejected`], an unreachable server is
/// [`AuthError::Network`].
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Exchanges an email/password pair for tokens.
    async fn sign_in(&self, credentials: &Credentials) -> Result<TokenResponse, AuthError>;

    /// Registers an account and returns its first tokens.
    async fn sign_up(&self, data: &SignupData) -> Result<TokenResponse, AuthError>;

    /// Exchanges a refresh token for a new pair.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError>;

    /// Describes the user the access token belongs to.
    async fn me(&self, access_token: &str) -> Result<UserRecord, AuthError>;

    /// Validates a restored access token.
    ///
    /// Defaults to [`IdentityService::me`].
    async fn verify(&self, access_token: &str) -> Result<UserRecord, AuthError> {
        self.me(access_token).await
    }

    /// Revokes the session server-side.
    async fn logout(&self, access_token: &str) -> Result<(), AuthError>;

    /// Starts password recovery for `email`.
    async fn forgot_password(&self, email: &str) -> Result<(), AuthError>;

    /// Completes password recovery.
    async fn reset_password(
        &self,
        token: &str,
        user_id: &str,
        new_password: &str,
    ) -> Result<(), AuthError>;

    /// Returns the service name for logs.
    fn name(&self) -> &'static str;
}
