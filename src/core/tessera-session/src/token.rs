//! Credential types.
//!
//! All three types wipe their token strings on drop and redact them in `Debug`
//! output.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::AuthError;

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// The credential pair held by an authenticated session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct AuthToken {
    /// Short-lived signed access token.
    pub access_token: String,
    /// Opaque refresh token. Rotated by the server on every renewal.
    pub refresh_token: String,
    /// Access token lifetime in seconds, as reported when it was issued.
    pub expires_in: u64,
    /// Usually `Bearer`.
    pub token_type: String,
}

impl AuthToken {
    /// The part of the token that gets persisted.
    pub fn pair(&self) -> CredentialPair {
        CredentialPair {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }

    /// Value for an `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Access + refresh token as persisted by the
/// [`CredentialStore`](crate::CredentialStore).
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct CredentialPair {
    /// Access token.
    pub access_token: String,
    /// Refresh token.
    pub refresh_token: String,
}

impl CredentialPair {
    /// Rebuilds a full token, `expires_in` being the remaining lifetime.
    pub fn to_token(&self, expires_in: u64) -> AuthToken {
        AuthToken {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_in,
            token_type: default_token_type(),
        }
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair").finish_non_exhaustive()
    }
}

/// Token payload returned by the Identity Service's `signin`, `signup` and
/// `refresh` endpoints.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct TokenResponse {
    /// New access token.
    pub access_token: String,
    /// New refresh token. Some servers omit it on refresh.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds.
    #[serde(default)]
    pub expires_in: u64,
    /// Token type.
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

impl TokenResponse {
    /// Converts into an [`AuthToken`].
    ///
    /// The refresh token is always the one the server just returned. Only when
    /// the server omitted it is `previous_refresh` carried over.
    pub fn into_token(mut self, previous_refresh: Option<&str>) -> Result<AuthToken, AuthError> {
        if self.access_token.is_empty() {
            return Err(AuthError::Identity("response carried no access token".into()));
        }

        let refresh_token = match self.refresh_token.take().filter(|t| !t.is_empty()) {
            Some(rotated) => rotated,
            None => previous_refresh
                .map(str::to_string)
                .ok_or_else(|| AuthError::Identity("response carried no refresh token".into()))?,
        };

        Ok(AuthToken {
            access_token: std::mem::take(&mut self.access_token),
            refresh_token,
            expires_in: self.expires_in,
            token_type: std::mem::take(&mut self.token_type),
        })
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("rotated_refresh", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish_non_exhaustive()
    }
}
