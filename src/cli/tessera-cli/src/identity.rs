//! HTTP client for the Identity Service.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tessera_session::{
    AuthError, Credentials, IdentityService, SignupData, TokenResponse, UserRecord,
};

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Serialize)]
struct SigninRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct ForgotPasswordRequest<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct ResetPasswordRequest<'a> {
    token: &'a str,
    user_id: &'a str,
    new_password: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(alias = "message", alias = "detail")]
    error: String,
}

/// Which call a failed response belongs to. Decides how statuses map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    SignIn,
    Refresh,
    Other,
}

/// Maps a non-success status onto the session error model.
fn status_error(call: Call, status: StatusCode, message: String) -> AuthError {
    match (call, status) {
        (Call::SignIn, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
            AuthError::InvalidCredentials
        },
        (
            Call::Refresh,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN,
        ) => AuthError::RefreshRejected,
        (_, status) if status.is_server_error() => {
            AuthError::Network(format!("identity service returned {status}: {message}"))
        },
        (_, status) => AuthError::Identity(format!("{status}: {message}")),
    }
}

// ============================================================================
// HTTP Client
// ============================================================================

/// [`IdentityService`] over the Identity Service's REST API.
pub struct HttpIdentityService {
    client: Client,
    base_url: String,
}

impl HttpIdentityService {
    /// Builds a client for `base_url` with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, call: Call, req: RequestBuilder) -> Result<Response, AuthError> {
        let resp = req
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let message = resp
            .json::<ErrorResponse>()
            .await
            .map(|e| e.error)
            .unwrap_or_else(|_| "Unknown error".into());
        debug!(?call, %status, %message, "Identity Service call failed");

        Err(status_error(call, status, message))
    }

    async fn json<T: DeserializeOwned>(resp: Response) -> Result<T, AuthError> {
        resp.json()
            .await
            .map_err(|e| AuthError::Identity(format!("failed to parse response: {e}")))
    }

    async fn user(&self, path: &str, access_token: &str) -> Result<UserRecord, AuthError> {
        let req = self.client.get(self.url(path)).bearer_auth(access_token);
        let resp = self.send(Call::Other, req).await?;
        Self::json(resp).await
    }
}

#[async_trait]
impl IdentityService for HttpIdentityService {
    async fn sign_in(&self, credentials: &Credentials) -> Result<TokenResponse, AuthError> {
        let body = SigninRequest {
            username: &credentials.email,
            password: &credentials.password,
        };
        let req = self.client.post(self.url("/auth/signin")).json(&body);
        let resp = self.send(Call::SignIn, req).await?;
        Self::json(resp).await
    }

    async fn sign_up(&self, data: &SignupData) -> Result<TokenResponse, AuthError> {
        let req = self.client.post(self.url("/auth/signup")).json(data);
        let resp = self.send(Call::Other, req).await?;
        Self::json(resp).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let req = self
            .client
            .post(self.url("/auth/refresh"))
            .json(&RefreshRequest { refresh_token });
        let resp = self.send(Call::Refresh, req).await?;
        Self::json(resp).await
    }

    async fn me(&self, access_token: &str) -> Result<UserRecord, AuthError> {
        self.user("/auth/me", access_token).await
    }

    async fn verify(&self, access_token: &str) -> Result<UserRecord, AuthError> {
        self.user("/auth/verify", access_token).await
    }

    async fn logout(&self, access_token: &str) -> Result<(), AuthError> {
        let req = self
            .client
            .post(self.url("/auth/logout"))
            .bearer_auth(access_token);
        self.send(Call::Other, req).await?;
        Ok(())
    }

    async fn forgot_password(&self, email: &str) -> Result<(), AuthError> {
        let req = self
            .client
            .post(self.url("/auth/forgot-password"))
            .json(&ForgotPasswordRequest { email });
        self.send(Call::Other, req).await?;
        Ok(())
    }

    async fn reset_password(
        &self,
        token: &str,
        user_id: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let req = self
            .client
            .post(self.url("/auth/reset-password"))
            .json(&ResetPasswordRequest {
                token,
                user_id,
                new_password,
            });
        self.send(Call::Other, req).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
