//! Access token claim decoding.
//!
//! Reads the payload segment of a `header.payload.signature` token. The
//! signature is NOT checked; that is the Identity Service's job. The decoded
//! claims are only used for refresh timing and client-side display.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::Deserialize;
use tracing::debug;

/// base64url, accepting payloads with or without `=` padding.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Claims the session core cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// Subject (user id).
    pub subject_id: String,
    /// Role names carried by the token.
    pub roles: Vec<String>,
    /// Absolute expiry in Unix milliseconds.
    pub expires_at_epoch_ms: i64,
}

impl TokenClaims {
    /// Milliseconds left before expiry at `now_ms`, floored at zero.
    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        (self.expires_at_epoch_ms - now_ms).max(0)
    }
}

#[derive(Deserialize)]
struct RawClaims {
    #[serde(default)]
    sub: String,
    exp: f64,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    role: Option<String>,
}

/// Decodes the claims of `access_token`.
///
/// Returns `None` for anything that is not a three-segment token with a
/// base64url JSON payload carrying a numeric `exp`.
pub fn decode(access_token: &str) -> Option<TokenClaims> {
    let mut segments = access_token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        debug!("access token is not three segments");
        return None;
    };

    if payload.is_empty() {
        debug!("access token payload segment is empty");
        return None;
    }

    let bytes = match PAYLOAD_ENGINE.decode(payload) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "access token payload is not base64url");
            return None;
        },
    };

    let raw: RawClaims = match serde_json::from_slice(&bytes) {
        Ok(raw) => raw,
        Err(e) => {
            debug!(error = %e, "access token payload is not a claims object");
            return None;
        },
    };

    if !raw.exp.is_finite() || raw.exp <= 0.0 {
        debug!("access token exp claim out of range");
        return None;
    }

    let mut roles = raw.roles;
    if let Some(role) = raw.role {
        if !roles.contains(&role) {
            roles.push(role);
        }
    }

    Some(TokenClaims {
        subject_id: raw.sub,
        roles,
        expires_at_epoch_ms: (raw.exp * 1000.0) as i64,
    })
}

/// Absolute expiry of `access_token` in Unix milliseconds, if decodable.
pub fn expires_at(access_token: &str) -> Option<i64> {
    decode(access_token).map(|claims| claims.expires_at_epoch_ms)
}
