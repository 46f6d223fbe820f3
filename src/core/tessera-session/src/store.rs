//! Credential persistence.
//!
//! Two backends sit behind one store: a durable one ("remember me") and an
//! ephemeral one (session-only). At most one of them holds a credential pair
//! at any time. Nothing here fails loudly: absence is `None` and backend
//! faults are logged, since "no session" is a normal steady state.

use std::sync::Arc;

use tessera_storage::StorageBackend;
use tracing::{debug, warn};

use crate::{AuthToken, CredentialPair};

/// Keys used inside each backend.
pub mod keys {
    /// Access token.
    pub const ACCESS_TOKEN: &str = "access_token";
    /// Refresh token.
    pub const REFRESH_TOKEN: &str = "refresh_token";
    /// Durability flag. Only ever written to the durable backend.
    pub const REMEMBER_ME: &str = "remember_me";
}

/// Durable-or-ephemeral store for the credential pair.
#[derive(Clone)]
pub struct CredentialStore {
    durable: Arc<dyn StorageBackend>,
    ephemeral: Arc<dyn StorageBackend>,
}

impl CredentialStore {
    /// Creates a store over the two backends.
    pub fn new(durable: Arc<dyn StorageBackend>, ephemeral: Arc<dyn StorageBackend>) -> Self {
        Self { durable, ephemeral }
    }

    fn backend(&self, remember: bool) -> &dyn StorageBackend {
        if remember {
            self.durable.as_ref()
        } else {
            self.ephemeral.as_ref()
        }
    }

    /// Persists `tokens` under the given durability policy.
    ///
    /// Any pair left in either backend by a previous session is purged first,
    /// then the flag is written, then both tokens go into the selected backend.
    pub async fn save(&self, tokens: &AuthToken, remember: bool) {
        self.clear().await;

        let flag = if remember { "true" } else { "false" };
        if let Err(e) = self.durable.put(keys::REMEMBER_ME, flag).await {
            warn!(backend = self.durable.name(), error = %e, "Failed to write remember-me flag");
        }

        let backend = self.backend(remember);
        for (key, value) in [
            (keys::ACCESS_TOKEN, tokens.access_token.as_str()),
            (keys::REFRESH_TOKEN, tokens.refresh_token.as_str()),
        ] {
            if let Err(e) = backend.put(key, value).await {
                warn!(backend = backend.name(), key, error = %e, "Failed to persist credential");
            }
        }

        debug!(backend = backend.name(), remember, "Credentials saved");
    }

    /// The persisted durability flag. Missing or unreadable reads as `false`.
    pub async fn remember_me(&self) -> bool {
        match self.durable.get(keys::REMEMBER_ME).await {
            Ok(value) => value.as_deref() == Some("true"),
            Err(e) => {
                warn!(backend = self.durable.name(), error = %e, "Failed to read remember-me flag");
                false
            },
        }
    }

    /// Loads the pair from the backend the flag selects.
    ///
    /// Never consults the other backend. A half-present pair reads as `None`.
    pub async fn load(&self) -> Option<CredentialPair> {
        let remember = self.remember_me().await;
        let backend = self.backend(remember);

        let access_token = Self::read(backend, keys::ACCESS_TOKEN).await?;
        let refresh_token = Self::read(backend, keys::REFRESH_TOKEN).await?;

        debug!(backend = backend.name(), remember, "Credentials loaded");

        Some(CredentialPair {
            access_token,
            refresh_token,
        })
    }

    /// Purges the pair and the flag from both backends.
    pub async fn clear(&self) {
        for backend in [self.durable.as_ref(), self.ephemeral.as_ref()] {
            for key in [keys::ACCESS_TOKEN, keys::REFRESH_TOKEN, keys::REMEMBER_ME] {
                if let Err(e) = backend.remove(key).await {
                    warn!(backend = backend.name(), key, error = %e, "Failed to clear credential");
                }
            }
        }
    }

    async fn read(backend: &dyn StorageBackend, key: &str) -> Option<String> {
        match backend.get(key).await {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(backend = backend.name(), key, error = %e, "Failed to read credential");
                None
            },
        }
    }
}
