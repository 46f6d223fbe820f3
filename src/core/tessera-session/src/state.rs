//! Observable session state.

use crate::{AuthToken, User};

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// `initialize` has not run yet.
    Uninitialized,
    /// Restoring a persisted session.
    Initializing,
    /// `login` in flight.
    LoggingIn,
    /// `signup` in flight.
    SigningUp,
    /// Signed in.
    Authenticated,
    /// Renewing the access token.
    Refreshing,
    /// `logout` in flight.
    LoggingOut,
    /// Signed out.
    Unauthenticated,
}

impl SessionPhase {
    /// Lowercase name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Uninitialized => "uninitialized",
            SessionPhase::Initializing => "initializing",
            SessionPhase::LoggingIn => "logging_in",
            SessionPhase::SigningUp => "signing_up",
            SessionPhase::Authenticated => "authenticated",
            SessionPhase::Refreshing => "refreshing",
            SessionPhase::LoggingOut => "logging_out",
            SessionPhase::Unauthenticated => "unauthenticated",
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot published to subscribers on every transition.
///
/// `user` and `tokens` are either both present or both absent, except while
/// `Refreshing`, which keeps the previous pair until the new one commits.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    /// Signed-in user.
    pub user: Option<User>,
    /// Current credential pair.
    pub tokens: Option<AuthToken>,
    /// Lifecycle phase.
    pub phase: SessionPhase,
    /// Last user-facing failure, cleared by the next successful transition.
    pub error: Option<String>,
}

impl SessionState {
    /// State before `initialize`.
    pub fn uninitialized() -> Self {
        Self {
            user: None,
            tokens: None,
            phase: SessionPhase::Uninitialized,
            error: None,
        }
    }

    /// Signed in as `user`.
    pub fn authenticated(user: User, tokens: AuthToken) -> Self {
        Self {
            user: Some(user),
            tokens: Some(tokens),
            phase: SessionPhase::Authenticated,
            error: None,
        }
    }

    /// Signed out, optionally with a message.
    pub fn unauthenticated(error: Option<String>) -> Self {
        Self {
            user: None,
            tokens: None,
            phase: SessionPhase::Unauthenticated,
            error,
        }
    }

    /// Signed-out state carrying a loading phase.
    pub(crate) fn loading(phase: SessionPhase) -> Self {
        Self {
            phase,
            ..Self::unauthenticated(None)
        }
    }

    /// Is there a user and a credential pair?
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some() && self.tokens.is_some()
    }

    /// Is an initialize, login, signup or refresh in flight?
    pub fn is_loading(&self) -> bool {
        matches!(
            self.phase,
            SessionPhase::Initializing
                | SessionPhase::LoggingIn
                | SessionPhase::SigningUp
                | SessionPhase::Refreshing
        )
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::uninitialized()
    }
}
