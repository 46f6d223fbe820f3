//! # Tessera Session
//!
//! Client-side session core: who is signed in, with which credential, under
//! which active role.
//!
//! ## Components
//!
//! - [`codec`] - reads access-token claims without verifying the signature
//! - [`CredentialStore`] - durable vs. ephemeral persistence of the token pair
//! - [`RefreshScheduler`] - single cancellable timer that renews ahead of expiry
//! - [`SessionManager`] - the state machine the application surface talks to
//!
//! The Identity Service itself is abstracted behind [`IdentityService`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod identity;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod store;
pub mod token;
pub mod user;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::TokenClaims;
pub use config::SessionConfig;
pub use error::AuthError;
pub use identity::{Credentials, IdentityService, SignupData};
pub use scheduler::RefreshScheduler;
pub use session::SessionManager;
pub use state::{SessionPhase, SessionState};
pub use store::CredentialStore;
pub use token::{AuthToken, CredentialPair, TokenResponse};
pub use user::{User, UserRecord};

pub use tessera_access::{Action, Module, Permission, Role};
