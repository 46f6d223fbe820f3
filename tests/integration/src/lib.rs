//! Integration tests for the Tessera session core.
//!
//! [`FakeIdentityService`] stands in for the remote Identity Service. It mints
//! real HS256 tokens, rotates refresh tokens on every renewal and can be
//! scripted to fail, so the tests can drive [`SessionManager`] end to end
//! against the real credential backends.

// Allow unwrap() in tests - panics are acceptable for test assertions
#![allow(clippy::disallowed_methods)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use tessera_session::{
    AuthError, Clock, CredentialStore, Credentials, IdentityService, ManualClock, SessionConfig,
    SessionManager, SignupData, TokenResponse, UserRecord,
};
use tessera_storage::MemoryBackend;
use tessera_storage_sqlite::SqliteBackend;

/// Epoch the fake clock starts at.
pub const T0: i64 = 1_700_000_000_000;

const SIGNING_KEY: &[u8] = b"identity-service-signing-key";

// ============================================================================
// Fake Identity Service
// ============================================================================

/// How a scripted refresh fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The refresh token is refused.
    Reject,
    /// The service cannot be reached.
    Offline,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: u64,
    jti: u64,
    roles: Vec<String>,
}

struct Account {
    password: String,
    record: UserRecord,
}

struct FakeState {
    accounts: HashMap<String, Account>,
    refresh_tokens: HashMap<String, String>,
    revoked: HashSet<String>,
    refresh_fault: Option<Fault>,
    offline: bool,
    rotate: bool,
    serial: u64,
}

/// In-process Identity Service.
pub struct FakeIdentityService {
    clock: ManualClock,
    lifetime: Duration,
    latency: Duration,
    state: Mutex<FakeState>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

fn record(email: &str, roles: &[&str], active_role: Option<&str>) -> UserRecord {
    UserRecord {
        id: format!("usr_{}", email.split('@').next().unwrap_or(email)),
        email: email.to_string(),
        display_name: None,
        first_name: None,
        last_name: None,
        roles: roles.iter().map(|r| r.to_string()).collect(),
        active_role: active_role.map(String::from),
        organization_id: Some("org_acme".into()),
        mfa_enabled: false,
        created_at: Some("2024-01-01T00:00:00Z".into()),
        updated_at: None,
    }
}

impl FakeIdentityService {
    /// Creates a service with the standard accounts and 10-minute tokens.
    pub fn new(clock: ManualClock) -> Self {
        let service = Self {
            clock,
            lifetime: Duration::from_secs(10 * 60),
            latency: Duration::ZERO,
            state: Mutex::new(FakeState {
                accounts: HashMap::new(),
                refresh_tokens: HashMap::new(),
                revoked: HashSet::new(),
                refresh_fault: None,
                offline: false,
                rotate: true,
                serial: 0,
            }),
            calls: Mutex::new(HashMap::new()),
        };

        service.add_account("admin@x.com", "Admin123", &["admin"], None);
        service.add_account("coder@x.com", "Coder123", &["coder"], None);
        service.add_account("multi@x.com", "Multi123", &["coder", "billing"], Some("billing"));
        service
    }

    /// Every call waits `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Registers an account.
    pub fn add_account(&self, email: &str, password: &str, roles: &[&str], active: Option<&str>) {
        self.state.lock().unwrap().accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                record: record(email, roles, active),
            },
        );
    }

    /// Makes every following refresh fail with `fault`, or succeed again.
    pub fn fail_refresh(&self, fault: Option<Fault>) {
        self.state.lock().unwrap().refresh_fault = fault;
    }

    /// Takes the whole service offline, or back online.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    /// Whether refresh responses carry a new refresh token.
    pub fn set_rotation(&self, rotate: bool) {
        self.state.lock().unwrap().rotate = rotate;
    }

    /// Number of times `call` was made.
    pub fn calls(&self, call: &str) -> usize {
        self.calls.lock().unwrap().get(call).copied().unwrap_or(0)
    }

    /// Refresh tokens the service would still accept.
    pub fn live_refresh_tokens(&self) -> usize {
        self.state.lock().unwrap().refresh_tokens.len()
    }

    async fn enter(&self, call: &'static str) -> Result<(), AuthError> {
        *self.calls.lock().unwrap().entry(call).or_default() += 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.state.lock().unwrap().offline {
            return Err(AuthError::Network("connection refused".into()));
        }
        Ok(())
    }

    fn mint(&self, state: &mut FakeState, email: &str) -> TokenResponse {
        state.serial += 1;
        let account = &state.accounts[email];
        let claims = Claims {
            sub: account.record.id.clone(),
            exp: (self.clock.now_epoch_ms() / 1000) as u64 + self.lifetime.as_secs(),
            jti: state.serial,
            roles: account.record.roles.clone(),
        };
        let access_token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SIGNING_KEY),
        )
        .expect("failed to encode JWT");

        let refresh_token = format!("rt_{}_{}", account.record.id, state.serial);
        state
            .refresh_tokens
            .insert(refresh_token.clone(), email.to_string());

        TokenResponse {
            access_token,
            refresh_token: Some(refresh_token),
            expires_in: self.lifetime.as_secs(),
            token_type: "Bearer".into(),
        }
    }

    fn authenticate(&self, access_token: &str) -> Result<UserRecord, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;

        let claims = decode::<Claims>(
            access_token,
            &DecodingKey::from_secret(SIGNING_KEY),
            &validation,
        )
        .map_err(|e| AuthError::Identity(format!("invalid token: {e}")))?
        .claims;

        let state = self.state.lock().unwrap();
        if state.revoked.contains(access_token) {
            return Err(AuthError::Identity("token revoked".into()));
        }
        if (claims.exp as i64) * 1000 <= self.clock.now_epoch_ms() {
            return Err(AuthError::Identity("token expired".into()));
        }

        state
            .accounts
            .values()
            .find(|a| a.record.id == claims.sub)
            .map(|a| a.record.clone())
            .ok_or_else(|| AuthError::Identity("unknown subject".into()))
    }
}

#[async_trait]
impl IdentityService for FakeIdentityService {
    async fn sign_in(&self, credentials: &Credentials) -> Result<TokenResponse, AuthError> {
        self.enter("sign_in").await?;
        let mut state = self.state.lock().unwrap();
        let valid = state
            .accounts
            .get(&credentials.email)
            .is_some_and(|a| a.password == credentials.password);
        if !valid {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(self.mint(&mut state, &credentials.email))
    }

    async fn sign_up(&self, data: &SignupData) -> Result<TokenResponse, AuthError> {
        self.enter("sign_up").await?;
        let mut state = self.state.lock().unwrap();
        if state.accounts.contains_key(&data.email) {
            return Err(AuthError::Identity("email already registered".into()));
        }

        let mut rec = record(&data.email, &["coder"], None);
        rec.first_name = Some(data.first_name.clone());
        rec.last_name = Some(data.last_name.clone());
        rec.organization_id = data.organization_id.clone();
        state.accounts.insert(
            data.email.clone(),
            Account {
                password: data.password.clone(),
                record: rec,
            },
        );

        Ok(self.mint(&mut state, &data.email))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        self.enter("refresh").await?;
        let mut state = self.state.lock().unwrap();

        match state.refresh_fault {
            Some(Fault::Reject) => return Err(AuthError::RefreshRejected),
            Some(Fault::Offline) => return Err(AuthError::Network("connection reset".into())),
            None => {},
        }

        let Some(email) = state.refresh_tokens.get(refresh_token).cloned() else {
            return Err(AuthError::RefreshRejected);
        };

        let mut response = self.mint(&mut state, &email);
        if state.rotate {
            state.refresh_tokens.remove(refresh_token);
        } else if let Some(unused) = response.refresh_token.take() {
            state.refresh_tokens.remove(&unused);
        }
        Ok(response)
    }

    async fn me(&self, access_token: &str) -> Result<UserRecord, AuthError> {
        self.enter("me").await?;
        self.authenticate(access_token)
    }

    async fn verify(&self, access_token: &str) -> Result<UserRecord, AuthError> {
        self.enter("verify").await?;
        self.authenticate(access_token)
    }

    async fn logout(&self, access_token: &str) -> Result<(), AuthError> {
        self.enter("logout").await?;
        let mut state = self.state.lock().unwrap();
        state.revoked.insert(access_token.to_string());
        Ok(())
    }

    async fn forgot_password(&self, _email: &str) -> Result<(), AuthError> {
        self.enter("forgot_password").await
    }

    async fn reset_password(
        &self,
        token: &str,
        user_id: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        self.enter("reset_password").await?;
        if token != format!("reset_{user_id}") {
            return Err(AuthError::Identity("invalid reset token".into()));
        }

        let mut state = self.state.lock().unwrap();
        let account = state
            .accounts
            .values_mut()
            .find(|a| a.record.id == user_id)
            .ok_or_else(|| AuthError::Identity("unknown user".into()))?;
        account.password = new_password.to_string();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Session wired to in-memory backends.
pub struct MemorySession {
    /// Session under test.
    pub session: SessionManager,
    /// Durable backend.
    pub durable: MemoryBackend,
    /// Ephemeral backend.
    pub ephemeral: MemoryBackend,
}

/// Builds a session over fresh in-memory backends, or over `durable` if given.
pub fn memory_session(
    identity: &Arc<FakeIdentityService>,
    clock: &ManualClock,
    durable: Option<MemoryBackend>,
) -> MemorySession {
    let durable = durable.unwrap_or_default();
    let ephemeral = MemoryBackend::new();
    let store = CredentialStore::new(Arc::new(durable.clone()), Arc::new(ephemeral.clone()));

    MemorySession {
        session: SessionManager::with_clock(
            identity.clone(),
            store,
            SessionConfig::default(),
            Arc::new(clock.clone()),
        ),
        durable,
        ephemeral,
    }
}

/// Builds a session whose durable backend is the profile's SQLite database
/// under `dir`. Each call is a fresh "process": new ephemeral backend.
pub async fn sqlite_session(
    dir: &Path,
    profile: &str,
    identity: &Arc<FakeIdentityService>,
    clock: &ManualClock,
) -> (SessionManager, SqliteBackend) {
    let durable = SqliteBackend::open(dir, profile).await.unwrap();
    let store = CredentialStore::new(Arc::new(durable.clone()), Arc::new(MemoryBackend::new()));

    let session = SessionManager::with_clock(
        identity.clone(),
        store,
        SessionConfig::default(),
        Arc::new(clock.clone()),
    );
    (session, durable)
}

/// Moves the wall clock and Tokio's paused timer together.
pub async fn elapse(clock: &ManualClock, by: Duration) {
    clock.advance(by);
    tokio::time::sleep(by).await;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tessera_access as access;
    use tessera_session::store::keys;
    use tessera_session::{codec, Action, Module, Role, SessionPhase};
    use tessera_storage::StorageBackend;

    const MINUTE: Duration = Duration::from_secs(60);

    fn setup() -> (ManualClock, Arc<FakeIdentityService>) {
        let clock = ManualClock::new(T0);
        let identity = Arc::new(FakeIdentityService::new(clock.clone()));
        (clock, identity)
    }

    fn admin() -> Credentials {
        Credentials::new("admin@x.com", "Admin123")
    }

    fn coder() -> Credentials {
        Credentials::new("coder@x.com", "Coder123")
    }

    // ------------------------------------------------------------------------
    // Durable storage
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_remembered_login_lands_in_sqlite() {
        let dir = TempDir::new().unwrap();
        let (clock, identity) = setup();
        let (session, durable) = sqlite_session(dir.path(), "default", &identity, &clock).await;

        let user = session.login(admin(), true).await.unwrap();

        assert!(session.is_authenticated());
        assert!(user.roles().contains(&user.active_role()));

        let tokens = session.tokens().unwrap();
        assert_eq!(
            durable.get(keys::ACCESS_TOKEN).await.unwrap().as_deref(),
            Some(tokens.access_token.as_str())
        );
        assert_eq!(
            durable.get(keys::REFRESH_TOKEN).await.unwrap().as_deref(),
            Some(tokens.refresh_token.as_str())
        );
        assert_eq!(
            durable.get(keys::REMEMBER_ME).await.unwrap().as_deref(),
            Some("true")
        );
    }

    #[tokio::test]
    async fn test_remembered_session_survives_restart() {
        let dir = TempDir::new().unwrap();
        let (clock, identity) = setup();

        let (first, _) = sqlite_session(dir.path(), "default", &identity, &clock).await;
        first.login(admin(), true).await.unwrap();
        let tokens = first.tokens().unwrap();
        first.shutdown().await;
        drop(first);

        clock.advance(2 * MINUTE);
        let (second, _) = sqlite_session(dir.path(), "default", &identity, &clock).await;
        let state = second.initialize().await;

        assert!(state.is_authenticated());
        assert_eq!(state.tokens.unwrap().pair(), tokens.pair());
        assert_eq!(second.active_role(), Some(Role::Admin));
        assert_eq!(identity.calls("verify"), 1);
        assert!(second.refresh_pending());
    }

    #[tokio::test]
    async fn test_session_only_login_does_not_survive_restart() {
        let dir = TempDir::new().unwrap();
        let (clock, identity) = setup();

        let (first, durable) = sqlite_session(dir.path(), "default", &identity, &clock).await;
        first.login(admin(), false).await.unwrap();
        assert!(durable.get(keys::ACCESS_TOKEN).await.unwrap().is_none());
        drop(first);

        let (second, _) = sqlite_session(dir.path(), "default", &identity, &clock).await;
        let state = second.initialize().await;

        assert_eq!(state.phase, SessionPhase::Unauthenticated);
        assert_eq!(identity.calls("verify"), 0);
    }

    #[tokio::test]
    async fn test_second_login_evicts_first_session() {
        let dir = TempDir::new().unwrap();
        let (clock, identity) = setup();
        let (session, durable) = sqlite_session(dir.path(), "default", &identity, &clock).await;

        session.login(admin(), true).await.unwrap();
        let first = session.tokens().unwrap();
        session.login(coder(), false).await.unwrap();

        assert!(durable.get(keys::ACCESS_TOKEN).await.unwrap().is_none());
        assert!(durable.get(keys::REFRESH_TOKEN).await.unwrap().is_none());
        assert_ne!(session.tokens().unwrap().access_token, first.access_token);

        // A restart finds nothing to restore.
        drop(session);
        let (restarted, _) = sqlite_session(dir.path(), "default", &identity, &clock).await;
        assert!(!restarted.initialize().await.is_authenticated());
    }

    #[tokio::test]
    async fn test_profiles_remember_separate_sessions() {
        let dir = TempDir::new().unwrap();
        let (clock, identity) = setup();

        let (work, _) = sqlite_session(dir.path(), "work", &identity, &clock).await;
        work.login(admin(), true).await.unwrap();
        let (audit, _) = sqlite_session(dir.path(), "audit", &identity, &clock).await;
        audit.login(coder(), true).await.unwrap();
        drop((work, audit));

        let (work, _) = sqlite_session(dir.path(), "work", &identity, &clock).await;
        let (audit, _) = sqlite_session(dir.path(), "audit", &identity, &clock).await;
        work.initialize().await;
        audit.initialize().await;

        assert_eq!(work.active_role(), Some(Role::Admin));
        assert_eq!(audit.active_role(), Some(Role::Coder));
    }

    #[tokio::test]
    async fn test_logout_twice_leaves_sqlite_empty() {
        let dir = TempDir::new().unwrap();
        let (clock, identity) = setup();
        let (session, durable) = sqlite_session(dir.path(), "default", &identity, &clock).await;
        session.login(admin(), true).await.unwrap();
        let access_token = session.tokens().unwrap().access_token.clone();

        session.logout().await;
        session.logout().await;

        assert!(!session.is_authenticated());
        for key in [keys::ACCESS_TOKEN, keys::REFRESH_TOKEN, keys::REMEMBER_ME] {
            assert!(durable.get(key).await.unwrap().is_none(), "{key} left behind");
        }
        assert!(!session.refresh_pending());
        assert_eq!(identity.calls("logout"), 1);
        assert!(matches!(
            identity.me(&access_token).await,
            Err(AuthError::Identity(_))
        ));
    }

    #[tokio::test]
    async fn test_logout_while_offline_still_clears() {
        let dir = TempDir::new().unwrap();
        let (clock, identity) = setup();
        let (session, durable) = sqlite_session(dir.path(), "default", &identity, &clock).await;
        session.login(admin(), true).await.unwrap();

        identity.set_offline(true);
        session.logout().await;

        assert_eq!(session.state().phase, SessionPhase::Unauthenticated);
        assert!(session.state().error.is_none());
        assert!(durable.get(keys::ACCESS_TOKEN).await.unwrap().is_none());
    }

    // ------------------------------------------------------------------------
    // Refresh timing
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_refresh_fires_five_minutes_before_expiry() {
        let (clock, identity) = setup();
        let h = memory_session(&identity, &clock, None);
        h.session.login(admin(), false).await.unwrap();

        let expires_at = codec::expires_at(&h.session.tokens().unwrap().access_token).unwrap();
        assert_eq!(expires_at, T0 + 10 * 60_000);
        assert_eq!(h.session.next_refresh_at(), Some(expires_at - 5 * 60_000));

        elapse(&clock, 5 * MINUTE - Duration::from_secs(1)).await;
        assert_eq!(identity.calls("refresh"), 0);

        elapse(&clock, Duration::from_secs(2)).await;
        assert_eq!(identity.calls("refresh"), 1);
        assert!(h.session.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_stays_alive_for_an_hour() {
        let (clock, identity) = setup();
        let h = memory_session(&identity, &clock, None);
        h.session.login(admin(), false).await.unwrap();
        let mut updates = h.session.subscribe();

        for _ in 0..62 {
            elapse(&clock, MINUTE).await;
        }

        assert_eq!(identity.calls("refresh"), 12);
        assert!(h.session.is_authenticated());
        assert!(updates.has_changed().unwrap());
        assert!(updates.borrow_and_update().is_authenticated());

        // Every renewal consumed the previous refresh token.
        assert_eq!(identity.live_refresh_tokens(), 1);
        let tokens = h.session.tokens().unwrap();
        assert_eq!(
            h.ephemeral.get(keys::REFRESH_TOKEN).await.unwrap().as_deref(),
            Some(tokens.refresh_token.as_str())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_restored_near_expiry_refreshes_immediately() {
        let (clock, identity) = setup();
        let first = memory_session(&identity, &clock, None);
        first.session.login(admin(), true).await.unwrap();
        first.session.shutdown().await;

        // Eight minutes later only two remain, inside the skew window.
        clock.advance(8 * MINUTE);
        let h = memory_session(&identity, &clock, Some(first.durable.clone()));
        h.session.initialize().await;
        assert_eq!(h.session.next_refresh_at(), Some(T0 + 5 * 60_000));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(identity.calls("refresh"), 1);
        assert!(h.session.is_authenticated());
        let expires_at = codec::expires_at(&h.session.tokens().unwrap().access_token).unwrap();
        assert_eq!(expires_at, T0 + 18 * 60_000);
    }

    // ------------------------------------------------------------------------
    // Refresh failures
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_rejected_refresh_ends_session() {
        let (clock, identity) = setup();
        let h = memory_session(&identity, &clock, None);
        h.session.login(admin(), true).await.unwrap();

        identity.fail_refresh(Some(Fault::Reject));
        elapse(&clock, 6 * MINUTE).await;

        let state = h.session.state();
        assert_eq!(state.phase, SessionPhase::Unauthenticated);
        assert!(state.user.is_none() && state.tokens.is_none());
        assert_eq!(
            state.error.as_deref(),
            Some("Your session has expired. Please sign in again.")
        );
        assert!(h.durable.is_empty().await);
        assert!(h.ephemeral.is_empty().await);
        assert!(!h.session.refresh_pending());

        // Nothing left to fire.
        elapse(&clock, 30 * MINUTE).await;
        assert_eq!(identity.calls("refresh"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outage_during_refresh_ends_session() {
        let (clock, identity) = setup();
        let h = memory_session(&identity, &clock, None);
        h.session.login(admin(), false).await.unwrap();

        identity.set_offline(true);
        let result = h.session.refresh_token().await;

        assert!(matches!(result, Err(AuthError::Network(_))));
        let state = h.session.state();
        assert!(!state.is_authenticated());
        assert_eq!(
            state.error.as_deref(),
            Some("Unable to reach the identity service.")
        );
        assert!(h.ephemeral.is_empty().await);
    }

    #[tokio::test]
    async fn test_reused_refresh_token_is_refused() {
        let (clock, identity) = setup();
        let h = memory_session(&identity, &clock, None);
        h.session.login(admin(), false).await.unwrap();
        let old = h.session.tokens().unwrap().refresh_token.clone();

        let renewed = h.session.refresh_token().await.unwrap();

        assert_ne!(renewed.refresh_token, old);
        assert!(matches!(
            identity.refresh(&old).await,
            Err(AuthError::RefreshRejected)
        ));
    }

    #[tokio::test]
    async fn test_server_without_rotation_keeps_refresh_token() {
        let (clock, identity) = setup();
        identity.set_rotation(false);
        let h = memory_session(&identity, &clock, None);
        h.session.login(admin(), false).await.unwrap();
        let before = h.session.tokens().unwrap();

        let after = h.session.refresh_token().await.unwrap();

        assert_eq!(after.refresh_token, before.refresh_token);
        assert_ne!(after.access_token, before.access_token);
        assert_eq!(
            h.ephemeral.get(keys::REFRESH_TOKEN).await.unwrap().as_deref(),
            Some(before.refresh_token.as_str())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_refresh_joins_in_flight_one() {
        let clock = ManualClock::new(T0);
        let identity = Arc::new(
            FakeIdentityService::new(clock.clone()).with_latency(Duration::from_millis(250)),
        );
        let h = memory_session(&identity, &clock, None);
        h.session.login(admin(), false).await.unwrap();

        let (a, b, c) = tokio::join!(
            h.session.refresh_token(),
            h.session.refresh_token(),
            h.session.refresh_token()
        );

        assert_eq!(identity.calls("refresh"), 1);
        let a = a.unwrap();
        assert_eq!(b.unwrap(), a);
        assert_eq!(c.unwrap(), a);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_racing_logout_stays_logged_out() {
        let clock = ManualClock::new(T0);
        let identity = Arc::new(
            FakeIdentityService::new(clock.clone()).with_latency(Duration::from_secs(1)),
        );
        let h = memory_session(&identity, &clock, None);
        h.session.login(admin(), true).await.unwrap();

        let logout = {
            let session = h.session.clone();
            tokio::spawn(async move { session.logout().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let result = h.session.refresh_token().await;
        logout.await.unwrap();

        assert!(matches!(result, Err(AuthError::Superseded)));
        assert_eq!(identity.calls("refresh"), 0);
        assert!(!h.session.is_authenticated());
        assert!(h.durable.is_empty().await);
        assert!(!h.session.refresh_pending());
    }

    #[tokio::test]
    async fn test_refresh_before_startup_keeps_remembered_session() {
        let dir = TempDir::new().unwrap();
        let (clock, identity) = setup();

        let (first, _) = sqlite_session(dir.path(), "default", &identity, &clock).await;
        first.login(admin(), true).await.unwrap();
        first.shutdown().await;
        drop(first);

        let (second, durable) = sqlite_session(dir.path(), "default", &identity, &clock).await;
        let result = second.refresh_token().await;

        assert!(matches!(result, Err(AuthError::NoRefreshToken)));
        assert_eq!(
            durable.get(keys::REMEMBER_ME).await.unwrap().as_deref(),
            Some("true")
        );
        assert!(durable.get(keys::ACCESS_TOKEN).await.unwrap().is_some());
        drop(second);

        let (third, _) = sqlite_session(dir.path(), "default", &identity, &clock).await;
        assert!(third.initialize().await.is_authenticated());
    }

    // ------------------------------------------------------------------------
    // Roles and access
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_role_not_granted_leaves_state_unchanged() {
        let (clock, identity) = setup();
        let h = memory_session(&identity, &clock, None);
        h.session.login(coder(), false).await.unwrap();
        let before = h.session.state();

        let result = h.session.change_role(Role::Billing);

        assert!(matches!(result, Err(AuthError::RoleNotGranted(Role::Billing))));
        assert_eq!(h.session.state(), before);
        assert_eq!(h.session.active_role(), Some(Role::Coder));
    }

    #[tokio::test]
    async fn test_server_active_role_then_switch() {
        let (clock, identity) = setup();
        let h = memory_session(&identity, &clock, None);

        let user = h
            .session
            .login(Credentials::new("multi@x.com", "Multi123"), false)
            .await
            .unwrap();
        assert_eq!(user.active_role(), Role::Billing);
        assert!(h.session.can(Action::Create, Module::Payments));

        let user = h.session.change_role(Role::Coder).unwrap();

        assert_eq!(user.permissions(), access::permissions_for(Role::Coder));
        assert!(!h.session.can_access(Module::Payments));
        assert!(h.session.can(Action::Edit, Module::Coding));
        for module in Module::ALL {
            assert_eq!(
                h.session.can_access(module),
                access::allowed_roles(module).contains(&Role::Coder),
                "{module}"
            );
        }

        // The choice survives a renewal.
        h.session.refresh_token().await.unwrap();
        assert_eq!(h.session.active_role(), Some(Role::Coder));
    }

    #[tokio::test]
    async fn test_default_deny() {
        let (clock, identity) = setup();
        let h = memory_session(&identity, &clock, None);
        h.session.login(admin(), false).await.unwrap();

        assert!(!h.session.can_access_named("NonexistentModule"));
        assert!(!h.session.can_access(Module::Integrations));
        assert!(h.session.can_access_named("audit-log"));
        for role in Role::ALL {
            assert!(!access::can_access_module_named(role, "NonexistentModule"));
        }

        h.session.logout().await;
        assert!(!h.session.can_access(Module::Dashboard));
        assert!(h.session.accessible_modules().is_empty());
    }

    // ------------------------------------------------------------------------
    // Startup and sign-in flows
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_login_overtakes_slow_startup() {
        let clock = ManualClock::new(T0);
        let identity = Arc::new(
            FakeIdentityService::new(clock.clone()).with_latency(Duration::from_secs(1)),
        );
        let first = memory_session(&identity, &clock, None);
        first.session.login(admin(), true).await.unwrap();
        first.session.shutdown().await;

        let h = memory_session(&identity, &clock, Some(first.durable.clone()));
        let restoring = {
            let session = h.session.clone();
            tokio::spawn(async move { session.initialize().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        h.session.login(coder(), false).await.unwrap();
        restoring.await.unwrap();

        assert_eq!(h.session.active_role(), Some(Role::Coder));
        assert_eq!(identity.calls("verify"), 1);
        assert!(h.durable.get(keys::ACCESS_TOKEN).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_persisted_session_is_discarded() {
        let (clock, identity) = setup();
        let first = memory_session(&identity, &clock, None);
        first.session.login(admin(), true).await.unwrap();
        first.session.shutdown().await;

        clock.advance(11 * MINUTE);
        let h = memory_session(&identity, &clock, Some(first.durable.clone()));
        let state = h.session.initialize().await;

        assert_eq!(state.phase, SessionPhase::Unauthenticated);
        assert!(state.error.is_none());
        assert!(h.durable.is_empty().await);
    }

    #[tokio::test]
    async fn test_bad_password_is_returned_and_shown() {
        let (clock, identity) = setup();
        let h = memory_session(&identity, &clock, None);

        let result = h
            .session
            .login(Credentials::new("admin@x.com", "wrong"), true)
            .await;

        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        assert_eq!(
            h.session.state().error.as_deref(),
            Some("Invalid email or password.")
        );

        // Next success clears the message.
        h.session.login(admin(), true).await.unwrap();
        assert!(h.session.state().error.is_none());
    }

    #[tokio::test]
    async fn test_signup_is_session_only() {
        let (clock, identity) = setup();
        let h = memory_session(&identity, &clock, None);

        let user = h
            .session
            .signup(SignupData {
                email: "new@x.com".into(),
                password: "New12345".into(),
                first_name: "Nia".into(),
                last_name: "Okafor".into(),
                organization_id: None,
            })
            .await
            .unwrap();

        assert_eq!(user.display_name, "Nia Okafor");
        assert_eq!(user.active_role(), Role::Coder);
        assert!(h.ephemeral.get(keys::ACCESS_TOKEN).await.unwrap().is_some());
        assert!(h.durable.get(keys::ACCESS_TOKEN).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_password_reset_then_login() {
        let (clock, identity) = setup();
        let h = memory_session(&identity, &clock, None);

        h.session
            .request_password_reset("coder@x.com")
            .await
            .unwrap();
        h.session
            .reset_password("reset_usr_coder", "usr_coder", "Fresh456")
            .await
            .unwrap();

        assert!(h.session.login(coder(), false).await.is_err());
        h.session
            .login(Credentials::new("coder@x.com", "Fresh456"), false)
            .await
            .unwrap();
        assert_eq!(identity.calls("forgot_password"), 1);
    }
}
