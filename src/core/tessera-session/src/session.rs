//! Session state machine.
//!
//! [`SessionManager`] owns the authoritative [`SessionState`] and is the only
//! writer of the [`CredentialStore`]. Every commit (store write, timer arm,
//! state publish) happens under one lock and only if the session epoch has
//! not moved since the operation started. Login, signup, logout, forced
//! expiry and shutdown bump the epoch, so the late result of anything they
//! overtake is dropped instead of resurrecting an old session.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tessera_access::{self as access, Action, Module, Role};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::{
    codec, AuthError, AuthToken, Clock, CredentialStore, Credentials, IdentityService,
    RefreshScheduler, SessionConfig, SessionPhase, SessionState, SignupData, SystemClock, User,
};

struct Inner {
    identity: Arc<dyn IdentityService>,
    store: CredentialStore,
    clock: Arc<dyn Clock>,
    scheduler: RefreshScheduler,
    state: watch::Sender<SessionState>,
    epoch: AtomicU64,
    commit: Mutex<()>,
    refresh_lock: Mutex<()>,
    refresh_generation: AtomicU64,
    remember: AtomicBool,
    initialized: AtomicBool,
}

impl Inner {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn current_tokens(&self) -> Option<AuthToken> {
        self.state.borrow().tokens.clone()
    }
}

/// Handle to the session. Cheap to clone; all clones share one session.
///
/// Dropping the last handle disarms the refresh timer.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Creates a session manager on the system clock.
    pub fn new(
        identity: Arc<dyn IdentityService>,
        store: CredentialStore,
        config: SessionConfig,
    ) -> Self {
        Self::with_clock(identity, store, config, Arc::new(SystemClock))
    }

    /// Creates a session manager on a caller-supplied clock.
    pub fn with_clock(
        identity: Arc<dyn IdentityService>,
        store: CredentialStore,
        config: SessionConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::uninitialized());

        Self {
            inner: Arc::new(Inner {
                identity,
                store,
                scheduler: RefreshScheduler::new(config.refresh_skew, Arc::clone(&clock)),
                clock,
                state,
                epoch: AtomicU64::new(0),
                commit: Mutex::new(()),
                refresh_lock: Mutex::new(()),
                refresh_generation: AtomicU64::new(0),
                remember: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Restores a persisted session, once.
    ///
    /// Later calls, and calls made after a login or signup has started,
    /// return the current state without doing anything. Failures are never
    /// returned: they settle the session as unauthenticated with a clean store.
    pub async fn initialize(&self) -> SessionState {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return self.state();
        }

        let epoch = {
            let _guard = self.inner.commit.lock().await;
            if self.inner.state.borrow().phase != SessionPhase::Uninitialized {
                return self.state();
            }
            self.inner
                .state
                .send_replace(SessionState::loading(SessionPhase::Initializing));
            self.inner.epoch.load(Ordering::SeqCst)
        };

        let Some(pair) = self.inner.store.load().await else {
            debug!("No persisted session");
            self.settle_unauthenticated(epoch, false).await;
            return self.state();
        };
        let remember = self.inner.store.remember_me().await;

        let verified = match self.inner.identity.verify(&pair.access_token).await {
            Ok(record) => User::from_record(record, None),
            Err(e) => Err(e),
        };

        match verified {
            Ok(user) => {
                let _guard = self.inner.commit.lock().await;
                if !self.inner.is_current(epoch) {
                    return self.state();
                }

                let now = self.inner.clock.now_epoch_ms();
                let expires_in = codec::decode(&pair.access_token)
                    .map(|claims| claims.remaining_ms(now) / 1000)
                    .unwrap_or_default();
                let tokens = pair.to_token(expires_in as u64);

                self.inner.remember.store(remember, Ordering::SeqCst);
                self.arm_refresh(&tokens, epoch);
                info!(user_id = %user.id, role = %user.active_role(), remember, "Session restored");
                self.inner
                    .state
                    .send_replace(SessionState::authenticated(user, tokens));
            },
            Err(e) => {
                warn!(error = %e, "Persisted session rejected, discarding it");
                self.settle_unauthenticated(epoch, true).await;
            },
        }

        self.state()
    }

    /// Signs in and starts a session.
    ///
    /// `remember` selects durable over session-only persistence for the
    /// lifetime of this session, refreshes included.
    pub async fn login(&self, credentials: Credentials, remember: bool) -> Result<User, AuthError> {
        credentials.validate()?;

        let epoch = self.begin(SessionPhase::LoggingIn).await;
        debug!(email = %credentials.email, remember, "Logging in");

        let identity = &self.inner.identity;
        let result: Result<(User, AuthToken), AuthError> = async {
            let tokens = identity.sign_in(&credentials).await?.into_token(None)?;
            let user = User::from_record(identity.me(&tokens.access_token).await?, None)?;
            Ok((user, tokens))
        }
        .await;

        match result {
            Ok((user, tokens)) => self.establish(epoch, user, tokens, remember).await,
            Err(e) => Err(self.fail(epoch, e).await),
        }
    }

    /// Registers an account and starts a session-only session for it.
    pub async fn signup(&self, data: SignupData) -> Result<User, AuthError> {
        data.validate()?;

        let epoch = self.begin(SessionPhase::SigningUp).await;
        debug!(email = %data.email, "Signing up");

        let identity = &self.inner.identity;
        let result: Result<(User, AuthToken), AuthError> = async {
            let tokens = identity.sign_up(&data).await?.into_token(None)?;
            let user = User::from_record(identity.me(&tokens.access_token).await?, None)?;
            Ok((user, tokens))
        }
        .await;

        match result {
            Ok((user, tokens)) => self.establish(epoch, user, tokens, false).await,
            Err(e) => Err(self.fail(epoch, e).await),
        }
    }

    /// Ends the session. Never fails and is safe to repeat.
    ///
    /// The server-side revoke is best effort. The timer is disarmed before
    /// the store is cleared.
    pub async fn logout(&self) {
        let (epoch, access_token) = {
            let _guard = self.inner.commit.lock().await;
            let epoch = self.inner.bump_epoch();
            self.inner.scheduler.disarm();

            let access_token = self.inner.current_tokens().map(|t| t.access_token.clone());
            self.inner.state.send_modify(|state| {
                state.phase = SessionPhase::LoggingOut;
            });
            (epoch, access_token)
        };

        if let Some(access_token) = access_token {
            if let Err(e) = self.inner.identity.logout(&access_token).await {
                warn!(identity = self.inner.identity.name(), error = %e, "Server-side logout failed");
            }
        }

        let _guard = self.inner.commit.lock().await;
        if self.inner.is_current(epoch) {
            self.inner.bump_epoch();
            self.inner.store.clear().await;
            self.inner.state.send_replace(SessionState::unauthenticated(None));
            info!("Logged out");
        }
    }

    /// Renews the access token now.
    ///
    /// Concurrent callers are coalesced: a caller that had to wait for an
    /// in-flight renewal gets its outcome instead of starting another. On
    /// failure the session is logged out and the error returned.
    ///
    /// Only an authenticated session is renewed. Signed out, or before
    /// [`initialize`](Self::initialize), this is `NoRefreshToken`; while a
    /// login, signup, logout or startup is in flight it is `Superseded`.
    /// Neither case touches the session or the store.
    pub async fn refresh_token(&self) -> Result<AuthToken, AuthError> {
        let observed = self.inner.refresh_generation.load(Ordering::SeqCst);
        let _guard = self.inner.refresh_lock.lock().await;

        if self.inner.refresh_generation.load(Ordering::SeqCst) != observed {
            debug!("Refresh coalesced with the one that just completed");
            return self.inner.current_tokens().ok_or(AuthError::NoRefreshToken);
        }

        let result = self.refresh_locked().await;
        self.inner.refresh_generation.fetch_add(1, Ordering::SeqCst);
        result
    }

    /// Switches the active role. Permissions follow in the same publish.
    pub fn change_role(&self, role: Role) -> Result<User, AuthError> {
        let mut outcome = Err(AuthError::NotAuthenticated);

        self.inner.state.send_if_modified(|state| {
            if !state.is_authenticated() {
                return false;
            }
            let Some(current) = state.user.as_ref() else {
                return false;
            };

            match current.with_active_role(role) {
                Ok(updated) => {
                    let changed = current.active_role() != role;
                    outcome = Ok(updated.clone());
                    if changed {
                        state.user = Some(updated);
                        state.error = None;
                    }
                    changed
                },
                Err(e) => {
                    outcome = Err(e);
                    false
                },
            }
        });

        match &outcome {
            Ok(user) => info!(user_id = %user.id, %role, "Active role changed"),
            Err(e) => debug!(%role, error = %e, "Role change refused"),
        }

        outcome
    }

    /// Starts password recovery. Leaves the session untouched.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        if email.trim().is_empty() {
            return Err(AuthError::InvalidInput("email must not be empty".into()));
        }
        self.inner.identity.forgot_password(email).await
    }

    /// Completes password recovery. Leaves the session untouched.
    pub async fn reset_password(
        &self,
        token: &str,
        user_id: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        for (field, value) in [("token", token), ("user_id", user_id), ("new_password", new_password)] {
            if value.is_empty() {
                return Err(AuthError::InvalidInput(format!("{field} must not be empty")));
            }
        }
        self.inner
            .identity
            .reset_password(token, user_id, new_password)
            .await
    }

    /// Stops background work. The persisted session is kept.
    ///
    /// Results of calls still in flight are discarded.
    pub async fn shutdown(&self) {
        let _guard = self.inner.commit.lock().await;
        self.inner.bump_epoch();
        self.inner.scheduler.disarm();
        debug!("Session manager shut down");
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Current snapshot.
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Receiver that observes every transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Signed-in user.
    pub fn user(&self) -> Option<User> {
        self.inner.state.borrow().user.clone()
    }

    /// Current credential pair.
    pub fn tokens(&self) -> Option<AuthToken> {
        self.inner.current_tokens()
    }

    /// Is there a user and a credential pair?
    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    /// Role currently governing permissions.
    pub fn active_role(&self) -> Option<Role> {
        self.inner.state.borrow().user.as_ref().map(User::active_role)
    }

    /// May the active role view `module`? `false` when signed out.
    pub fn can_access(&self, module: Module) -> bool {
        self.inner
            .state
            .borrow()
            .user
            .as_ref()
            .is_some_and(|u| u.can_access(module))
    }

    /// May the active role view the module named `module_name`?
    pub fn can_access_named(&self, module_name: &str) -> bool {
        self.active_role()
            .is_some_and(|role| access::can_access_module_named(role, module_name))
    }

    /// May the active role perform `action` on `module`? `false` when signed out.
    pub fn can(&self, action: Action, module: Module) -> bool {
        self.inner
            .state
            .borrow()
            .user
            .as_ref()
            .is_some_and(|u| u.can(action, module))
    }

    /// Modules the active role may view. Empty when signed out.
    pub fn accessible_modules(&self) -> Vec<Module> {
        self.active_role()
            .map(access::accessible_modules)
            .unwrap_or_default()
    }

    /// Is a proactive refresh scheduled?
    pub fn refresh_pending(&self) -> bool {
        self.inner.scheduler.is_armed()
    }

    /// When the scheduled refresh fires, in Unix milliseconds.
    pub fn next_refresh_at(&self) -> Option<i64> {
        self.inner.scheduler.fire_at()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Starts a login or signup: new epoch, no timer, loading state.
    async fn begin(&self, phase: SessionPhase) -> u64 {
        let _guard = self.inner.commit.lock().await;
        let epoch = self.inner.bump_epoch();
        self.inner.scheduler.disarm();
        self.inner.state.send_replace(SessionState::loading(phase));
        epoch
    }

    async fn establish(
        &self,
        epoch: u64,
        user: User,
        tokens: AuthToken,
        remember: bool,
    ) -> Result<User, AuthError> {
        let _guard = self.inner.commit.lock().await;
        if !self.inner.is_current(epoch) {
            debug!(epoch, "Discarding superseded sign-in");
            return Err(AuthError::Superseded);
        }

        self.inner.store.save(&tokens, remember).await;
        self.inner.remember.store(remember, Ordering::SeqCst);
        self.arm_refresh(&tokens, epoch);

        info!(user_id = %user.id, role = %user.active_role(), remember, "Session started");
        self.inner
            .state
            .send_replace(SessionState::authenticated(user.clone(), tokens));

        Ok(user)
    }

    /// Settles a failed login or signup. Returns the error to hand back.
    async fn fail(&self, epoch: u64, error: AuthError) -> AuthError {
        let _guard = self.inner.commit.lock().await;
        if !self.inner.is_current(epoch) {
            return AuthError::Superseded;
        }

        self.inner.scheduler.disarm();
        self.inner.store.clear().await;
        self.inner
            .state
            .send_replace(SessionState::unauthenticated(error.user_message()));
        debug!(error = %error, "Sign-in failed");

        error
    }

    async fn settle_unauthenticated(&self, epoch: u64, clear: bool) {
        let _guard = self.inner.commit.lock().await;
        if !self.inner.is_current(epoch) {
            return;
        }
        if clear {
            self.inner.store.clear().await;
        }
        self.inner.state.send_replace(SessionState::unauthenticated(None));
    }

    async fn refresh_locked(&self) -> Result<AuthToken, AuthError> {
        let (epoch, current) = {
            let _guard = self.inner.commit.lock().await;
            let phase = self.inner.state.borrow().phase;
            match phase {
                SessionPhase::Authenticated => {},
                SessionPhase::Uninitialized | SessionPhase::Unauthenticated => {
                    return Err(AuthError::NoRefreshToken);
                },
                phase => {
                    debug!(%phase, "Refresh skipped, another transition is in flight");
                    return Err(AuthError::Superseded);
                },
            }
            let Some(current) = self.inner.current_tokens() else {
                return Err(AuthError::NoRefreshToken);
            };

            self.inner.state.send_modify(|state| {
                state.phase = SessionPhase::Refreshing;
            });
            (self.inner.epoch.load(Ordering::SeqCst), current)
        };

        if current.refresh_token.is_empty() {
            return Err(self.expire(epoch, &current, AuthError::NoRefreshToken).await);
        }

        let identity = &self.inner.identity;
        let result: Result<_, AuthError> = async {
            let tokens = identity
                .refresh(&current.refresh_token)
                .await?
                .into_token(Some(&current.refresh_token))?;
            let record = identity.me(&tokens.access_token).await?;
            Ok((record, tokens))
        }
        .await;

        let (record, tokens) = match result {
            Ok(renewed) => renewed,
            Err(e) => return Err(self.expire(epoch, &current, e).await),
        };

        let guard = self.inner.commit.lock().await;
        if !self.inner.is_current(epoch) {
            debug!(epoch, "Discarding superseded refresh");
            return Err(AuthError::Superseded);
        }

        let preferred = self.active_role();
        let user = match User::from_record(record, preferred) {
            Ok(user) => user,
            Err(e) => {
                drop(guard);
                return Err(self.expire(epoch, &current, e).await);
            },
        };

        let remember = self.inner.remember.load(Ordering::SeqCst);
        self.inner.store.save(&tokens, remember).await;
        self.arm_refresh(&tokens, epoch);

        // Re-resolve against the role current at publish time; a role change
        // may have landed while the store was being written.
        let published = tokens.clone();
        self.inner.state.send_modify(move |state| {
            let mut user = user;
            if let Some(role) = state.user.as_ref().map(User::active_role) {
                if let Ok(resolved) = user.with_active_role(role) {
                    user = resolved;
                }
            }
            *state = SessionState::authenticated(user, published);
        });

        info!(remember, "Access token refreshed");
        Ok(tokens)
    }

    /// Forced logout after a failed refresh. Returns the error to hand back.
    ///
    /// Only `started_from`, the pair the refresh began with, is revoked, and
    /// only while `epoch` is still current.
    async fn expire(&self, epoch: u64, started_from: &AuthToken, error: AuthError) -> AuthError {
        let epoch = {
            let _guard = self.inner.commit.lock().await;
            if !self.inner.is_current(epoch) {
                debug!(epoch, error = %error, "Discarding superseded refresh failure");
                return AuthError::Superseded;
            }
            self.inner.scheduler.disarm();
            self.inner.state.send_modify(|state| {
                state.phase = SessionPhase::LoggingOut;
            });
            self.inner.bump_epoch()
        };

        if let Err(e) = self.inner.identity.logout(&started_from.access_token).await {
            debug!(error = %e, "Server-side logout after failed refresh failed");
        }

        let _guard = self.inner.commit.lock().await;
        if !self.inner.is_current(epoch) {
            return AuthError::Superseded;
        }

        self.inner.store.clear().await;
        self.inner
            .state
            .send_replace(SessionState::unauthenticated(error.user_message()));
        info!(error = %error, "Session ended after failed refresh");

        error
    }

    /// Schedules the next proactive refresh for `tokens`.
    ///
    /// Caller holds the commit lock. An undecodable access token leaves the
    /// session valid but unscheduled.
    fn arm_refresh(&self, tokens: &AuthToken, epoch: u64) {
        let Some(expires_at) = codec::expires_at(&tokens.access_token) else {
            self.inner.scheduler.disarm();
            warn!(error = %AuthError::DecodeFailure, "No proactive refresh scheduled");
            return;
        };

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let delay = self.inner.scheduler.arm(expires_at, move || async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.is_current(epoch) {
                return;
            }
            if let Err(e) = (SessionManager { inner }).refresh_token().await {
                debug!(error = %e, "Scheduled refresh failed");
            }
        });

        debug!(expires_at, delay_ms = delay.as_millis() as u64, "Proactive refresh scheduled");
    }
}
