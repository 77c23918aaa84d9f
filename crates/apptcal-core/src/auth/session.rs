//! Session state machine.
//!
//! `SessionManager` owns the in-memory session, keeps it in step with the
//! credential store, and is the only thing that mutates it. State lives in
//! a `tokio::sync::watch` channel so consumers can poll a snapshot or await
//! changes.
//!
//! ```text
//! Anonymous --login--> Authenticating --ok--> Authenticated
//!     |                      \--fail--> Anonymous
//!     \--load_stored_auth--> OptimisticallyAuthenticated --verified--> Authenticated
//!                                  |--mismatch/rejected--> Anonymous
//!                                  \--unreachable--> (unchanged)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::Stream;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::audit::{SecurityEvent, SecurityLog};
use super::credentials::CredentialStore;
use super::tamper::TamperChecker;
use crate::backend::{AuthBackend, BackendError};
use crate::config::Config;
use crate::models::User;

/// Error shown for any transport failure during login
pub const NETWORK_ERROR_MESSAGE: &str = "Network error occurred";

/// Error shown when the backend rejects a login without a message
pub const LOGIN_FAILED_MESSAGE: &str = "Login failed";

const MISSING_CREDENTIALS_MESSAGE: &str = "Email and password required";

const LOGIN_SUPERSEDED_MESSAGE: &str = "Login cancelled by logout";

// ============================================================================
// Session
// ============================================================================

/// Where the session currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum AuthPhase {
    Anonymous,
    Authenticating,
    OptimisticallyAuthenticated,
    Authenticated,
}

/// Snapshot of the client session.
///
/// `authenticated` always implies a non-empty token and a user.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Session {
    user: Option<User>,
    token: String,
    authenticated: bool,
    verified: bool,
    loading: bool,
    last_error: String,
    #[serde(skip)]
    #[cfg_attr(feature = "ts", ts(skip))]
    logins_in_flight: usize,
}

impl Session {
    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Authenticated with a backend-confirmed token.
    pub fn is_verified(&self) -> bool {
        self.authenticated && self.verified
    }

    pub fn is_logged_in(&self) -> bool {
        self.authenticated && !self.token.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Last error message; empty when there is none.
    pub fn error(&self) -> &str {
        &self.last_error
    }

    pub fn phase(&self) -> AuthPhase {
        match (self.authenticated, self.verified, self.loading) {
            (true, true, _) => AuthPhase::Authenticated,
            (true, false, _) => AuthPhase::OptimisticallyAuthenticated,
            (false, _, true) => AuthPhase::Authenticating,
            (false, _, false) => AuthPhase::Anonymous,
        }
    }

    fn establish(&mut self, user: User, token: String, verified: bool) {
        debug_assert!(!token.is_empty());
        self.user = Some(user);
        self.token = token;
        self.authenticated = true;
        self.verified = verified;
    }

    fn reset(&mut self) {
        self.user = None;
        self.token.clear();
        self.authenticated = false;
        self.verified = false;
        self.last_error.clear();
    }
}

// ============================================================================
// Operation results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResult {
    pub success: bool,
    pub message: String,
}

impl LoginResult {
    fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// What a background verification did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// Identity confirmed; the backend's user record replaced the stored one.
    Verified,
    /// The backend returned a different identity; session cleared.
    Mismatch,
    /// The backend rejected the token; session cleared.
    Rejected(String),
    /// The backend could not be reached; optimistic session kept.
    Unreachable(String),
    /// The session changed while verifying; result discarded.
    Superseded,
}

/// Handle to an in-flight background verification.
///
/// Dropping the handle does not cancel the verification.
#[derive(Debug)]
pub struct VerificationHandle {
    task: JoinHandle<VerificationOutcome>,
}

impl VerificationHandle {
    pub async fn wait(self) -> VerificationOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Verification task failed");
                VerificationOutcome::Unreachable(e.to_string())
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[derive(Debug)]
pub enum RestoreOutcome {
    /// Nothing usable was stored.
    NoCredentials,
    /// Stored credentials were corrupt or suspicious and have been cleared.
    Rejected,
    /// The stored token is already the active session.
    AlreadyActive,
    /// Session restored optimistically; verification is running.
    Restored(VerificationHandle),
}

impl RestoreOutcome {
    pub fn is_restored(&self) -> bool {
        matches!(self, RestoreOutcome::Restored(_))
    }

    pub fn verification(self) -> Option<VerificationHandle> {
        match self {
            RestoreOutcome::Restored(handle) => Some(handle),
            _ => None,
        }
    }
}

// ============================================================================
// Session manager
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub tamper_checker: TamperChecker,
    /// `None` lets a hung verification keep the session optimistic forever.
    pub verify_timeout: Option<Duration>,
    pub security_log: SecurityLog,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        let tamper_checker = match config.admin_email_domain {
            Some(ref domain) => TamperChecker::new().with_admin_email_domain(domain.as_str()),
            None => TamperChecker::new(),
        };
        Self {
            tamper_checker,
            verify_timeout: config.verify_timeout(),
            security_log: SecurityLog::new(),
        }
    }
}

struct Inner<B> {
    backend: B,
    store: CredentialStore,
    checker: TamperChecker,
    security: SecurityLog,
    verify_timeout: Option<Duration>,
    state: watch::Sender<Session>,
    /// Bumped by every logout; in-flight work started before a logout is
    /// discarded when it resolves.
    logouts: AtomicU64,
    /// Held while the credential store is brought in line with the session.
    /// Never taken while the state lock is held.
    store_writes: Mutex<()>,
}

/// Cheap to clone; clones share the same session.
pub struct SessionManager<B> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for SessionManager<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: AuthBackend> SessionManager<B> {
    pub fn new(backend: B, store: CredentialStore) -> Self {
        Self::with_options(backend, store, SessionOptions::default())
    }

    pub fn with_options(backend: B, store: CredentialStore, options: SessionOptions) -> Self {
        let (state, _) = watch::channel(Session::default());
        Self {
            inner: Arc::new(Inner {
                backend,
                store,
                checker: options.tamper_checker,
                security: options.security_log,
                verify_timeout: options.verify_timeout,
                state,
                logouts: AtomicU64::new(0),
                store_writes: Mutex::new(()),
            }),
        }
    }

    // ===== Signals =====

    pub fn snapshot(&self) -> Session {
        self.inner.state.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.state.borrow().user.clone()
    }

    pub fn token(&self) -> String {
        self.inner.state.borrow().token.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().is_loading()
    }

    pub fn error(&self) -> String {
        self.inner.state.borrow().last_error.clone()
    }

    pub fn phase(&self) -> AuthPhase {
        self.inner.state.borrow().phase()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.state.subscribe()
    }

    /// Stream of session snapshots, one per observed change. Rapid changes
    /// may be coalesced into the latest snapshot.
    pub fn changes(&self) -> impl Stream<Item = Session> + Send + 'static {
        futures::stream::unfold(self.inner.state.subscribe(), |mut rx| async move {
            rx.changed().await.ok()?;
            let session = rx.borrow_and_update().clone();
            Some((session, rx))
        })
    }

    pub fn security_log(&self) -> &SecurityLog {
        &self.inner.security
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    pub fn has_stored_token(&self) -> bool {
        self.inner.store.has_token()
    }

    // ===== Operations =====

    /// Log in with the backend and persist the new session on success.
    ///
    /// Never returns an error: rejections and transport failures are
    /// reported through the result and `error()`.
    pub async fn login(&self, email: &str, password: &str) -> LoginResult {
        let inner = &self.inner;
        let logouts_at_start = inner.logouts.load(Ordering::SeqCst);
        let _loading = LoadingGuard::begin(&inner.state);

        if email.trim().is_empty() || password.is_empty() {
            inner.set_error(MISSING_CREDENTIALS_MESSAGE);
            return LoginResult::failure(MISSING_CREDENTIALS_MESSAGE);
        }

        let response = match inner.backend.login(email, password).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Login request failed");
                inner.set_error(NETWORK_ERROR_MESSAGE);
                return LoginResult::failure(NETWORK_ERROR_MESSAGE);
            }
        };

        let payload = match response.data {
            Some(payload) if response.success && !payload.token.is_empty() => payload,
            _ => {
                let message = if response.message.is_empty() {
                    LOGIN_FAILED_MESSAGE.to_string()
                } else {
                    response.message
                };
                info!(%message, "Login rejected");
                inner.set_error(&message);
                return LoginResult::failure(message);
            }
        };

        let applied = inner.state.send_if_modified(|session| {
            if inner.logouts.load(Ordering::SeqCst) != logouts_at_start {
                return false;
            }
            session.establish(payload.user.clone(), payload.token.clone(), true);
            session.last_error.clear();
            true
        });

        if applied {
            inner.sync_store();
            info!(user_id = %payload.user.id, "Login successful");
            LoginResult::success(response.message)
        } else {
            debug!("Discarding login that resolved after logout");
            LoginResult::failure(LOGIN_SUPERSEDED_MESSAGE)
        }
    }

    /// Restore a previously stored session.
    ///
    /// Valid stored credentials are applied before this returns, so the
    /// caller sees an authenticated session immediately. Verification with
    /// the backend then runs in a spawned task. Must be called from within
    /// a Tokio runtime.
    pub fn load_stored_auth(&self) -> RestoreOutcome {
        let inner = &self.inner;
        let Some(stored) = inner.store.load() else {
            debug!("No stored credentials");
            return RestoreOutcome::NoCredentials;
        };

        if !inner.checker.check(&stored.token, &stored.user_json, &inner.security) {
            inner.security.record(SecurityEvent::InvalidStoredAuth {
                has_token: !stored.token.is_empty(),
                has_user: !stored.user_json.is_empty(),
            });
            inner.discard_session();
            return RestoreOutcome::Rejected;
        }

        let user = match User::from_json(&stored.user_json) {
            Ok(user) => user,
            Err(e) => {
                inner.security.record(SecurityEvent::StoredUserParseFailed {
                    error: e.to_string(),
                });
                inner.discard_session();
                return RestoreOutcome::Rejected;
            }
        };

        let mut already_active = false;
        inner.state.send_if_modified(|session| {
            if session.authenticated && session.token == stored.token {
                already_active = true;
                return false;
            }
            session.establish(user.clone(), stored.token.clone(), false);
            true
        });
        if already_active {
            debug!("Stored credentials match the active session");
            return RestoreOutcome::AlreadyActive;
        }

        info!(user_id = %user.id, "Restored session from storage, verifying in background");
        RestoreOutcome::Restored(self.spawn_verification(stored.token, user))
    }

    /// Verify again a session that is still only optimistically
    /// authenticated. Returns `None` in any other phase.
    pub fn reverify(&self) -> Option<VerificationHandle> {
        let session = self.snapshot();
        if session.phase() != AuthPhase::OptimisticallyAuthenticated {
            return None;
        }
        let user = session.user?;
        Some(self.spawn_verification(session.token, user))
    }

    /// Clear the session locally, then tell the backend. The backend's
    /// answer never affects the local state.
    ///
    /// With no session in memory, the stored token (if any) is the one
    /// reported to the backend.
    pub async fn logout(&self) {
        let inner = &self.inner;
        let mut token = String::new();
        inner.state.send_modify(|session| {
            inner.logouts.fetch_add(1, Ordering::SeqCst);
            token = std::mem::take(&mut session.token);
            session.reset();
        });
        if token.is_empty() {
            token = inner.store.token().unwrap_or_default();
        }
        inner.sync_store();

        if token.is_empty() {
            debug!("Logout with no active session");
            return;
        }

        info!("Logged out");
        match inner.backend.logout(&token).await {
            Ok(response) if response.success => debug!("Backend acknowledged logout"),
            Ok(response) => {
                warn!(message = %response.message, "Backend rejected logout, local session already cleared")
            }
            Err(e) => warn!(error = %e, "Backend logout failed, local session already cleared"),
        }
    }

    fn spawn_verification(&self, token: String, expected: User) -> VerificationHandle {
        let inner = Arc::clone(&self.inner);
        let logouts_at_start = inner.logouts.load(Ordering::SeqCst);
        let task =
            tokio::spawn(async move { inner.verify(token, expected, logouts_at_start).await });
        VerificationHandle { task }
    }
}

/// Outcome of a profile call before it is applied to the session.
enum Verdict {
    Confirmed(User),
    Mismatch { api_id: String },
    Rejected(String),
    Unreachable(String),
}

impl<B: AuthBackend> Inner<B> {
    async fn verify(&self, token: String, expected: User, logouts_at_start: u64) -> VerificationOutcome {
        let response = match self.verify_timeout {
            Some(limit) => tokio::time::timeout(limit, self.backend.get_profile(&token))
                .await
                .unwrap_or_else(|_| Err(BackendError::Timeout(limit))),
            None => self.backend.get_profile(&token).await,
        };

        let verdict = match response {
            Ok(response) if response.success => match response.data {
                Some(profile) if profile.same_identity(&expected) => Verdict::Confirmed(profile),
                Some(profile) => Verdict::Mismatch { api_id: profile.id },
                None => Verdict::Rejected("profile missing from response".to_string()),
            },
            Ok(response) => Verdict::Rejected(response.message),
            Err(e) => Verdict::Unreachable(e.to_string()),
        };

        let mut outcome = VerificationOutcome::Superseded;
        let changed = self.state.send_if_modified(|session| {
            let current = self.logouts.load(Ordering::SeqCst) == logouts_at_start
                && session.authenticated
                && session.token == token;
            if !current {
                return false;
            }

            match verdict {
                Verdict::Confirmed(profile) => {
                    self.security.record(SecurityEvent::RestoredAndVerified {
                        user_id: profile.id.clone(),
                    });
                    session.establish(profile, token.clone(), true);
                    outcome = VerificationOutcome::Verified;
                    true
                }
                Verdict::Mismatch { api_id } => {
                    self.security.record(SecurityEvent::UserDataMismatch {
                        stored_id: expected.id.clone(),
                        api_id,
                    });
                    session.reset();
                    outcome = VerificationOutcome::Mismatch;
                    true
                }
                Verdict::Rejected(message) => {
                    self.security.record(SecurityEvent::TokenValidationFailed {
                        message: message.clone(),
                    });
                    session.reset();
                    outcome = VerificationOutcome::Rejected(message);
                    true
                }
                Verdict::Unreachable(error) => {
                    self.security.record(SecurityEvent::VerificationUnreachable {
                        error: error.clone(),
                    });
                    outcome = VerificationOutcome::Unreachable(error);
                    false
                }
            }
        });
        if changed {
            self.sync_store();
        }

        if outcome == VerificationOutcome::Superseded {
            debug!("Session changed during verification, discarding result");
        }
        outcome
    }

    fn set_error(&self, message: &str) {
        self.state
            .send_modify(|session| session.last_error = message.to_string());
    }

    fn discard_session(&self) {
        self.state.send_modify(Session::reset);
        self.sync_store();
    }

    /// Write the current session to the credential store, or clear the
    /// store when there is none. Runs outside the state lock; the store
    /// lock orders concurrent writers so the last one sees the latest
    /// session. Storage failures are logged and leave the in-memory
    /// session as it is.
    fn sync_store(&self) {
        let _writes = self
            .store_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let current = {
            let session = self.state.borrow();
            match session.user {
                Some(ref user) if session.authenticated => {
                    Some((session.token.clone(), user.clone()))
                }
                _ => None,
            }
        };

        let result = match current {
            Some((token, user)) => self.store.save(&token, &user),
            None => self.store.clear(),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to update stored credentials");
        }
    }
}

/// Marks a login as in flight for as long as it lives, including when the
/// login future is dropped early.
struct LoadingGuard<'a> {
    state: &'a watch::Sender<Session>,
}

impl<'a> LoadingGuard<'a> {
    fn begin(state: &'a watch::Sender<Session>) -> Self {
        state.send_modify(|session| {
            session.logins_in_flight += 1;
            session.loading = true;
            session.last_error.clear();
        });
        Self { state }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.state.send_modify(|session| {
            session.logins_in_flight = session.logins_in_flight.saturating_sub(1);
            session.loading = session.logins_in_flight > 0;
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
