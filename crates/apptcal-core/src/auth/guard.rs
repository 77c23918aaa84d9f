//! Navigation guard for the router.
//!
//! On the first navigation after a cold start the guard restores any stored
//! session; afterwards it only reads `is_authenticated()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use super::session::{SessionManager, VerificationHandle};
use crate::backend::AuthBackend;

/// Login page; also the redirect target for protected routes
pub const LOGIN_PATH: &str = "/";

/// Landing page for signed-in users who open the login page
pub const DASHBOARD_PATH: &str = "/dashboard";

#[derive(Debug, Clone, Copy)]
pub struct Route<'a> {
    pub path: &'a str,
    pub requires_auth: bool,
}

impl<'a> Route<'a> {
    pub fn public(path: &'a str) -> Self {
        Self {
            path,
            requires_auth: false,
        }
    }

    pub fn protected(path: &'a str) -> Self {
        Self {
            path,
            requires_auth: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Proceed,
    Redirect {
        path: String,
        /// Where to return after logging in.
        redirect: Option<String>,
    },
}

pub struct RouteGuard<B> {
    session: SessionManager<B>,
    restore_attempted: AtomicBool,
    pending: Mutex<Option<VerificationHandle>>,
}

impl<B: AuthBackend> RouteGuard<B> {
    pub fn new(session: SessionManager<B>) -> Self {
        Self {
            session,
            restore_attempted: AtomicBool::new(false),
            pending: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &SessionManager<B> {
        &self.session
    }

    /// Decide whether navigation to `to` may go ahead.
    pub fn before_each(&self, to: &Route<'_>) -> Navigation {
        self.restore_once();
        let authenticated = self.session.is_authenticated();

        if to.requires_auth {
            if authenticated {
                Navigation::Proceed
            } else {
                debug!(path = to.path, "Redirecting anonymous user to login");
                Navigation::Redirect {
                    path: LOGIN_PATH.to_string(),
                    redirect: Some(to.path.to_string()),
                }
            }
        } else if to.path == LOGIN_PATH && authenticated {
            Navigation::Redirect {
                path: DASHBOARD_PATH.to_string(),
                redirect: None,
            }
        } else {
            Navigation::Proceed
        }
    }

    /// The background verification started by the cold-start restore, if
    /// any and not already taken.
    pub fn take_verification(&self) -> Option<VerificationHandle> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn restore_once(&self) {
        if self.restore_attempted.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.session.is_authenticated() || !self.session.has_stored_token() {
            return;
        }
        if let Some(handle) = self.session.load_stored_auth().verification() {
            *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::VerificationOutcome;
    use crate::testing::{memory_store, seeded_store, user, ScriptedBackend};

    #[tokio::test]
    async fn test_protected_route_redirects_anonymous() {
        let (_, store) = memory_store();
        let guard = RouteGuard::new(SessionManager::new(ScriptedBackend::new(), store));

        assert_eq!(
            guard.before_each(&Route::protected("/dashboard")),
            Navigation::Redirect {
                path: LOGIN_PATH.to_string(),
                redirect: Some("/dashboard".to_string())
            }
        );
        assert_eq!(guard.before_each(&Route::public("/about")), Navigation::Proceed);
        assert_eq!(guard.before_each(&Route::public(LOGIN_PATH)), Navigation::Proceed);
    }

    #[tokio::test]
    async fn test_authenticated_user_skips_login_page() {
        let (_, store) = memory_store();
        let session = SessionManager::new(ScriptedBackend::new(), store);
        session.backend().login_ok(user("1", "a@x.com"), "tkn-1");
        session.login("a@x.com", "pw").await;
        let guard = RouteGuard::new(session);

        assert_eq!(
            guard.before_each(&Route::public(LOGIN_PATH)),
            Navigation::Redirect {
                path: DASHBOARD_PATH.to_string(),
                redirect: None
            }
        );
        assert_eq!(guard.before_each(&Route::protected("/appointments")), Navigation::Proceed);
    }

    #[tokio::test]
    async fn test_cold_start_restores_once() {
        let (_, store) = seeded_store("tkn-1", &user("1", "a@x.com"));
        let session = SessionManager::new(ScriptedBackend::new(), store);
        session.backend().profile_ok(user("1", "a@x.com"));
        let guard = RouteGuard::new(session);

        // optimistic restore lets the first protected navigation through
        assert_eq!(guard.before_each(&Route::protected("/dashboard")), Navigation::Proceed);
        let outcome = guard.take_verification().unwrap().wait().await;
        assert_eq!(outcome, VerificationOutcome::Verified);

        guard.session().logout().await;
        guard.before_each(&Route::protected("/dashboard"));
        assert_eq!(guard.session().backend().profile_calls(), 1);
        assert!(guard.take_verification().is_none());
    }

    #[tokio::test]
    async fn test_cold_start_with_rejected_token_redirects_later() {
        let (_, store) = seeded_store("tkn-1", &user("1", "a@x.com"));
        let guard = RouteGuard::new(SessionManager::new(ScriptedBackend::new(), store));

        assert_eq!(guard.before_each(&Route::protected("/dashboard")), Navigation::Proceed);
        // the scripted backend rejects unknown tokens
        let outcome = guard.take_verification().unwrap().wait().await;
        assert!(matches!(outcome, VerificationOutcome::Rejected(_)));

        assert!(matches!(
            guard.before_each(&Route::protected("/dashboard")),
            Navigation::Redirect { .. }
        ));
    }
}
