//! In-process auth backend with a fixed user table.
//!
//! Passwords are stored as Argon2 PHC strings and never leave the account
//! record. Tokens look like `mock_token_<user id>_<unix millis>` and
//! `get_profile` resolves the user from the id segment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::OsRng;
use tracing::debug;

use super::{AuthBackend, AuthResponse, BackendError, LoginPayload};
use crate::models::{Role, User};

/// Prefix of tokens issued by the mock backend
const TOKEN_PREFIX: &str = "mock_token";

/// Argon2 memory cost in KiB. Low; the table is demo data.
const HASH_MEMORY_KIB: u32 = 4096;

struct MockAccount {
    user: User,
    password_hash: String,
}

pub struct MockBackend {
    accounts: Vec<MockAccount>,
    latency: Duration,
    offline: AtomicBool,
}

impl MockBackend {
    /// An empty user table.
    pub fn empty() -> Self {
        Self {
            accounts: Vec::new(),
            latency: Duration::ZERO,
            offline: AtomicBool::new(false),
        }
    }

    /// The demo accounts the frontend ships with.
    pub fn seeded() -> Result<Self, BackendError> {
        Self::empty()
            .with_user(
                User::new("1", "john_tech")
                    .with_email("tech@example.com")
                    .with_role(Role::Technician),
                "password123",
            )?
            .with_user(
                User::new("2", "admin_user")
                    .with_email("admin@clinic.com")
                    .with_role(Role::Admin),
                "admin789",
            )
    }

    /// Add an account, hashing `password`.
    pub fn with_user(self, user: User, password: &str) -> Result<Self, BackendError> {
        let hash = hash_password(password)?;
        Ok(self.with_hashed_user(user, hash))
    }

    /// Add an account with an already-hashed password.
    pub fn with_hashed_user(mut self, user: User, password_hash: impl Into<String>) -> Self {
        self.accounts.push(MockAccount {
            user,
            password_hash: password_hash.into(),
        });
        self
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// While offline, every call fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn users(&self) -> Vec<User> {
        self.accounts.iter().map(|a| a.user.clone()).collect()
    }

    async fn simulate_network(&self) -> Result<(), BackendError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable);
        }
        Ok(())
    }

    fn issue_token(user: &User) -> String {
        format!("{}_{}_{}", TOKEN_PREFIX, user.id, Utc::now().timestamp_millis())
    }

    fn user_id_from_token(token: &str) -> Option<&str> {
        let mut parts = token.split('_');
        match (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some("mock"), Some("token"), Some(id), Some(_), None) if !id.is_empty() => Some(id),
            _ => None,
        }
    }
}

/// Hash a password into an Argon2id PHC string.
pub fn hash_password(password: &str) -> Result<String, BackendError> {
    let params = Params::new(HASH_MEMORY_KIB, 1, 1, None)
        .map_err(|e| BackendError::Hashing(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let salt = SaltString::generate(&mut OsRng);
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| BackendError::Hashing(e.to_string()))
}

/// Verify a password against a PHC string. `Err` means the stored hash
/// itself is unusable.
pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, BackendError> {
    let parsed =
        PasswordHash::new(password_hash).map_err(|e| BackendError::Hashing(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[async_trait]
impl AuthBackend for MockBackend {
    async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse<LoginPayload>, BackendError> {
        self.simulate_network().await?;

        let Some(account) = self
            .accounts
            .iter()
            .find(|a| a.user.email.as_deref() == Some(email))
        else {
            return Ok(AuthResponse::rejected("User not found"));
        };

        match verify_password(password, &account.password_hash) {
            Ok(true) => {}
            Ok(false) => return Ok(AuthResponse::rejected("Invalid password")),
            Err(e) => {
                debug!(error = %e, user_id = %account.user.id, "Unusable password hash");
                return Ok(AuthResponse::rejected("User configuration error"));
            }
        }

        let token = Self::issue_token(&account.user);
        Ok(AuthResponse::ok(
            "Login successful",
            LoginPayload {
                user: account.user.clone(),
                token,
            },
        ))
    }

    async fn get_profile(&self, token: &str) -> Result<AuthResponse<User>, BackendError> {
        self.simulate_network().await?;

        let user = Self::user_id_from_token(token)
            .and_then(|id| self.accounts.iter().find(|a| a.user.id == id));

        match user {
            Some(account) => Ok(AuthResponse::ok(
                "Profile fetched successfully",
                account.user.clone(),
            )),
            None => Ok(AuthResponse::rejected("Invalid token")),
        }
    }

    async fn logout(&self, _token: &str) -> Result<AuthResponse<()>, BackendError> {
        self.simulate_network().await?;
        Ok(AuthResponse::ok("Logged out successfully", ()))
    }
}
