//! Auth backend port and its two collaborators.
//!
//! The session manager depends only on [`AuthBackend`]. Two implementations
//! exist: an in-process [`MockBackend`] with a fixed user table and a
//! [`GraphQlBackend`] that talks to the GraphQL Lambda over HTTP. Which one
//! is used is decided once at startup via [`Backend::from_config`].

pub mod error;
pub mod graphql;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{ApiType, Config};
use crate::models::User;

pub use error::BackendError;
pub use graphql::GraphQlBackend;
pub use mock::MockBackend;

/// Application-level result of a backend call.
///
/// `success == false` is an ordinary rejection carrying a human-readable
/// message; `data` is only meaningful on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T> AuthResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginPayload {
    pub user: User,
    pub token: String,
}

/// The capability set the session manager needs from a backend.
///
/// Implementations return `Err` only for transport failures.
#[async_trait]
pub trait AuthBackend: Send + Sync + 'static {
    async fn login(&self, email: &str, password: &str)
        -> Result<AuthResponse<LoginPayload>, BackendError>;

    async fn get_profile(&self, token: &str) -> Result<AuthResponse<User>, BackendError>;

    /// Server-side bookkeeping on logout. Backends without one succeed
    /// locally.
    async fn logout(&self, _token: &str) -> Result<AuthResponse<()>, BackendError> {
        Ok(AuthResponse::ok("Logged out locally", ()))
    }
}

/// The backend selected at startup.
pub enum Backend {
    Mock(MockBackend),
    GraphQl(GraphQlBackend),
}

impl Backend {
    pub fn from_config(config: &Config) -> Result<Self, BackendError> {
        match config.api_type {
            ApiType::Mock => Ok(Backend::Mock(
                MockBackend::seeded()?.with_latency(config.mock_latency()),
            )),
            ApiType::Graphql => Ok(Backend::GraphQl(GraphQlBackend::new(
                &config.graphql_endpoint,
                config.request_timeout(),
            )?)),
        }
    }

    pub fn kind(&self) -> ApiType {
        match self {
            Backend::Mock(_) => ApiType::Mock,
            Backend::GraphQl(_) => ApiType::Graphql,
        }
    }
}

#[async_trait]
impl AuthBackend for Backend {
    async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse<LoginPayload>, BackendError> {
        match self {
            Backend::Mock(b) => b.login(email, password).await,
            Backend::GraphQl(b) => b.login(email, password).await,
        }
    }

    async fn get_profile(&self, token: &str) -> Result<AuthResponse<User>, BackendError> {
        match self {
            Backend::Mock(b) => b.get_profile(token).await,
            Backend::GraphQl(b) => b.get_profile(token).await,
        }
    }

    async fn logout(&self, token: &str) -> Result<AuthResponse<()>, BackendError> {
        match self {
            Backend::Mock(b) => b.logout(token).await,
            Backend::GraphQl(b) => b.logout(token).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_mock() {
        let backend = Backend::from_config(&Config::default()).unwrap();
        assert_eq!(backend.kind(), ApiType::Mock);

        let response = backend.login("tech@example.com", "password123").await.unwrap();
        assert!(response.success);
    }

    #[test]
    fn test_from_config_graphql() {
        let config = Config {
            api_type: ApiType::Graphql,
            ..Config::default()
        };
        let backend = Backend::from_config(&config).unwrap();
        assert_eq!(backend.kind(), ApiType::Graphql);
    }

    struct LoginOnly;

    #[async_trait]
    impl AuthBackend for LoginOnly {
        async fn login(&self, _: &str, _: &str) -> Result<AuthResponse<LoginPayload>, BackendError> {
            Ok(AuthResponse::rejected("nope"))
        }

        async fn get_profile(&self, _: &str) -> Result<AuthResponse<User>, BackendError> {
            Ok(AuthResponse::rejected("Invalid token"))
        }
    }

    #[tokio::test]
    async fn test_default_logout_is_local_success() {
        let response = LoginOnly.logout("tkn").await.unwrap();
        assert!(response.success);
    }
}
