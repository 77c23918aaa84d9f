//! GraphQL-over-HTTP auth backend.
//!
//! Requests are `POST {query, variables}` to a single endpoint; responses
//! are `{data, errors}`. A populated `errors` array is an application
//! rejection. Send failures, non-2xx statuses and undecodable bodies are
//! transport errors.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{AuthBackend, AuthResponse, BackendError, LoginPayload};
use crate::models::User;

const LOGIN_MUTATION: &str = r#"
    mutation Login($email: String!, $password: String!) {
      login(email: $email, password: $password) {
        success
        message
        user {
          id
          username
          email
          role
          createdAt
        }
        token
      }
    }
"#;

const LOGOUT_MUTATION: &str = r#"
    mutation Logout($token: String!) {
      logout(token: $token) {
        success
        message
      }
    }
"#;

const GET_PROFILE_QUERY: &str = r#"
    query GetProfile($token: String!) {
      getProfile(token: $token) {
        id
        username
        email
        role
        createdAt
      }
    }
"#;

/// Message used when the server reports errors without one
const DEFAULT_GRAPHQL_ERROR: &str = "GraphQL error occurred";

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: Value,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: Option<String>,
}

impl<T> GraphQlResponse<T> {
    /// First error message, if the server reported any errors.
    fn error_message(&self) -> Option<String> {
        let errors = self.errors.as_ref().filter(|e| !e.is_empty())?;
        Some(
            errors[0]
                .message
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| DEFAULT_GRAPHQL_ERROR.to_string()),
        )
    }
}

#[derive(Debug, Deserialize)]
struct LoginData {
    login: Option<LoginResult>,
}

#[derive(Debug, Deserialize)]
struct LoginResult {
    success: bool,
    message: String,
    user: Option<User>,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProfileData {
    #[serde(rename = "getProfile")]
    get_profile: Option<User>,
}

#[derive(Debug, Deserialize)]
struct LogoutData {
    logout: Option<LogoutResult>,
}

#[derive(Debug, Deserialize)]
struct LogoutResult {
    success: bool,
    message: String,
}

/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct GraphQlBackend {
    client: Client,
    endpoint: String,
}

impl GraphQlBackend {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
    ) -> Result<GraphQlResponse<T>, BackendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(header::ACCEPT, "application/json")
            .json(&GraphQlRequest { query, variables })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, &body));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl AuthBackend for GraphQlBackend {
    async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse<LoginPayload>, BackendError> {
        let response: GraphQlResponse<LoginData> = self
            .execute(LOGIN_MUTATION, json!({ "email": email, "password": password }))
            .await?;

        if let Some(message) = response.error_message() {
            debug!(%message, "Login rejected by GraphQL errors");
            return Ok(AuthResponse::rejected(message));
        }

        let login = response
            .data
            .and_then(|d| d.login)
            .ok_or_else(|| BackendError::InvalidResponse("missing login payload".to_string()))?;

        if !login.success {
            return Ok(AuthResponse::rejected(login.message));
        }

        match (login.user, login.token) {
            (Some(user), Some(token)) if !token.is_empty() => {
                Ok(AuthResponse::ok(login.message, LoginPayload { user, token }))
            }
            _ => Err(BackendError::InvalidResponse(
                "successful login without user or token".to_string(),
            )),
        }
    }

    async fn get_profile(&self, token: &str) -> Result<AuthResponse<User>, BackendError> {
        let response: GraphQlResponse<ProfileData> = self
            .execute(GET_PROFILE_QUERY, json!({ "token": token }))
            .await?;

        if let Some(message) = response.error_message() {
            return Ok(AuthResponse::rejected(message));
        }

        match response.data.and_then(|d| d.get_profile) {
            Some(user) => Ok(AuthResponse::ok("Profile fetched successfully", user)),
            None => Ok(AuthResponse::rejected("Invalid token")),
        }
    }

    async fn logout(&self, token: &str) -> Result<AuthResponse<()>, BackendError> {
        let response: GraphQlResponse<LogoutData> = self
            .execute(LOGOUT_MUTATION, json!({ "token": token }))
            .await?;

        if let Some(message) = response.error_message() {
            return Ok(AuthResponse::rejected(message));
        }

        match response.data.and_then(|d| d.logout) {
            Some(result) if result.success => Ok(AuthResponse::ok(result.message, ())),
            Some(result) => Ok(AuthResponse::rejected(result.message)),
            None => Err(BackendError::InvalidResponse(
                "missing logout payload".to_string(),
            )),
        }
    }
}
