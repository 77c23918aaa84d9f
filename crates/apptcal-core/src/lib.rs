//! Core library for apptcal.
//!
//! Holds the client-side authentication session for the appointment
//! calendar: the persisted credential pair, the checks run on it before it
//! is trusted, the auth backends (mock and GraphQL), and the session state
//! machine that ties them together.

pub mod auth;
pub mod backend;
pub mod config;
pub mod models;

#[cfg(test)]
mod testing;

pub use auth::{
    AuthPhase, CredentialStore, LoginResult, RestoreOutcome, RouteGuard, Session, SessionManager,
    SessionOptions, VerificationOutcome,
};
pub use backend::{AuthBackend, Backend, BackendError};
pub use config::Config;
pub use models::{Role, User};
