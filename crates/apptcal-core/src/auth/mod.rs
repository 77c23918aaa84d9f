//! Client-side authentication session management.
//!
//! This module provides:
//! - `SessionManager`: login, optimistic restore with background
//!   verification, and logout
//! - `CredentialStore`: the persisted token/user pair over a pluggable
//!   `KeyValueStore` (file, OS keychain, or memory)
//! - `TamperChecker` and `SecurityLog`: structural checks on stored data and
//!   the audit trail of what was accepted or rejected
//! - `RouteGuard`: the navigation guard consuming the session

pub mod audit;
pub mod credentials;
pub mod guard;
pub mod session;
pub mod storage;
pub mod tamper;

pub use audit::{SecurityEvent, SecurityLog};
pub use credentials::{CredentialStore, StoredCredential, TOKEN_KEY, USER_KEY};
pub use guard::{Navigation, Route, RouteGuard};
pub use session::{
    AuthPhase, LoginResult, RestoreOutcome, Session, SessionManager, SessionOptions,
    VerificationHandle, VerificationOutcome,
};
pub use storage::{open_store, FileStore, KeyValueStore, KeyringStore, MemoryStore, StorageError};
pub use tamper::TamperChecker;
