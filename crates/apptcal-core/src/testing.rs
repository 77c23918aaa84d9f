//! Test doubles shared by the session and guard tests.

use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::auth::storage::{FileStore, KeyValueStore, MemoryStore, StorageError};
use crate::auth::CredentialStore;
use crate::backend::{AuthBackend, AuthResponse, BackendError, LoginPayload};
use crate::models::{Role, User};

type Scripted<T> = Result<AuthResponse<T>, BackendError>;

/// Backend that replays queued responses. An empty queue answers with a
/// rejection. Gates hold a call until the test releases them.
#[derive(Default)]
pub struct ScriptedBackend {
    logins: Mutex<VecDeque<Scripted<LoginPayload>>>,
    profiles: Mutex<VecDeque<Scripted<User>>>,
    logout_tokens: Mutex<Vec<String>>,
    logout_fails: Mutex<bool>,
    login_gate: Mutex<Option<Arc<Notify>>>,
    profile_gate: Mutex<Option<Arc<Notify>>>,
    login_calls: AtomicUsize,
    profile_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_login(&self, response: Scripted<LoginPayload>) {
        self.logins.lock().unwrap().push_back(response);
    }

    pub fn login_ok(&self, user: User, token: &str) {
        self.push_login(Ok(AuthResponse::ok(
            "Login successful",
            LoginPayload {
                user,
                token: token.to_string(),
            },
        )));
    }

    pub fn push_profile(&self, response: Scripted<User>) {
        self.profiles.lock().unwrap().push_back(response);
    }

    pub fn profile_ok(&self, user: User) {
        self.push_profile(Ok(AuthResponse::ok("Profile fetched successfully", user)));
    }

    pub fn fail_logout(&self) {
        *self.logout_fails.lock().unwrap() = true;
    }

    /// Hold the next login calls until the returned gate is notified.
    pub fn gate_login(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.login_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Hold the next profile calls until the returned gate is notified.
    pub fn gate_profile(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.profile_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }

    pub fn logout_tokens(&self) -> Vec<String> {
        self.logout_tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuthBackend for ScriptedBackend {
    async fn login(
        &self,
        _email: &str,
        _password: &str,
    ) -> Result<AuthResponse<LoginPayload>, BackendError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.login_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.logins
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(AuthResponse::rejected("no scripted login")))
    }

    async fn get_profile(&self, _token: &str) -> Result<AuthResponse<User>, BackendError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.profile_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.profiles
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(AuthResponse::rejected("no scripted profile")))
    }

    async fn logout(&self, token: &str) -> Result<AuthResponse<()>, BackendError> {
        self.logout_tokens.lock().unwrap().push(token.to_string());
        if *self.logout_fails.lock().unwrap() {
            return Err(BackendError::Unavailable);
        }
        Ok(AuthResponse::ok("Logout successful", ()))
    }
}

pub fn user(id: &str, email: &str) -> User {
    User::new(id, format!("user{}", id))
        .with_email(email)
        .with_role(Role::Technician)
}

pub fn memory_store() -> (Arc<MemoryStore>, CredentialStore) {
    let backend = Arc::new(MemoryStore::new());
    (backend.clone(), CredentialStore::new(backend))
}

/// A store already holding `token` and the serialised `user`.
pub fn seeded_store(token: &str, user: &User) -> (Arc<MemoryStore>, CredentialStore) {
    let (backend, store) = memory_store();
    store.save(token, user).unwrap();
    (backend, store)
}

/// A store holding a token and a raw user string.
pub fn raw_store(token: &str, user_json: &str) -> (Arc<MemoryStore>, CredentialStore) {
    let (backend, store) = memory_store();
    backend.set(crate::auth::TOKEN_KEY, token).unwrap();
    backend.set(crate::auth::USER_KEY, user_json).unwrap();
    (backend, store)
}

/// A file-backed store at `dir/credentials.json`.
pub fn file_store(dir: &Path) -> (Arc<FileStore>, CredentialStore) {
    let backend = Arc::new(FileStore::new(dir.join("credentials.json")));
    (backend.clone(), CredentialStore::new(backend))
}

/// A medium that reads as empty and refuses every write.
pub struct FailingStore;

impl KeyValueStore for FailingStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only medium").into())
    }

    fn remove(&self, _key: &str) -> Result<(), StorageError> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only medium").into())
    }
}
