use std::sync::Arc;

use tracing::warn;

use super::storage::{KeyValueStore, StorageError};
use crate::models::User;

/// Storage key holding the raw session token
pub const TOKEN_KEY: &str = "auth_token";

/// Storage key holding the JSON-serialised user record
pub const USER_KEY: &str = "user";

/// The raw credential pair exactly as found in storage, before any
/// validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredential {
    pub token: String,
    pub user_json: String,
}

/// Token and user record persisted across restarts.
///
/// The two keys are always written together and cleared together.
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// Store the token and user record.
    pub fn save(&self, token: &str, user: &User) -> Result<(), StorageError> {
        let user_json = user.to_json()?;
        self.backend.set(TOKEN_KEY, token)?;
        self.backend.set(USER_KEY, &user_json)?;
        Ok(())
    }

    /// Load the stored pair. Returns `None` unless both keys hold
    /// non-empty values. A medium that cannot be read is cleared and
    /// treated as absent.
    pub fn load(&self) -> Option<StoredCredential> {
        match (self.read(TOKEN_KEY), self.read(USER_KEY)) {
            (Ok(Some(token)), Ok(Some(user_json))) => Some(StoredCredential { token, user_json }),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Stored credentials unreadable, clearing");
                if let Err(e) = self.clear() {
                    warn!(error = %e, "Failed to clear unreadable credentials");
                }
                None
            }
            _ => None,
        }
    }

    /// The stored token alone, without reading the user record.
    pub fn token(&self) -> Option<String> {
        match self.read(TOKEN_KEY) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to read stored token");
                None
            }
        }
    }

    pub fn has_token(&self) -> bool {
        self.token().is_some()
    }

    /// Delete both keys.
    pub fn clear(&self) -> Result<(), StorageError> {
        let token_result = self.backend.remove(TOKEN_KEY);
        let user_result = self.backend.remove(USER_KEY);
        token_result.and(user_result)
    }

    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.backend.get(key)?.filter(|value| !value.is_empty()))
    }
}
