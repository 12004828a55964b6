//! Credential storage seam and the active-credential slot.
//!
//! Platform backends (keychain, account manager, encrypted SQLite) implement
//! [`CredentialStore`]; the core only consumes the trait. The active
//! credential lives behind its own lock, acquired independently of every
//! cache lock so the two can never deadlock against each other.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// An authenticated user context: who, and the bearer token proving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub user_id: String,
    pub auth_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl Credential {
    pub fn new(user_id: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            auth_token: auth_token.into(),
            refresh_token: None,
        }
    }
}

/// Durable credential storage, keyed by `(user_id, group_key)`.
pub trait CredentialStore: Send + Sync {
    fn load(&self, user_id: &str, group_key: &str) -> Option<Credential>;
    fn store(&self, user_id: &str, group_key: &str, credential: &Credential);
    fn delete(&self, user_id: &str, group_key: &str);
}

/// Non-durable [`CredentialStore`] for tests and ephemeral sessions.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    entries: RwLock<HashMap<(String, String), Credential>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn load(&self, user_id: &str, group_key: &str) -> Option<Credential> {
        self.entries
            .read()
            .get(&(user_id.to_string(), group_key.to_string()))
            .cloned()
    }

    fn store(&self, user_id: &str, group_key: &str, credential: &Credential) {
        self.entries.write().insert(
            (user_id.to_string(), group_key.to_string()),
            credential.clone(),
        );
    }

    fn delete(&self, user_id: &str, group_key: &str) {
        self.entries
            .write()
            .remove(&(user_id.to_string(), group_key.to_string()));
    }
}

/// The client-wide active credential. Reads are taken at request-build time;
/// the lock is held only for the clone, never across I/O.
#[derive(Default)]
pub struct ActiveCredential {
    slot: RwLock<Option<Credential>>,
}

impl ActiveCredential {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, credential: Credential) {
        *self.slot.write() = Some(credential);
    }

    pub fn clear(&self) {
        *self.slot.write() = None;
    }

    pub fn current(&self) -> Option<Credential> {
        self.slot.read().clone()
    }

    /// The bearer token of the active credential, if a user is signed in.
    pub fn token(&self) -> Option<String> {
        self.slot.read().as_ref().map(|c| c.auth_token.clone())
    }
}
