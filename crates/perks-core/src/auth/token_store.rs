//! Secure token store: refresh/access token pairs keyed by session id.
//!
//! Tokens live apart from the session registry; the registry never sees
//! credentials and the secure store never sees display info.

use std::collections::HashMap;
use std::sync::Mutex;

use keyring::Entry;

use crate::error::{AuthError, Result};
use crate::models::{SessionId, SessionTokens};

const KEYRING_SERVICE_NAME: &str = "perks";

/// Opaque key-value secret store for session credentials.
pub trait TokenStore: Send + Sync {
    /// Load the token pair for a session, if one is stored.
    fn load(&self, session: &SessionId) -> Result<Option<SessionTokens>>;

    /// Persist the token pair for a session.
    fn save(&self, session: &SessionId, tokens: &SessionTokens) -> Result<()>;

    /// Remove the token pair for a session. Missing entries are fine.
    fn clear(&self, session: &SessionId) -> Result<()>;
}

/// OS keychain-backed token store.
#[derive(Debug, Clone, Default)]
pub struct KeyringTokenStore;

impl KeyringTokenStore {
    pub fn new() -> Self {
        Self
    }

    fn entry(session: &SessionId) -> Result<Entry> {
        let account = format!("session_tokens:{session}");
        Entry::new(KEYRING_SERVICE_NAME, &account)
            .map_err(|error| AuthError::SecureStorage(error.to_string()).into())
    }
}

impl TokenStore for KeyringTokenStore {
    fn load(&self, session: &SessionId) -> Result<Option<SessionTokens>> {
        let entry = Self::entry(session)?;
        match entry.get_password() {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(AuthError::SecureStorage(error.to_string()).into()),
        }
    }

    fn save(&self, session: &SessionId, tokens: &SessionTokens) -> Result<()> {
        let raw = serde_json::to_string(tokens)?;
        Self::entry(session)?
            .set_password(&raw)
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        Ok(())
    }

    fn clear(&self, session: &SessionId) -> Result<()> {
        let entry = Self::entry(session)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(AuthError::SecureStorage(error.to_string()).into()),
        }
    }
}

/// In-memory token store for tests and headless environments.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self, session: &SessionId) -> Result<Option<SessionTokens>> {
        let guard = self
            .inner
            .lock()
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        match guard.get(session.as_str()) {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    fn save(&self, session: &SessionId, tokens: &SessionTokens) -> Result<()> {
        let raw = serde_json::to_string(tokens)?;
        let mut guard = self
            .inner
            .lock()
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        guard.insert(session.as_str().to_string(), raw);
        Ok(())
    }

    fn clear(&self, session: &SessionId) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        guard.remove(session.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryTokenStore::new();
        let id = SessionId::new("s1");
        assert!(store.load(&id).unwrap().is_none());

        let tokens = SessionTokens::new("access", "refresh");
        store.save(&id, &tokens).unwrap();
        assert_eq!(store.load(&id).unwrap(), Some(tokens));

        store.clear(&id).unwrap();
        assert!(store.load(&id).unwrap().is_none());
        // Clearing a missing entry is fine.
        store.clear(&id).unwrap();
    }

    #[test]
    fn memory_store_isolates_sessions() {
        let store = MemoryTokenStore::new();
        store
            .save(&SessionId::new("s1"), &SessionTokens::new("a1", "r1"))
            .unwrap();
        assert!(store.load(&SessionId::new("s2")).unwrap().is_none());
    }
}
