//! Data store switcher: flush-then-swap of the per-account storage context.
//!
//! Each account's records live in their own database file, named by a
//! stable hash of the account identifier. Switching flushes the current
//! store first; a flush failure aborts the switch and keeps the previous
//! store active, so unsaved writes are never silently dropped. `Scope`
//! serializes every call here behind its mutex, so readers never observe a
//! torn state between two stores.

use std::path::PathBuf;

use crate::db::DataStore;
use crate::error::{Error, Result};
use crate::models::SessionId;
use crate::util::store_key;

/// Where per-account store files live.
#[derive(Debug, Clone)]
pub enum StorageLocation {
    /// Persistent stores under this directory.
    OnDisk(PathBuf),
    /// Everything in memory (tests, ephemeral runs).
    InMemory,
}

struct ActiveStore {
    key: String,
    in_memory: bool,
    store: DataStore,
}

/// Owns the single open per-account storage context.
pub struct StoreSwitcher {
    location: StorageLocation,
    current: Option<ActiveStore>,
}

impl StoreSwitcher {
    #[must_use]
    pub fn new(location: StorageLocation) -> Self {
        Self {
            location,
            current: None,
        }
    }

    /// Flush and swap to the store for `account_id`.
    ///
    /// The guest identifier always resolves to an in-memory, non-persistent
    /// store. Re-switching to the already-open store is a flush, not a
    /// reopen (an in-memory store would lose its records otherwise).
    pub async fn switch_to(&mut self, account_id: &str, in_memory: bool) -> Result<()> {
        let in_memory = in_memory
            || account_id == SessionId::GUEST
            || matches!(self.location, StorageLocation::InMemory);
        let key = store_key(account_id);

        if let Some(current) = self.current.as_mut() {
            if current.key == key && current.in_memory == in_memory {
                return self.flush().await;
            }
            if current.store.has_pending_writes() {
                current.store.save().await.map_err(|error| {
                    Error::Storage(format!(
                        "Cannot switch stores with unsaved writes: {error}"
                    ))
                })?;
            }
        }

        // Close the previous context before opening the next one.
        self.current = None;

        let store = match &self.location {
            _ if in_memory => DataStore::open_in_memory().await?,
            StorageLocation::InMemory => DataStore::open_in_memory().await?,
            StorageLocation::OnDisk(data_dir) => {
                std::fs::create_dir_all(data_dir)?;
                let path = data_dir.join(format!("{key}.db"));
                DataStore::open(&path).await?
            }
        };

        tracing::debug!(
            "Switched data store to {key} ({})",
            if in_memory { "in-memory" } else { "on-disk" }
        );
        self.current = Some(ActiveStore {
            key,
            in_memory,
            store,
        });
        Ok(())
    }

    /// Save pending writes on the current store, if any.
    pub async fn flush(&mut self) -> Result<()> {
        match self.current.as_mut() {
            Some(current) => current.store.save().await,
            None => Ok(()),
        }
    }

    /// The currently open store.
    pub fn store(&mut self) -> Result<&mut DataStore> {
        self.current
            .as_mut()
            .map(|current| &mut current.store)
            .ok_or_else(|| Error::Storage("No data store is open".to_string()))
    }

    /// Storage key of the open store, if one is open.
    #[must_use]
    pub fn current_key(&self) -> Option<&str> {
        self.current.as_ref().map(|current| current.key.as_str())
    }
}
