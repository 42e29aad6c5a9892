//! Base persisted entity and its sync-metadata companion.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::util::unix_timestamp_ms;

/// A unique identifier for a persisted entity, using UUID v7 (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Create a new unique entity ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID.
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Sync metadata attached 1:1 to every persisted entity.
///
/// Tracks whether a record has ever been reconciled with the remote system.
/// `external_id`, once set, is immutable; `is_synced()` is defined as
/// `external_id.is_some()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySync {
    pub id: EntityId,
    pub is_draft: bool,
    pub external_id: Option<String>,
    /// Last sync-state change timestamp (Unix ms).
    pub updated_at: i64,
}

impl EntitySync {
    fn local(id: EntityId) -> Self {
        Self {
            id,
            is_draft: true,
            external_id: None,
            updated_at: unix_timestamp_ms(),
        }
    }

    fn synced(id: EntityId, external_id: String) -> Self {
        Self {
            id,
            is_draft: false,
            external_id: Some(external_id),
            updated_at: unix_timestamp_ms(),
        }
    }

    /// Whether this record has been reconciled with the remote system.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.external_id.is_some()
    }

    /// Assign the remote identifier. Fails if one was already assigned.
    pub fn assign_external_id(&mut self, external_id: impl Into<String>) -> Result<()> {
        if self.external_id.is_some() {
            return Err(Error::Validation(
                "External id is immutable once assigned".to_string(),
            ));
        }
        let external_id = external_id.into();
        if external_id.trim().is_empty() {
            return Err(Error::Validation(
                "External id cannot be empty".to_string(),
            ));
        }
        self.external_id = Some(external_id);
        self.is_draft = false;
        self.updated_at = unix_timestamp_ms();
        Ok(())
    }
}

/// Base persisted record for any domain object.
///
/// Constructed together with its [`EntitySync`] companion by the factory
/// functions below, so the 1:1 invariant can never be violated by a missed
/// step. `deleted_at` marks logical deletion; rows are never hard-deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    /// Creation timestamp (Unix ms).
    pub created_at: i64,
    /// Last update timestamp (Unix ms). Auto-advances on every mutation
    /// unless the caller pins it with [`Entity::set_updated_at`].
    pub updated_at: i64,
    /// Soft-delete timestamp (Unix ms).
    pub deleted_at: Option<i64>,
    pub sync: EntitySync,
}

impl Entity {
    /// Create a local-only draft entity with a fresh id.
    #[must_use]
    pub fn new_local() -> Self {
        Self::new_local_with_id(EntityId::new())
    }

    /// Create a local-only draft entity with a caller-supplied id.
    ///
    /// Used when the entity id must match another record (e.g. the account
    /// row that shares its id).
    #[must_use]
    pub fn new_local_with_id(id: EntityId) -> Self {
        let now = unix_timestamp_ms();
        Self {
            id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            sync: EntitySync::local(id),
        }
    }

    /// Create an entity that is already reconciled with the remote system.
    pub fn new_synced(id: EntityId, external_id: impl Into<String>) -> Result<Self> {
        let external_id = external_id.into();
        if external_id.trim().is_empty() {
            return Err(Error::Validation(
                "External id cannot be empty".to_string(),
            ));
        }
        let now = unix_timestamp_ms();
        Ok(Self {
            id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            sync: EntitySync::synced(id, external_id),
        })
    }

    /// Advance `updated_at` to now.
    pub fn touch(&mut self) {
        let now = unix_timestamp_ms();
        // Guarantee forward movement even within one clock tick.
        self.updated_at = now.max(self.updated_at + 1);
    }

    /// Pin `updated_at` to an explicit timestamp (skips auto-advance).
    pub fn set_updated_at(&mut self, timestamp: i64) {
        self.updated_at = timestamp;
    }

    /// Mark the entity logically deleted.
    pub fn soft_delete(&mut self) {
        if self.deleted_at.is_none() {
            self.deleted_at = Some(unix_timestamp_ms());
            self.touch();
        }
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether the companion sync record carries a remote id.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.sync.is_synced()
    }

    /// Record the remote id after a successful publish.
    pub fn mark_synced(&mut self, external_id: impl Into<String>) -> Result<()> {
        self.sync.assign_external_id(external_id)?;
        self.touch();
        Ok(())
    }
}
