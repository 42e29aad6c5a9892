//! Persistent session registry.
//!
//! Stores lightweight session records (identity and display info only) plus
//! a single "currently active" marker. Shared across all accounts, so it
//! lives in its own database outside any per-account store. Tokens are never
//! stored here; they belong to the secure token store.

use std::path::Path;

use libsql::params;

use crate::error::{Error, Result};
use crate::models::{SessionId, SessionInfo};

use super::connection::Database;
use super::migrations::Schema;

/// Registry of stored sessions.
pub struct SessionRegistry {
    db: Database,
}

impl SessionRegistry {
    /// Open (or create) the registry database at the given path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::open(path, Schema::SessionRegistry).await?;
        Ok(Self { db })
    }

    /// Open an in-memory registry (tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory(Schema::SessionRegistry).await?;
        Ok(Self { db })
    }

    /// All stored session records.
    pub async fn list(&self) -> Result<Vec<SessionInfo>> {
        let mut rows = self
            .db
            .connection()
            .query(
                "SELECT session_id, account_id, display_name, email, last_login_at
                 FROM sessions ORDER BY last_login_at DESC",
                (),
            )
            .await?;

        let mut sessions = Vec::new();
        while let Some(row) = rows.next().await? {
            sessions.push(parse_session(&row)?);
        }
        Ok(sessions)
    }

    /// Look up a stored session by id.
    pub async fn get(&self, id: &SessionId) -> Result<Option<SessionInfo>> {
        let mut rows = self
            .db
            .connection()
            .query(
                "SELECT session_id, account_id, display_name, email, last_login_at
                 FROM sessions WHERE session_id = ?",
                [id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(parse_session(&row)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace a stored session record.
    pub async fn upsert(&self, info: &SessionInfo) -> Result<()> {
        if info.is_guest() {
            // The guest session exists implicitly and is never stored.
            return Ok(());
        }
        self.db
            .connection()
            .execute(
                "INSERT INTO sessions (session_id, account_id, display_name, email, last_login_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(session_id) DO UPDATE SET
                     account_id = excluded.account_id,
                     display_name = excluded.display_name,
                     email = excluded.email,
                     last_login_at = excluded.last_login_at",
                params![
                    info.session_id.as_str(),
                    info.account_id.clone(),
                    info.display_name.clone(),
                    info.email.clone(),
                    info.last_login_at
                ],
            )
            .await?;
        Ok(())
    }

    /// Persist new identity fields for an existing session.
    ///
    /// A no-op for the guest session; `NotFound` for unknown ids.
    pub async fn update_info(&self, info: &SessionInfo) -> Result<()> {
        if info.is_guest() {
            return Ok(());
        }
        let rows = self
            .db
            .connection()
            .execute(
                "UPDATE sessions SET account_id = ?, display_name = ?, email = ?, last_login_at = ?
                 WHERE session_id = ?",
                params![
                    info.account_id.clone(),
                    info.display_name.clone(),
                    info.email.clone(),
                    info.last_login_at,
                    info.session_id.as_str()
                ],
            )
            .await?;
        if rows == 0 {
            return Err(Error::NotFound(info.session_id.to_string()));
        }
        Ok(())
    }

    /// Mark a stored session as the active one.
    ///
    /// The guest id clears the marker (guest is the implicit default).
    pub async fn set_active(&self, id: &SessionId) -> Result<()> {
        if id.is_guest() {
            return self.clear_active().await;
        }
        if self.get(id).await?.is_none() {
            return Err(Error::NotFound(id.to_string()));
        }
        self.db
            .connection()
            .execute(
                "INSERT INTO active_session (slot, session_id) VALUES (0, ?)
                 ON CONFLICT(slot) DO UPDATE SET session_id = excluded.session_id",
                [id.as_str()],
            )
            .await?;
        Ok(())
    }

    /// The currently marked active session, if any.
    pub async fn get_active(&self) -> Result<Option<SessionId>> {
        let mut rows = self
            .db
            .connection()
            .query("SELECT session_id FROM active_session WHERE slot = 0", ())
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(SessionId::new(row.get::<String>(0)?))),
            None => Ok(None),
        }
    }

    /// Clear the active marker (falls back to guest on next restore).
    pub async fn clear_active(&self) -> Result<()> {
        self.db
            .connection()
            .execute("DELETE FROM active_session WHERE slot = 0", ())
            .await?;
        Ok(())
    }

    /// Delete a stored session (sign-out-everywhere).
    ///
    /// Clears the active marker when it pointed at the removed session.
    pub async fn remove(&self, id: &SessionId) -> Result<()> {
        let rows = self
            .db
            .connection()
            .execute("DELETE FROM sessions WHERE session_id = ?", [id.as_str()])
            .await?;
        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        // ON DELETE CASCADE covers this when foreign keys are on; be explicit
        // anyway so the marker can never dangle.
        self.db
            .connection()
            .execute(
                "DELETE FROM active_session WHERE slot = 0 AND session_id = ?",
                [id.as_str()],
            )
            .await?;
        Ok(())
    }
}

fn parse_session(row: &libsql::Row) -> Result<SessionInfo> {
    Ok(SessionInfo {
        session_id: SessionId::new(row.get::<String>(0)?),
        account_id: row.get(1)?,
        display_name: row.get(2)?,
        email: row.get(3)?,
        last_login_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str) -> SessionInfo {
        SessionInfo::new(SessionId::new(id), "acct-1", "Dana", "dana@nsp.com")
    }

    async fn setup() -> SessionRegistry {
        SessionRegistry::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_and_list_round_trip() {
        let registry = setup().await;
        registry.upsert(&sample("s1")).await.unwrap();
        registry.upsert(&sample("s2")).await.unwrap();

        let sessions = registry.list().await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(registry
            .get(&SessionId::new("s1"))
            .await
            .unwrap()
            .is_some());
        assert!(registry
            .get(&SessionId::new("missing"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn guest_is_never_stored() {
        let registry = setup().await;
        registry.upsert(&SessionInfo::guest()).await.unwrap();
        assert!(registry.list().await.unwrap().is_empty());
        // update_info on guest is a silent no-op.
        registry.update_info(&SessionInfo::guest()).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn active_marker_round_trip() {
        let registry = setup().await;
        registry.upsert(&sample("s1")).await.unwrap();

        assert_eq!(registry.get_active().await.unwrap(), None);
        registry.set_active(&SessionId::new("s1")).await.unwrap();
        assert_eq!(
            registry.get_active().await.unwrap(),
            Some(SessionId::new("s1"))
        );

        registry.set_active(&SessionId::guest()).await.unwrap();
        assert_eq!(registry.get_active().await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn set_active_requires_stored_session() {
        let registry = setup().await;
        let result = registry.set_active(&SessionId::new("missing")).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remove_clears_active_marker() {
        let registry = setup().await;
        registry.upsert(&sample("s1")).await.unwrap();
        registry.set_active(&SessionId::new("s1")).await.unwrap();

        registry.remove(&SessionId::new("s1")).await.unwrap();
        assert_eq!(registry.get_active().await.unwrap(), None);
        assert!(matches!(
            registry.remove(&SessionId::new("s1")).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_info_requires_existing_session() {
        let registry = setup().await;
        assert!(matches!(
            registry.update_info(&sample("ghost")).await,
            Err(Error::NotFound(_))
        ));

        registry.upsert(&sample("s1")).await.unwrap();
        let mut info = sample("s1");
        info.display_name = "Dana R.".to_string();
        registry.update_info(&info).await.unwrap();
        let loaded = registry.get(&SessionId::new("s1")).await.unwrap().unwrap();
        assert_eq!(loaded.display_name, "Dana R.");
    }
}
