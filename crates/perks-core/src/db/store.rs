//! Per-account data store with a staged-write buffer.
//!
//! Writes are staged in memory and applied in one transaction by
//! [`DataStore::save`]. The store switcher refuses to swap stores while
//! staged writes exist and cannot be flushed, so records are never silently
//! dropped mid-switch.

use std::path::Path;

use libsql::{params, Connection, Value};

use crate::error::{Error, Result};
use crate::models::{Account, Attachment, AttachmentId, Entity, EntityId, EntitySync};

use super::connection::Database;
use super::migrations::Schema;

/// A buffered write, applied atomically by [`DataStore::save`].
///
/// Closed dispatch table: every persistable mutation has exactly one variant
/// here, resolved in [`apply`].
#[derive(Debug, Clone)]
pub enum StagedWrite {
    /// Insert a new entity together with its sync companion.
    CreateEntity(Entity),
    /// Update an existing entity and its sync companion.
    UpdateEntity(Entity),
    /// Soft-delete an entity by timestamp.
    SoftDeleteEntity {
        id: EntityId,
        deleted_at: i64,
        updated_at: i64,
    },
    /// Insert or replace the account row (and its image attachment).
    UpsertAccount(Account),
    /// Insert or replace a standalone attachment row.
    UpsertAttachment(Attachment),
    /// Delete an attachment and detach it from the owning account in the
    /// same transaction.
    RemoveAccountImage {
        account_id: EntityId,
        attachment_id: AttachmentId,
    },
}

/// One open per-account storage context.
pub struct DataStore {
    db: Database,
    pending: Vec<StagedWrite>,
}

impl DataStore {
    /// Open (or create) a persistent store at the given path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::open(path, Schema::AccountStore).await?;
        Ok(Self {
            db,
            pending: Vec::new(),
        })
    }

    /// Open a non-persistent store (guest sessions and tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory(Schema::AccountStore).await?;
        Ok(Self {
            db,
            pending: Vec::new(),
        })
    }

    /// Buffer a write for the next [`DataStore::save`].
    pub fn stage(&mut self, write: StagedWrite) {
        self.pending.push(write);
    }

    /// Whether staged writes are waiting to be saved.
    #[must_use]
    pub fn has_pending_writes(&self) -> bool {
        !self.pending.is_empty()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Apply all staged writes in one transaction.
    ///
    /// On failure the transaction rolls back and the staged writes are kept,
    /// so a later save (or a loud switch failure) still sees them.
    pub async fn save(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let conn = self.db.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;
        for write in &self.pending {
            if let Err(error) = apply(conn, write).await {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(error);
            }
        }
        conn.execute("COMMIT", ()).await?;

        tracing::debug!("Saved {} staged writes", self.pending.len());
        self.pending.clear();
        Ok(())
    }

    /// Fetch the single account stored in this store, if any.
    pub async fn fetch_account(&self) -> Result<Option<Account>> {
        let conn = self.db.connection();
        let mut rows = conn
            .query(
                "SELECT id, name, email, phone, points, image_id FROM accounts LIMIT 1",
                (),
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let id = parse_entity_id(&row.get::<String>(0)?)?;
        let image = match text_or_null(row.get_value(5)?) {
            Some(image_id) => {
                let image_id: AttachmentId = image_id
                    .parse()
                    .map_err(|_| Error::Storage("Invalid attachment id in accounts row".into()))?;
                self.fetch_attachment(&image_id)
                    .await?
                    .unwrap_or_else(Attachment::empty)
            }
            None => Attachment::empty(),
        };

        Ok(Some(Account {
            id,
            name: row.get(1)?,
            email: row.get(2)?,
            phone: text_or_null(row.get_value(3)?),
            points: row.get(4)?,
            image,
        }))
    }

    /// Fetch an entity (with its sync companion) by id, deleted or not.
    pub async fn fetch_entity(&self, id: &EntityId) -> Result<Option<Entity>> {
        let conn = self.db.connection();
        let mut rows = conn
            .query(
                "SELECT e.id, e.created_at, e.updated_at, e.deleted_at,
                        s.is_draft, s.external_id, s.updated_at
                 FROM entities e
                 JOIN entity_sync s ON s.entity_id = e.id
                 WHERE e.id = ?",
                [id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(parse_entity(&row)?)),
            None => Ok(None),
        }
    }

    /// List non-deleted entities, most recently updated first.
    pub async fn list_entities(&self) -> Result<Vec<Entity>> {
        let conn = self.db.connection();
        let mut rows = conn
            .query(
                "SELECT e.id, e.created_at, e.updated_at, e.deleted_at,
                        s.is_draft, s.external_id, s.updated_at
                 FROM entities e
                 JOIN entity_sync s ON s.entity_id = e.id
                 WHERE e.deleted_at IS NULL
                 ORDER BY e.updated_at DESC",
                (),
            )
            .await?;

        let mut entities = Vec::new();
        while let Some(row) = rows.next().await? {
            entities.push(parse_entity(&row)?);
        }
        Ok(entities)
    }

    /// Fetch an attachment row by id.
    pub async fn fetch_attachment(&self, id: &AttachmentId) -> Result<Option<Attachment>> {
        let conn = self.db.connection();
        let mut rows = conn
            .query(
                "SELECT id, source_url, raw, native, source_hash FROM attachments WHERE id = ?",
                [id.as_str()],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let id: AttachmentId = row
            .get::<String>(0)?
            .parse()
            .map_err(|_| Error::Storage("Invalid attachment id".into()))?;
        Ok(Some(Attachment::from_parts(
            id,
            text_or_null(row.get_value(1)?),
            blob_or_null(row.get_value(2)?),
            blob_or_null(row.get_value(3)?),
            text_or_null(row.get_value(4)?),
        )))
    }
}

async fn apply(conn: &Connection, write: &StagedWrite) -> Result<()> {
    match write {
        StagedWrite::CreateEntity(entity) => {
            conn.execute(
                "INSERT INTO entities (id, created_at, updated_at, deleted_at) VALUES (?, ?, ?, ?)",
                params![
                    entity.id.as_str(),
                    entity.created_at,
                    entity.updated_at,
                    opt_int(entity.deleted_at)
                ],
            )
            .await?;
            conn.execute(
                "INSERT INTO entity_sync (entity_id, is_draft, external_id, updated_at)
                 VALUES (?, ?, ?, ?)",
                params![
                    entity.sync.id.as_str(),
                    i64::from(entity.sync.is_draft),
                    opt_text(entity.sync.external_id.as_deref()),
                    entity.sync.updated_at
                ],
            )
            .await?;
            Ok(())
        }
        StagedWrite::UpdateEntity(entity) => {
            let rows = conn
                .execute(
                    "UPDATE entities SET updated_at = ?, deleted_at = ? WHERE id = ?",
                    params![
                        entity.updated_at,
                        opt_int(entity.deleted_at),
                        entity.id.as_str()
                    ],
                )
                .await?;
            if rows == 0 {
                return Err(Error::NotFound(entity.id.to_string()));
            }
            conn.execute(
                "UPDATE entity_sync SET is_draft = ?, external_id = ?, updated_at = ?
                 WHERE entity_id = ?",
                params![
                    i64::from(entity.sync.is_draft),
                    opt_text(entity.sync.external_id.as_deref()),
                    entity.sync.updated_at,
                    entity.sync.id.as_str()
                ],
            )
            .await?;
            Ok(())
        }
        StagedWrite::SoftDeleteEntity {
            id,
            deleted_at,
            updated_at,
        } => {
            let rows = conn
                .execute(
                    "UPDATE entities SET deleted_at = ?, updated_at = ?
                     WHERE id = ? AND deleted_at IS NULL",
                    params![*deleted_at, *updated_at, id.as_str()],
                )
                .await?;
            if rows == 0 {
                return Err(Error::NotFound(id.to_string()));
            }
            Ok(())
        }
        StagedWrite::UpsertAccount(account) => {
            upsert_attachment(conn, &account.image).await?;
            conn.execute(
                "INSERT INTO accounts (id, name, email, phone, points, image_id)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     email = excluded.email,
                     phone = excluded.phone,
                     points = excluded.points,
                     image_id = excluded.image_id",
                params![
                    account.id.as_str(),
                    account.name.clone(),
                    account.email.clone(),
                    opt_text(account.phone.as_deref()),
                    account.points,
                    account.image.id.as_str()
                ],
            )
            .await?;
            Ok(())
        }
        StagedWrite::UpsertAttachment(attachment) => upsert_attachment(conn, attachment).await,
        StagedWrite::RemoveAccountImage {
            account_id,
            attachment_id,
        } => {
            conn.execute(
                "UPDATE accounts SET image_id = NULL WHERE id = ? AND image_id = ?",
                params![account_id.as_str(), attachment_id.as_str()],
            )
            .await?;
            conn.execute(
                "DELETE FROM attachments WHERE id = ?",
                [attachment_id.as_str()],
            )
            .await?;
            Ok(())
        }
    }
}

async fn upsert_attachment(conn: &Connection, attachment: &Attachment) -> Result<()> {
    conn.execute(
        "INSERT INTO attachments (id, source_url, raw, native, source_hash)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             source_url = excluded.source_url,
             raw = excluded.raw,
             native = excluded.native,
             source_hash = excluded.source_hash",
        params![
            attachment.id.as_str(),
            opt_text(attachment.source_url.as_deref()),
            opt_blob(attachment.raw.as_deref()),
            opt_blob(attachment.native.as_deref()),
            opt_text(attachment.source_hash.as_deref())
        ],
    )
    .await?;
    Ok(())
}

fn parse_entity(row: &libsql::Row) -> Result<Entity> {
    let id = parse_entity_id(&row.get::<String>(0)?)?;
    Ok(Entity {
        id,
        created_at: row.get(1)?,
        updated_at: row.get(2)?,
        deleted_at: int_or_null(row.get_value(3)?),
        sync: EntitySync {
            id,
            is_draft: row.get::<i32>(4)? != 0,
            external_id: text_or_null(row.get_value(5)?),
            updated_at: row.get(6)?,
        },
    })
}

fn parse_entity_id(raw: &str) -> Result<EntityId> {
    raw.parse()
        .map_err(|_| Error::Storage(format!("Invalid entity id in row: {raw}")))
}

fn opt_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |text| Value::Text(text.to_string()))
}

fn opt_blob(value: Option<&[u8]>) -> Value {
    value.map_or(Value::Null, |bytes| Value::Blob(bytes.to_vec()))
}

fn opt_int(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::Integer)
}

fn text_or_null(value: Value) -> Option<String> {
    match value {
        Value::Text(text) => Some(text),
        _ => None,
    }
}

fn blob_or_null(value: Value) -> Option<Vec<u8>> {
    match value {
        Value::Blob(bytes) => Some(bytes),
        _ => None,
    }
}

fn int_or_null(value: Value) -> Option<i64> {
    match value {
        Value::Integer(int) => Some(int),
        _ => None,
    }
}
