//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Which schema a database carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// Per-account data store: accounts, entities, sync metadata, attachments.
    AccountStore,
    /// Shared session registry: stored sessions plus the active marker.
    SessionRegistry,
}

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations for the given schema
pub async fn run(conn: &Connection, schema: Schema) -> Result<()> {
    let version = get_version(conn).await?;
    if version >= CURRENT_VERSION {
        return Ok(());
    }

    if version < 1 {
        match schema {
            Schema::AccountStore => migrate_store_v1(conn).await?,
            Schema::SessionRegistry => migrate_registry_v1(conn).await?,
        }
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    // Check if schema_version table exists
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Apply a list of statements inside one transaction and record the version.
async fn apply(conn: &Connection, statements: &[&str], version: i32) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    // inside a transaction for atomicity.
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for statement in statements {
        if let Err(error) = conn.execute(statement, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(error.into());
        }
    }

    if let Err(error) = conn
        .execute(
            "INSERT INTO schema_version (version) VALUES (?)",
            [version],
        )
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(error.into());
    }

    conn.execute("COMMIT", ()).await?;
    tracing::debug!("Applied schema migration v{version}");
    Ok(())
}

/// Account store v1: accounts, entities, sync companions, attachments.
async fn migrate_store_v1(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Base entity rows; soft-deleted via deleted_at.
        "CREATE TABLE IF NOT EXISTS entities (
            id TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        )",
        "CREATE INDEX IF NOT EXISTS idx_entities_updated ON entities(updated_at DESC)",
        // 1:1 sync companion, created in the same transaction as its entity.
        "CREATE TABLE IF NOT EXISTS entity_sync (
            entity_id TEXT PRIMARY KEY REFERENCES entities(id) ON DELETE CASCADE,
            is_draft INTEGER NOT NULL,
            external_id TEXT UNIQUE,
            updated_at INTEGER NOT NULL
        )",
        // Attachment blobs, hash-deduplicated cleanup via source_hash.
        "CREATE TABLE IF NOT EXISTS attachments (
            id TEXT PRIMARY KEY,
            source_url TEXT,
            raw BLOB,
            native BLOB,
            source_hash TEXT
        )",
        // One account per physical store; shares its id with an entity row.
        "CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY REFERENCES entities(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            phone TEXT,
            points INTEGER NOT NULL DEFAULT 0,
            image_id TEXT REFERENCES attachments(id)
        )",
    ];
    apply(conn, &statements, 1).await
}

/// Session registry v1: stored sessions and the single active marker.
async fn migrate_registry_v1(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        "CREATE TABLE IF NOT EXISTS sessions (
            session_id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            display_name TEXT NOT NULL,
            email TEXT NOT NULL,
            last_login_at INTEGER NOT NULL
        )",
        // Single-row marker; removing the session clears the marker too.
        "CREATE TABLE IF NOT EXISTS active_session (
            slot INTEGER PRIMARY KEY CHECK (slot = 0),
            session_id TEXT NOT NULL REFERENCES sessions(session_id) ON DELETE CASCADE
        )",
    ];
    apply(conn, &statements, 1).await
}
