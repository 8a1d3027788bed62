//! SQLite schema for the catalog database.
//!
//! Identities, their source references and replay tickets share one database
//! so that replaying a ticket and committing its import happen in a single
//! transaction.

use log::info;
use rusqlite::Connection;

use crate::{CatalogError, Result};

pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS identities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    exact_digest BLOB NOT NULL UNIQUE,
    acoustic_bucket INTEGER,
    acoustic_frames INTEGER,
    acoustic_vector BLOB,
    metadata TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_identities_bucket ON identities (acoustic_bucket);

CREATE TABLE IF NOT EXISTS source_references (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id INTEGER NOT NULL REFERENCES identities (id),
    path TEXT NOT NULL,
    mtime INTEGER NOT NULL,
    size INTEGER NOT NULL,
    imported_at INTEGER NOT NULL,
    kept_original INTEGER NOT NULL,
    import_mode TEXT NOT NULL,
    UNIQUE (identity_id, path, mtime, size)
);
CREATE INDEX IF NOT EXISTS idx_references_identity ON source_references (identity_id);

CREATE TABLE IF NOT EXISTS catalog_tickets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL,
    requested_at INTEGER NOT NULL,
    resolved_at INTEGER,
    resolved_identity INTEGER REFERENCES identities (id)
);
CREATE INDEX IF NOT EXISTS idx_tickets_pending ON catalog_tickets (resolved_at, id);
"#;

/// Creates the schema on a fresh database and refuses databases written by a
/// newer version.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version > SCHEMA_VERSION {
        return Err(CatalogError::IncompatibleSchema {
            found: version,
            supported: SCHEMA_VERSION,
        });
    }

    if version < SCHEMA_VERSION {
        conn.execute_batch(SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        info!("Initialized catalog schema version {}", SCHEMA_VERSION);
    }

    Ok(())
}
