//! Durable catalog of audio identities and their source references.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info};
use rusqlite::types::Type;
use rusqlite::{
    params, Connection, ErrorCode, OpenFlags, OptionalExtension, Row, TransactionBehavior,
};

use crate::audio::metadata::AudioMetadata;
use crate::catalog::locks::{DigestGuard, DigestLocks};
use crate::catalog::model::{
    self, AudioIdentity, IdentityId, ImportMode, NewIdentity, SourceReference, TicketId,
};
use crate::catalog::queue::{self, ReplayQueue};
use crate::catalog::schema;
use crate::identity::acoustic::AcousticKey;
use crate::identity::digest::ExactDigest;
use crate::identity::resolver::CatalogView;
use crate::{CatalogError, Result};

const IDENTITY_COLUMNS: &str =
    "id, exact_digest, acoustic_bucket, acoustic_frames, acoustic_vector, metadata, created_at";

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// How long a commit waits on a locked database before giving up.
    pub busy_timeout: Duration,
    /// Number of per-digest lock stripes.
    pub lock_stripes: usize,
    /// Read-only connections serving lookups, so reads do not queue behind
    /// a commit. Zero sends every read through the write connection.
    pub read_connections: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            lock_stripes: num_cpus::get() * 4,
            read_connections: num_cpus::get(),
        }
    }
}

/// SQLite-backed catalog store.
///
/// Every insert and attach is a committed transaction with `synchronous = FULL`
/// before the call returns. The digest column is `UNIQUE`, so the one-record-
/// per-digest invariant holds across restarts as well as under the per-digest
/// locks.
///
/// Writes and the replay queue share one connection. Lookups on a file-backed
/// store go through a round-robin set of read-only connections; WAL lets them
/// read the last committed state while a write transaction is open.
pub struct CatalogStore {
    conn: Arc<Mutex<Connection>>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
    locks: DigestLocks,
    path: Option<PathBuf>,
}

impl CatalogStore {
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(options.busy_timeout)?;
        let journal: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::ensure_schema(&conn)?;

        let readers = (0..options.read_connections)
            .map(|_| open_reader(path, options.busy_timeout).map(Mutex::new))
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Opened catalog at {} (journal mode {}, {} readers)",
            path.display(),
            journal,
            readers.len()
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            readers,
            next_reader: AtomicUsize::new(0),
            locks: DigestLocks::new(options.lock_stripes),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::ensure_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            readers: Vec::new(),
            next_reader: AtomicUsize::new(0),
            locks: DigestLocks::new(StoreOptions::default().lock_stripes),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The replay queue living in the same database.
    pub fn replay_queue(&self) -> ReplayQueue {
        ReplayQueue::new(Arc::clone(&self.conn))
    }

    /// Enters the mutual-exclusion section for `digest`. Hold the guard across
    /// lookup and commit.
    pub fn lock_digest(&self, digest: &ExactDigest) -> DigestGuard<'_> {
        self.locks.lock(digest)
    }

    pub fn lookup_exact(&self, digest: &ExactDigest) -> Result<Option<AudioIdentity>> {
        let conn = self.reader();
        let identity = conn
            .query_row(
                &format!("SELECT {} FROM identities WHERE exact_digest = ?1", IDENTITY_COLUMNS),
                [digest.as_bytes().as_slice()],
                row_to_identity,
            )
            .optional()?;
        identity.map(|i| with_references(&conn, i)).transpose()
    }

    pub fn lookup_bucket(&self, bucket: u32) -> Result<Vec<AudioIdentity>> {
        self.lookup_buckets(bucket..=bucket)
    }

    pub fn lookup_buckets(&self, buckets: RangeInclusive<u32>) -> Result<Vec<AudioIdentity>> {
        let conn = self.reader();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM identities WHERE acoustic_bucket BETWEEN ?1 AND ?2 ORDER BY id",
            IDENTITY_COLUMNS
        ))?;
        let identities = stmt
            .query_map([*buckets.start(), *buckets.end()], row_to_identity)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        identities.into_iter().map(|i| with_references(&conn, i)).collect()
    }

    pub fn get(&self, id: IdentityId) -> Result<Option<AudioIdentity>> {
        let conn = self.reader();
        let identity = conn
            .query_row(
                &format!("SELECT {} FROM identities WHERE id = ?1", IDENTITY_COLUMNS),
                [id.0],
                row_to_identity,
            )
            .optional()?;
        identity.map(|i| with_references(&conn, i)).transpose()
    }

    /// Fails with [`CatalogError::Conflict`] if the digest is already present.
    pub fn insert_new(&self, identity: NewIdentity, reference: SourceReference) -> Result<AudioIdentity> {
        self.commit_new(identity, reference, None)
    }

    pub fn attach_reference(&self, existing_id: IdentityId, reference: SourceReference) -> Result<()> {
        self.commit_attach(existing_id, reference, None, None)
    }

    /// Inserts a new identity and, for replays, resolves the ticket in the
    /// same transaction.
    pub(crate) fn commit_new(
        &self,
        identity: NewIdentity,
        reference: SourceReference,
        ticket: Option<TicketId>,
    ) -> Result<AudioIdentity> {
        let metadata_json = serde_json::to_string(&identity.metadata)?;
        let created_at = Utc::now();

        let mut conn = self.connection();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let inserted = tx.execute(
            "INSERT INTO identities
                (exact_digest, acoustic_bucket, acoustic_frames, acoustic_vector, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                identity.exact_digest.as_bytes().as_slice(),
                identity.acoustic_key.as_ref().map(|k| k.bucket()),
                identity.acoustic_key.as_ref().map(|k| k.frames()),
                identity.acoustic_key.as_ref().map(|k| k.to_stored()),
                metadata_json,
                model::to_millis(&created_at),
            ],
        );
        if let Err(err) = inserted {
            return Err(map_digest_conflict(err, &identity.exact_digest));
        }
        let id = IdentityId(tx.last_insert_rowid());

        insert_reference(&tx, id, &reference)?;
        if let Some(ticket) = ticket {
            queue::resolve_ticket(&tx, ticket, Some(id))?;
        }
        tx.commit()?;

        info!("Catalogued {} as identity {}", identity.exact_digest, id);
        Ok(AudioIdentity {
            id,
            exact_digest: identity.exact_digest,
            acoustic_key: identity.acoustic_key,
            metadata: identity.metadata,
            created_at: model::from_millis(model::to_millis(&created_at)),
            references: vec![reference],
        })
    }

    /// Appends a reference and, when given, replaces the last-known metadata.
    /// Re-attaching an identical reference is a no-op.
    pub(crate) fn commit_attach(
        &self,
        existing_id: IdentityId,
        reference: SourceReference,
        metadata: Option<&AudioMetadata>,
        ticket: Option<TicketId>,
    ) -> Result<()> {
        let metadata_json = metadata.map(serde_json::to_string).transpose()?;

        let mut conn = self.connection();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists = tx
            .query_row("SELECT 1 FROM identities WHERE id = ?1", [existing_id.0], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Err(CatalogError::UnknownIdentity(existing_id));
        }

        let added = insert_reference(&tx, existing_id, &reference)?;
        if let Some(json) = metadata_json {
            tx.execute(
                "UPDATE identities SET metadata = ?1 WHERE id = ?2",
                params![json, existing_id.0],
            )?;
        }
        if let Some(ticket) = ticket {
            queue::resolve_ticket(&tx, ticket, Some(existing_id))?;
        }
        tx.commit()?;

        if added {
            info!("Attached {} to identity {}", reference.path.display(), existing_id);
        } else {
            debug!("{} already referenced by identity {}", reference.path.display(), existing_id);
        }
        Ok(())
    }

    pub fn identity_count(&self) -> Result<u64> {
        let count: i64 = self
            .reader()
            .query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Every identity with its references, ordered by id.
    pub fn snapshot(&self) -> Result<Vec<AudioIdentity>> {
        let conn = self.reader();
        let mut stmt = conn.prepare(&format!("SELECT {} FROM identities ORDER BY id", IDENTITY_COLUMNS))?;
        let identities = stmt
            .query_map([], row_to_identity)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        identities.into_iter().map(|i| with_references(&conn, i)).collect()
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reader(&self) -> MutexGuard<'_, Connection> {
        if self.readers.is_empty() {
            return self.connection();
        }
        let index = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        self.readers[index].lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn open_reader(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

impl CatalogView for CatalogStore {
    fn lookup_exact(&self, digest: &ExactDigest) -> Result<Option<AudioIdentity>> {
        CatalogStore::lookup_exact(self, digest)
    }

    fn lookup_buckets(&self, buckets: RangeInclusive<u32>) -> Result<Vec<AudioIdentity>> {
        CatalogStore::lookup_buckets(self, buckets)
    }
}

fn map_digest_conflict(err: rusqlite::Error, digest: &ExactDigest) -> CatalogError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            CatalogError::Conflict { digest: *digest }
        }
        _ => CatalogError::StoreUnavailable(err),
    }
}

/// Returns whether a new row was written.
fn insert_reference(conn: &Connection, id: IdentityId, reference: &SourceReference) -> Result<bool> {
    let path = reference.path.to_str().ok_or_else(|| {
        CatalogError::InvalidPath(format!("{} is not valid UTF-8", reference.path.display()))
    })?;
    let written = conn.execute(
        "INSERT OR IGNORE INTO source_references
            (identity_id, path, mtime, size, imported_at, kept_original, import_mode)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id.0,
            path,
            reference.mtime,
            reference.size as i64,
            model::to_millis(&reference.imported_at),
            reference.kept_original,
            reference.import_mode.as_str(),
        ],
    )?;
    Ok(written > 0)
}

fn conversion_error(column: usize, kind: Type, message: &'static str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, kind, message.into())
}

fn row_to_identity(row: &Row) -> rusqlite::Result<AudioIdentity> {
    let digest_bytes: Vec<u8> = row.get(1)?;
    let exact_digest = ExactDigest::from_slice(&digest_bytes)
        .ok_or_else(|| conversion_error(1, Type::Blob, "exact digest has the wrong length"))?;

    let frames: Option<u32> = row.get(3)?;
    let vector: Option<Vec<u8>> = row.get(4)?;
    let acoustic_key = match (vector, frames) {
        (Some(bytes), Some(frames)) => Some(
            AcousticKey::from_stored(&bytes, frames)
                .ok_or_else(|| conversion_error(4, Type::Blob, "malformed acoustic vector"))?,
        ),
        _ => None,
    };

    let metadata_json: String = row.get(5)?;
    let metadata = serde_json::from_str(&metadata_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    Ok(AudioIdentity {
        id: IdentityId(row.get(0)?),
        exact_digest,
        acoustic_key,
        metadata,
        created_at: model::from_millis(row.get(6)?),
        references: Vec::new(),
    })
}

fn with_references(conn: &Connection, mut identity: AudioIdentity) -> Result<AudioIdentity> {
    let mut stmt = conn.prepare(
        "SELECT path, mtime, size, imported_at, kept_original, import_mode
         FROM source_references WHERE identity_id = ?1 ORDER BY id",
    )?;
    identity.references = stmt
        .query_map([identity.id.0], |row| {
            let import_mode = ImportMode::from_db_str(&row.get::<_, String>(5)?)
                .ok_or_else(|| conversion_error(5, Type::Text, "unknown import mode"))?;
            Ok(SourceReference {
                path: PathBuf::from(row.get::<_, String>(0)?),
                mtime: row.get(1)?,
                size: row.get::<_, i64>(2)? as u64,
                imported_at: model::from_millis(row.get(3)?),
                kept_original: row.get(4)?,
                import_mode,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(identity)
}
