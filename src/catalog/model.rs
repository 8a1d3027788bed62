use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::audio::metadata::AudioMetadata;
use crate::identity::acoustic::AcousticKey;
use crate::identity::digest::ExactDigest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IdentityId(pub i64);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TicketId(pub i64);

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ticket-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ImportMode {
    Full,
    CatalogOnly,
}

impl ImportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportMode::Full => "full",
            ImportMode::CatalogOnly => "catalog_only",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "full" => Some(ImportMode::Full),
            "catalog_only" => Some(ImportMode::CatalogOnly),
            _ => None,
        }
    }
}

/// Where a piece of content was seen. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReference {
    pub path: PathBuf,
    /// Modification time in seconds since the epoch.
    pub mtime: i64,
    pub size: u64,
    pub imported_at: DateTime<Utc>,
    pub kept_original: bool,
    pub import_mode: ImportMode,
}

impl SourceReference {
    pub fn from_file(
        path: impl Into<PathBuf>,
        file_metadata: &fs::Metadata,
        kept_original: bool,
        import_mode: ImportMode,
    ) -> Self {
        let mtime = file_metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self {
            path: path.into(),
            mtime,
            size: file_metadata.len(),
            imported_at: Utc::now(),
            kept_original,
            import_mode,
        }
    }

    /// References are unique by path, mtime and size.
    pub fn same_source(&self, other: &SourceReference) -> bool {
        self.path == other.path && self.mtime == other.mtime && self.size == other.size
    }
}

/// An identity that has not been written to the store yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewIdentity {
    pub exact_digest: ExactDigest,
    pub acoustic_key: Option<AcousticKey>,
    pub metadata: AudioMetadata,
}

/// One distinct audio content.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioIdentity {
    pub id: IdentityId,
    pub exact_digest: ExactDigest,
    pub acoustic_key: Option<AcousticKey>,
    pub metadata: AudioMetadata,
    pub created_at: DateTime<Utc>,
    pub references: Vec<SourceReference>,
}

impl AudioIdentity {
    pub fn has_reference(&self, path: impl AsRef<Path>) -> bool {
        self.references.iter().any(|r| r.path == path.as_ref())
    }
}

/// Deferred import recorded by a catalog-only action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTicket {
    pub id: TicketId,
    pub path: PathBuf,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl CatalogTicket {
    pub fn pending(&self) -> bool {
        self.resolved_at.is_none()
    }
}

pub(crate) fn to_millis(at: &DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}
