use std::fmt;
use serde::Serialize;

pub mod audio;
pub mod catalog;
pub mod cli;
pub mod engine;
pub mod identity;
pub mod import;
pub mod utils;

use catalog::model::{IdentityId, TicketId};
use identity::digest::ExactDigest;

/// Pipeline stage an import reached. Failures carry the stage they occurred at
/// so callers can tell "never touched" from "committed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    Started,
    Fingerprinted,
    Resolved,
    Committed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Started => "started",
            Stage::Fingerprinted => "fingerprinted",
            Stage::Resolved => "resolved",
            Stage::Committed => "committed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Decode error: {0}")]
    Decode(#[from] audio::provider::DecodeError),
    #[error("Exact digest {digest} is already catalogued")]
    Conflict { digest: ExactDigest },
    #[error("Catalog store unavailable: {0}")]
    StoreUnavailable(#[source] rusqlite::Error),
    #[error("Catalog schema version {found} is newer than supported version {supported}")]
    IncompatibleSchema { found: i64, supported: i64 },
    #[error("Unknown identity: {0}")]
    UnknownIdentity(IdentityId),
    #[error("Unknown catalog ticket: {0}")]
    UnknownTicket(TicketId),
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("Import cancelled")]
    Cancelled,
    #[error("{failed} of {total} catalog tickets failed to import")]
    BatchPartialFailure { failed: usize, total: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Metadata serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<rusqlite::Error> for CatalogError {
    fn from(err: rusqlite::Error) -> Self {
        CatalogError::StoreUnavailable(err)
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;

// Re-exports for convenience
pub use audio::metadata::AudioMetadata;
pub use audio::provider::{AnalyzedAudio, DecodeError, FingerprintProvider};
pub use audio::symphonia_provider::SymphoniaProvider;
pub use catalog::queue::ReplayQueue;
pub use catalog::store::{CatalogStore, StoreOptions};
pub use engine::{AudioFs, EngineOptions, ExistenceVerdict};
pub use identity::resolver::{Resolution, Verdict};
pub use import::cancel::{CancelOutcome, CancelToken};
pub use import::outcome::{BatchResult, ImportFailure, ImportOutcome, ImportResult};
pub use import::pipeline::{ImportPipeline, ImportPolicy};
