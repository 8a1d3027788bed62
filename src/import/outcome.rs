use std::path::PathBuf;

use crate::catalog::model::{CatalogTicket, IdentityId};
use crate::identity::digest::ExactDigest;
use crate::identity::resolver::{Resolution, Verdict};
use crate::{CatalogError, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitAction {
    /// A new identity was created.
    Inserted,
    /// The reference was attached to an existing identity.
    Attached,
}

impl CommitAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitAction::Inserted => "inserted",
            CommitAction::Attached => "attached",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportWarning {
    /// Several perceptual matches were too close to call; imported as new.
    AmbiguousMatch(Vec<IdentityId>),
    /// The file had no fingerprint, so careful matching ran exact-only.
    CarefulDegraded,
    /// The commit succeeded but the original could not be deleted.
    OriginalNotRemoved(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommittedImport {
    pub path: PathBuf,
    pub identity_id: IdentityId,
    pub exact_digest: ExactDigest,
    pub verdict: Verdict,
    pub action: CommitAction,
    pub original_removed: bool,
    pub warnings: Vec<ImportWarning>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportOutcome {
    Committed(CommittedImport),
    /// Policy veto: nothing was written and the file was left alone.
    Rejected { path: PathBuf, reason: String },
}

impl ImportOutcome {
    pub fn committed(&self) -> Option<&CommittedImport> {
        match self {
            ImportOutcome::Committed(c) => Some(c),
            ImportOutcome::Rejected { .. } => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("import of {} failed at stage {}: {}", .path.display(), .stage, .error)]
pub struct ImportFailure {
    pub path: PathBuf,
    pub stage: Stage,
    #[source]
    pub error: CatalogError,
}

pub type ImportResult = std::result::Result<ImportOutcome, ImportFailure>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchKind {
    Exact,
    Perceptual { similarity: f64 },
    Ambiguous { candidates: usize },
}

/// Answer of a read-only existence check.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistenceVerdict {
    pub path: PathBuf,
    pub exact_digest: ExactDigest,
    pub resolution: Resolution,
}

impl ExistenceVerdict {
    pub fn exists(&self) -> bool {
        self.match_kind().is_some()
    }

    pub fn match_kind(&self) -> Option<MatchKind> {
        match &self.resolution.verdict {
            Verdict::New => None,
            Verdict::ExactDuplicate(_) => Some(MatchKind::Exact),
            Verdict::PerceptualDuplicate { similarity, .. } => {
                Some(MatchKind::Perceptual { similarity: *similarity })
            }
            Verdict::Ambiguous(candidates) => Some(MatchKind::Ambiguous { candidates: candidates.len() }),
        }
    }
}

#[derive(Debug)]
pub struct TicketReport {
    pub ticket: CatalogTicket,
    pub result: ImportResult,
}

/// Result of replaying the catalog. Individual ticket failures do not fail the
/// batch; they are listed here instead.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub reports: Vec<TicketReport>,
}

impl BatchResult {
    pub fn total(&self) -> usize {
        self.reports.len()
    }

    pub fn committed(&self) -> impl Iterator<Item = (&CatalogTicket, &CommittedImport)> {
        self.reports.iter().filter_map(|r| match &r.result {
            Ok(ImportOutcome::Committed(c)) => Some((&r.ticket, c)),
            _ => None,
        })
    }

    pub fn rejected(&self) -> impl Iterator<Item = &TicketReport> {
        self.reports
            .iter()
            .filter(|r| matches!(r.result, Ok(ImportOutcome::Rejected { .. })))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&CatalogTicket, &ImportFailure)> {
        self.reports.iter().filter_map(|r| match &r.result {
            Err(failure) => Some((&r.ticket, failure)),
            Ok(_) => None,
        })
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// Converts a batch with failures into [`CatalogError::BatchPartialFailure`]
    /// for callers that treat any failed ticket as an error.
    pub fn ensure_complete(&self) -> crate::Result<()> {
        let failed = self.failure_count();
        if failed > 0 {
            return Err(CatalogError::BatchPartialFailure { failed, total: self.total() });
        }
        Ok(())
    }
}
