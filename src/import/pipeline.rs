//! The import state machine: Started, Fingerprinted, Resolved, Committed.
//!
//! Nothing becomes visible in the catalog before the single commit
//! transaction, and an original is only deleted after that transaction
//! succeeded.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::audio::metadata::AudioMetadata;
use crate::audio::provider::{AnalyzedAudio, DecodeError, FingerprintProvider};
use crate::catalog::model::{CatalogTicket, ImportMode, NewIdentity, SourceReference, TicketId};
use crate::catalog::store::CatalogStore;
use crate::identity::acoustic::AcousticKey;
use crate::identity::digest::ExactDigest;
use crate::identity::resolver::{self, Resolution, Verdict};
use crate::import::cancel::CancelToken;
use crate::import::outcome::{
    CommitAction, CommittedImport, ExistenceVerdict, ImportFailure, ImportOutcome, ImportResult,
    ImportWarning,
};
use crate::utils::file_ops;
use crate::{CatalogError, Stage};

pub const DEFAULT_DECODE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportPolicy {
    pub keep_original: bool,
    pub careful: bool,
}

impl Default for ImportPolicy {
    fn default() -> Self {
        Self { keep_original: true, careful: true }
    }
}

/// One import to run through the pipeline.
#[derive(Debug, Clone)]
pub struct ImportRequest<'a> {
    pub path: &'a Path,
    pub policy: ImportPolicy,
    pub mode: ImportMode,
    /// Set for catalog replays; the ticket is resolved in the commit
    /// transaction.
    pub ticket: Option<TicketId>,
    pub cancel: Option<&'a CancelToken>,
}

impl<'a> ImportRequest<'a> {
    pub fn new(path: &'a Path, policy: ImportPolicy) -> Self {
        Self { path, policy, mode: ImportMode::Full, ticket: None, cancel: None }
    }

    pub fn replay(ticket: &'a CatalogTicket, policy: ImportPolicy) -> Self {
        Self {
            path: &ticket.path,
            policy,
            mode: ImportMode::CatalogOnly,
            ticket: Some(ticket.id),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: &'a CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// What the pipeline learned about a file before touching the catalog. The
/// decoded PCM is gone by now.
struct Probe {
    file_metadata: fs::Metadata,
    metadata: AudioMetadata,
    digest: ExactDigest,
    acoustic_key: Option<AcousticKey>,
}

enum Started {
    Ready(fs::Metadata),
    Rejected(String),
}

/// Stateless driver of single imports. Cloning is cheap; every clone shares
/// the same store and provider.
#[derive(Clone)]
pub struct ImportPipeline {
    store: Arc<CatalogStore>,
    provider: Arc<dyn FingerprintProvider>,
    decode_timeout: Duration,
}

impl ImportPipeline {
    pub fn new(
        store: Arc<CatalogStore>,
        provider: Arc<dyn FingerprintProvider>,
        decode_timeout: Duration,
    ) -> Self {
        Self { store, provider, decode_timeout }
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    pub fn run(&self, request: ImportRequest<'_>) -> ImportResult {
        let path = request.path;
        let fail = |stage: Stage, error: CatalogError| ImportFailure {
            path: path.to_path_buf(),
            stage,
            error,
        };

        debug!("{}: {}", path.display(), Stage::Started);
        let file_metadata = match start(path).map_err(|e| fail(Stage::Started, e))? {
            Started::Ready(m) => m,
            Started::Rejected(reason) => {
                info!("Rejected {}: {}", path.display(), reason);
                return Ok(ImportOutcome::Rejected { path: path.to_path_buf(), reason });
            }
        };
        check_cancelled(request.cancel).map_err(|e| fail(Stage::Started, e))?;

        let probe = self
            .fingerprint(path, file_metadata)
            .map_err(|e| fail(Stage::Fingerprinted, e))?;
        debug!("{}: {} as {}", path.display(), Stage::Fingerprinted, probe.digest);
        check_cancelled(request.cancel).map_err(|e| fail(Stage::Fingerprinted, e))?;

        // Held from lookup to commit so concurrent imports of the same
        // content serialize.
        let guard = self.store.lock_digest(&probe.digest);
        let resolution = resolver::resolve(
            &probe.digest,
            probe.acoustic_key.as_ref(),
            &*self.store,
            request.policy.careful,
        )
        .map_err(|e| fail(Stage::Resolved, e))?;
        debug!("{}: {} ({})", path.display(), Stage::Resolved, resolution.verdict.label());

        let mut warnings = Vec::new();
        if resolution.careful_degraded {
            warnings.push(ImportWarning::CarefulDegraded);
        }
        if let Verdict::Ambiguous(candidates) = &resolution.verdict {
            warn!(
                "{} is ambiguous between {} identities, importing as new",
                path.display(),
                candidates.len()
            );
            warnings.push(ImportWarning::AmbiguousMatch(candidates.iter().map(|c| c.id).collect()));
        }

        if let Some(token) = request.cancel {
            if !token.enter_commit() {
                return Err(fail(Stage::Resolved, CatalogError::Cancelled));
            }
        }

        // The transaction rolled back, so the import may be cancelled again.
        let commit_failed = |stage: Stage, error: CatalogError| {
            if let Some(token) = request.cancel {
                token.commit_failed();
            }
            fail(stage, error)
        };

        let Probe { file_metadata, metadata, digest, acoustic_key } = probe;
        let reference = SourceReference::from_file(
            path,
            &file_metadata,
            request.policy.keep_original,
            request.mode,
        );
        let (identity_id, action) = match resolution.verdict.matched_identity() {
            Some(existing) => {
                self.store
                    .commit_attach(existing, reference, Some(&metadata), request.ticket)
                    .map_err(|e| commit_failed(Stage::Committed, e))?;
                (existing, CommitAction::Attached)
            }
            None => {
                let identity = NewIdentity { exact_digest: digest, acoustic_key, metadata };
                let created = self
                    .store
                    .commit_new(identity, reference, request.ticket)
                    .map_err(|e| commit_failed(Stage::Committed, e))?;
                (created.id, CommitAction::Inserted)
            }
        };
        drop(guard);
        info!("{}: {} to {} ({})", path.display(), Stage::Committed, identity_id, action.as_str());

        let mut original_removed = false;
        if !request.policy.keep_original {
            match file_ops::remove_original(path) {
                Ok(()) => original_removed = true,
                Err(e) => {
                    warn!("Committed {} but could not remove it: {}", path.display(), e);
                    warnings.push(ImportWarning::OriginalNotRemoved(e.to_string()));
                }
            }
        }

        Ok(ImportOutcome::Committed(CommittedImport {
            path: path.to_path_buf(),
            identity_id,
            exact_digest: digest,
            verdict: resolution.verdict,
            action,
            original_removed,
            warnings,
        }))
    }

    /// Runs the first three stages without locking or writing anything.
    pub fn check(&self, path: &Path, careful: bool) -> Result<ExistenceVerdict, ImportFailure> {
        let fail = |stage: Stage, error: CatalogError| ImportFailure {
            path: path.to_path_buf(),
            stage,
            error,
        };

        let file_metadata = match start(path).map_err(|e| fail(Stage::Started, e))? {
            Started::Ready(m) => m,
            Started::Rejected(reason) => {
                return Err(fail(Stage::Started, CatalogError::InvalidPath(format!("{}: {}", path.display(), reason))));
            }
        };
        let probe = self
            .fingerprint(path, file_metadata)
            .map_err(|e| fail(Stage::Fingerprinted, e))?;
        let resolution: Resolution =
            resolver::resolve(&probe.digest, probe.acoustic_key.as_ref(), &*self.store, careful)
                .map_err(|e| fail(Stage::Resolved, e))?;

        Ok(ExistenceVerdict {
            path: path.to_path_buf(),
            exact_digest: probe.digest,
            resolution,
        })
    }

    fn fingerprint(&self, path: &Path, file_metadata: fs::Metadata) -> crate::Result<Probe> {
        let AnalyzedAudio { metadata, fingerprint, seed } = self.analyze_with_timeout(path)?;
        let digest = seed.digest();
        drop(seed);
        let acoustic_key = fingerprint.as_ref().and_then(AcousticKey::from_fingerprint);
        Ok(Probe { file_metadata, metadata, digest, acoustic_key })
    }

    /// The provider runs on its own thread. On timeout that thread is left to
    /// finish in the background and its result is dropped.
    fn analyze_with_timeout(&self, path: &Path) -> Result<AnalyzedAudio, DecodeError> {
        let (tx, rx) = mpsc::channel();
        let provider = Arc::clone(&self.provider);
        let owned: PathBuf = path.to_path_buf();
        thread::Builder::new()
            .name("audiofs-decode".into())
            .spawn(move || {
                let _ = tx.send(provider.analyze(&owned));
            })
            .map_err(|e| DecodeError::Unreadable(format!("could not start decoder: {}", e)))?;

        match rx.recv_timeout(self.decode_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!("Decoding {} exceeded {:?}", path.display(), self.decode_timeout);
                Err(DecodeError::Timeout(self.decode_timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(DecodeError::Corrupt("decoder stopped without a result".into()))
            }
        }
    }
}

/// Catalog paths are stored as text, so a path that is not valid UTF-8 is
/// refused before any work is done.
fn start(path: &Path) -> crate::Result<Started> {
    if path.to_str().is_none() {
        return Err(CatalogError::InvalidPath(format!("{} is not valid UTF-8", path.display())));
    }
    let file_metadata = fs::metadata(path)?;
    Ok(match file_ops::rejection_reason(&file_metadata) {
        Some(reason) => Started::Rejected(reason),
        None => Started::Ready(file_metadata),
    })
}

fn check_cancelled(token: Option<&CancelToken>) -> crate::Result<()> {
    match token {
        Some(t) if t.is_cancelled() => Err(CatalogError::Cancelled),
        _ => Ok(()),
    }
}
