//! Caller-facing entry point tying the store, replay queue and import
//! pipeline together.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::audio::provider::FingerprintProvider;
use crate::catalog::model::{CatalogTicket, TicketId};
use crate::catalog::queue::ReplayQueue;
use crate::catalog::store::{CatalogStore, StoreOptions};
use crate::import::cancel::CancelToken;
use crate::import::outcome::{BatchResult, ImportFailure, ImportResult, TicketReport};
use crate::import::pipeline::{ImportPipeline, ImportPolicy, ImportRequest, DEFAULT_DECODE_TIMEOUT};
use crate::utils::parallel::ParallelProcessor;
use crate::Result;

pub use crate::import::outcome::ExistenceVerdict;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Upper bound on one provider call. Longer decodes fail the import with
    /// a timeout.
    pub decode_timeout: Duration,
    pub store: StoreOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            decode_timeout: DEFAULT_DECODE_TIMEOUT,
            store: StoreOptions::default(),
        }
    }
}

pub struct AudioFs {
    pipeline: ImportPipeline,
    queue: ReplayQueue,
}

impl ParallelProcessor for AudioFs {}

impl AudioFs {
    pub fn open(
        catalog_path: impl AsRef<Path>,
        provider: Arc<dyn FingerprintProvider>,
        options: EngineOptions,
    ) -> Result<Self> {
        let store = CatalogStore::open(catalog_path, options.store.clone())?;
        Ok(Self::with_store(store, provider, options.decode_timeout))
    }

    pub fn with_store(
        store: CatalogStore,
        provider: Arc<dyn FingerprintProvider>,
        decode_timeout: Duration,
    ) -> Self {
        let queue = store.replay_queue();
        Self {
            pipeline: ImportPipeline::new(Arc::new(store), provider, decode_timeout),
            queue,
        }
    }

    pub fn store(&self) -> &CatalogStore {
        self.pipeline.store()
    }

    pub fn queue(&self) -> &ReplayQueue {
        &self.queue
    }

    pub fn pipeline(&self) -> &ImportPipeline {
        &self.pipeline
    }

    /// Imports one file. The original is deleted after a successful commit
    /// unless `keep_original` is set.
    pub fn import(&self, path: impl AsRef<Path>, keep_original: bool, careful: bool) -> ImportResult {
        let policy = ImportPolicy { keep_original, careful };
        self.pipeline.run(ImportRequest::new(path.as_ref(), policy))
    }

    /// Like [`AudioFs::import`], abandoned at the next stage boundary once
    /// `token` is cancelled before the commit point.
    pub fn import_cancellable(
        &self,
        path: impl AsRef<Path>,
        keep_original: bool,
        careful: bool,
        token: &CancelToken,
    ) -> ImportResult {
        let policy = ImportPolicy { keep_original, careful };
        self.pipeline
            .run(ImportRequest::new(path.as_ref(), policy).with_cancel(token))
    }

    /// Records `path` for a later [`AudioFs::import_catalog`]. The file is not
    /// read.
    pub fn add_to_catalog(&self, path: impl AsRef<Path>) -> Result<TicketId> {
        Ok(self.queue.add(path)?.id)
    }

    /// Replays every pending ticket through the full pipeline in parallel.
    /// A ticket is resolved in the same transaction as its commit; failed
    /// tickets stay pending and are listed in the result.
    pub fn import_catalog(&self, keep_original: bool, careful: bool) -> Result<BatchResult> {
        let tickets = self.queue.pending_tickets().collect::<Result<Vec<CatalogTicket>>>()?;
        if tickets.is_empty() {
            info!("No pending catalog tickets");
            return Ok(BatchResult::default());
        }
        info!("Replaying {} catalog tickets", tickets.len());

        let policy = ImportPolicy { keep_original, careful };
        let reports = Self::process_with_progress("Catalog replay", tickets, |ticket| {
            let result = self.pipeline.run(ImportRequest::replay(&ticket, policy));
            TicketReport { ticket, result }
        });

        let batch = BatchResult { reports };
        let failed = batch.failure_count();
        if failed > 0 {
            warn!("{} of {} catalog tickets failed", failed, batch.total());
        }
        Ok(batch)
    }

    /// Read-only: reports whether the content is already catalogued without
    /// taking locks or writing anything.
    pub fn exists(&self, path: impl AsRef<Path>, careful: bool) -> std::result::Result<ExistenceVerdict, ImportFailure> {
        self.pipeline.check(path.as_ref(), careful)
    }
}
