//! Outbound interface for the API layer: trigger a run, poll progress, read
//! the cache.
//!
//! At most one run is active per process. The in-process guard is an
//! [`AtomicBool`] released by an RAII guard, so a failing or panicking run
//! never leaves it stuck. Across processes, a non-terminal progress record
//! that is still being refreshed also blocks a new run; a record that has gone
//! quiet for longer than `ingest.stale_after_secs` is treated as a dead run
//! and superseded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::ingest::Ingestor;
use crate::models::{DocumentCache, FolderRef, IngestionProgress, RunReport};
use crate::progress::is_stale;

/// Handle to a run started in the background.
pub struct RunHandle {
    pub run_id: String,
    join: JoinHandle<Result<RunReport>>,
}

impl RunHandle {
    /// Wait for the run to finish. Dropping the handle instead detaches it.
    pub async fn wait(self) -> Result<RunReport> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(IngestError::Upstream(format!("ingestion task aborted: {}", e))),
        }
    }
}

pub enum TriggerOutcome {
    Accepted(RunHandle),
    AlreadyRunning,
}

struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct IngestionService {
    ingestor: Arc<Ingestor>,
    running: Arc<AtomicBool>,
    stale_after: Duration,
}

impl IngestionService {
    pub fn new(ingestor: Ingestor, config: &IngestConfig) -> Self {
        Self {
            ingestor: Arc::new(ingestor),
            running: Arc::new(AtomicBool::new(false)),
            stale_after: config.stale_after(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start a run in the background and return immediately.
    pub fn trigger(&self, folder: FolderRef) -> Result<TriggerOutcome> {
        let guard = match self.acquire(false) {
            Ok(guard) => guard,
            Err(IngestError::AlreadyRunning) => return Ok(TriggerOutcome::AlreadyRunning),
            Err(e) => return Err(e),
        };

        let run_id = Uuid::new_v4().to_string();
        let ingestor = self.ingestor.clone();
        let id = run_id.clone();
        let join = tokio::spawn(async move {
            let _guard = guard;
            ingestor.run_with_id(&id, &folder).await
        });

        info!(run_id = %run_id, "ingestion run accepted");
        Ok(TriggerOutcome::Accepted(RunHandle { run_id, join }))
    }

    /// Run in the foreground. `force` ignores a non-stale in-flight record
    /// left by another process.
    pub async fn run_blocking(&self, folder: &FolderRef, force: bool) -> Result<RunReport> {
        let _guard = self.acquire(force)?;
        self.ingestor.run(folder).await
    }

    pub fn get_progress(&self) -> Result<Option<IngestionProgress>> {
        self.ingestor.progress_tracker().get()
    }

    pub fn get_cache(&self) -> Result<Option<DocumentCache>> {
        self.ingestor.cache_store().load_existing()
    }

    fn acquire(&self, force: bool) -> Result<RunGuard> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(IngestError::AlreadyRunning);
        }
        let guard = RunGuard(self.running.clone());

        let previous = match self.ingestor.progress_tracker().get() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "unreadable progress record, starting a new run over it");
                None
            }
        };
        if let Some(p) = previous.filter(|p| !p.done) {
            if force {
                warn!(run_id = %p.run_id, "forcing a new run over an in-flight record");
            } else if is_stale(&p, self.stale_after, Utc::now()) {
                warn!(run_id = %p.run_id, updated_at = %p.updated_at, "superseding stale run");
            } else {
                return Err(IngestError::AlreadyRunning);
            }
        }
        Ok(guard)
    }
}
