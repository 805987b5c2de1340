//! Ingestion pipeline orchestration.
//!
//! Coordinates one run: folder resolution → full listing → change detection
//! against the cache → fetch + extract + summarize for changed files only →
//! merge by id → atomic save. Progress is persisted after every page and every
//! file so an external poller can follow the run.
//!
//! Per-file problems (download, extraction, generation) are contained at the
//! file boundary. Only folder resolution, listing, and the final save can fail
//! a run, and none of them leave a partially written cache behind.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::{self, CacheStore, ChangeSet};
use crate::config::Config;
use crate::connector_drive::{DriveAuth, DriveConnector};
use crate::error::{IngestError, Result};
use crate::extract::{Extraction, Extractor};
use crate::generation::{create_generator, TextGenerator};
use crate::models::{DocumentSummary, FolderRef, RemoteFile, RunPhase, RunReport};
use crate::progress::{
    FileDone, NoProgress, ProgressTracker, ProgressUpdate, SyncProgressEvent, SyncProgressReporter,
};
use crate::summarize::{FileMetadata, Summarizer};
use crate::traits::{ContentFetcher, FileLister};

/// External collaborators injected into an [`Ingestor`].
pub struct Collaborators {
    pub lister: Arc<dyn FileLister>,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub generator: Arc<dyn TextGenerator>,
    pub extractor: Extractor,
}

impl Collaborators {
    /// Production wiring: Drive for listing and content, the configured
    /// summarizer provider, and the default extractor table.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let drive = Arc::new(DriveConnector::new(
            config.drive.clone(),
            DriveAuth::from_env()?,
        )?);
        Ok(Self {
            lister: drive.clone(),
            fetcher: drive,
            generator: create_generator(&config.summarizer)?,
            extractor: Extractor::default(),
        })
    }
}

pub struct Ingestor {
    lister: Arc<dyn FileLister>,
    fetcher: Arc<dyn ContentFetcher>,
    extractor: Arc<Extractor>,
    summarizer: Summarizer,
    cache: CacheStore,
    progress: Arc<ProgressTracker>,
    reporter: Box<dyn SyncProgressReporter>,
    concurrency: usize,
    prune_missing: bool,
    fetch_retry_delay: Duration,
}

/// What happened to one changed file.
enum FileOutcome {
    Summarized {
        doc: DocumentSummary,
        soft_failure: bool,
    },
    /// Content could not be downloaded; the cached entry (if any) is kept
    /// and the file is picked up again next run.
    FetchFailed,
}

impl Ingestor {
    pub fn new(config: &Config, collaborators: Collaborators, progress: Arc<ProgressTracker>) -> Self {
        Self {
            lister: collaborators.lister,
            fetcher: collaborators.fetcher,
            extractor: Arc::new(collaborators.extractor),
            summarizer: Summarizer::new(collaborators.generator, &config.summarizer),
            cache: CacheStore::new(config.storage.cache_path.clone()),
            progress,
            reporter: Box::new(NoProgress),
            concurrency: config.ingest.concurrency.max(1),
            prune_missing: config.ingest.prune_missing,
            fetch_retry_delay: Duration::from_millis(config.ingest.fetch_retry_delay_ms),
        }
    }

    pub fn with_reporter(mut self, reporter: Box<dyn SyncProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn cache_store(&self) -> &CacheStore {
        &self.cache
    }

    pub fn progress_tracker(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    /// Execute one run under a fresh run id.
    pub async fn run(&self, folder: &FolderRef) -> Result<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        self.run_with_id(&run_id, folder).await
    }

    pub async fn run_with_id(&self, run_id: &str, folder: &FolderRef) -> Result<RunReport> {
        info!(run_id, %folder, "ingestion run started");
        self.progress.begin_run(run_id, &folder.to_string())?;

        let result = self.execute(run_id, folder).await;

        let terminal_error = result.as_ref().err().map(|e| e.to_string());
        if let Err(e) = self.progress.finish(terminal_error) {
            warn!(run_id, error = %e, "failed to mark progress terminal");
        }

        match &result {
            Ok(report) => info!(
                run_id,
                listed = report.listed,
                changed = report.changed,
                summarized = report.summarized,
                soft_failures = report.soft_failures,
                fetch_failures = report.fetch_failures,
                pruned = report.pruned,
                "ingestion run finished"
            ),
            Err(e) => error!(run_id, error = %e, "ingestion run failed"),
        }
        result
    }

    async fn execute(&self, run_id: &str, folder: &FolderRef) -> Result<RunReport> {
        let folder_id = resolve_folder(self.lister.as_ref(), folder).await?;
        let mut loaded = self.cache.load()?;

        let files = self.list_all(&folder_id).await?;
        let listed = files.len();
        let listed_ids: HashSet<String> = files.iter().map(|f| f.id.clone()).collect();

        let ChangeSet { changed, unchanged } = cache::partition(&loaded, files);
        let total = changed.len();
        debug!(run_id, changed = total, unchanged = unchanged.len(), "change set computed");
        self.progress_update(ProgressUpdate {
            phase: Some(RunPhase::Processing),
            total: Some(total),
            skipped: Some(unchanged.len()),
            ..Default::default()
        });

        let processed = AtomicUsize::new(0);
        let outcomes: Vec<FileOutcome> = stream::iter(changed)
            .map(|file| self.process_file(file, total, &processed))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = RunReport {
            run_id: run_id.to_string(),
            listed,
            changed: total,
            unchanged: unchanged.len(),
            ..Default::default()
        };
        let mut fresh = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                FileOutcome::Summarized { doc, soft_failure } => {
                    report.summarized += 1;
                    if soft_failure {
                        report.soft_failures += 1;
                    }
                    fresh.push(doc);
                }
                FileOutcome::FetchFailed => report.fetch_failures += 1,
            }
        }

        self.progress_update(ProgressUpdate {
            phase: Some(RunPhase::Saving),
            ..Default::default()
        });

        if self.prune_missing {
            let removed = cache::prune(&mut loaded, &listed_ids);
            if !removed.is_empty() {
                info!(run_id, count = removed.len(), "pruned documents missing from listing");
            }
            report.pruned = removed.len();
        }
        let mut merged = cache::merge(loaded, fresh);
        self.cache.save(&mut merged)?;

        Ok(report)
    }

    /// Walk every listing page, publishing the page cursor as we go.
    async fn list_all(&self, folder_id: &str) -> Result<Vec<RemoteFile>> {
        let on_page = |page: u32, files: usize| {
            debug!(page, files, "listing page fetched");
            self.progress_update(ProgressUpdate {
                current_page: Some(page),
                ..Default::default()
            });
            self.reporter
                .report(SyncProgressEvent::Listing { page, files });
        };
        self.lister
            .list_files(folder_id, &on_page)
            .await
            .map_err(|e| IngestError::Upstream(format!("{:#}", e)))
    }

    async fn process_file(&self, file: RemoteFile, total: usize, processed: &AtomicUsize) -> FileOutcome {
        let (outcome, downloaded) = match self.fetch_with_retry(&file).await {
            Ok(bytes) => {
                let downloaded = bytes.len() as u64;
                (self.summarize_file(&file, bytes).await, downloaded)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                warn!(file = %file.name, id = %file.id, error = %message, "content download failed, keeping cached entry");
                (FileOutcome::FetchFailed, 0)
            }
        };
        let failed = !matches!(
            outcome,
            FileOutcome::Summarized {
                soft_failure: false,
                ..
            }
        );

        let n = processed.fetch_add(1, Ordering::SeqCst) + 1;
        self.progress_update(ProgressUpdate {
            file_done: Some(FileDone {
                name: file.name.clone(),
                downloaded_bytes: downloaded,
                failed,
            }),
            ..Default::default()
        });
        self.reporter.report(SyncProgressEvent::Processing {
            n,
            total,
            file: file.name,
        });

        outcome
    }

    async fn summarize_file(&self, file: &RemoteFile, bytes: Vec<u8>) -> FileOutcome {
        let downloaded = bytes.len() as u64;
        let extraction = self.extract(bytes, &file.content_type).await;
        if let Extraction::Unsupported { reason } = &extraction {
            info!(file = %file.name, reason = %reason, "no text extracted, summarizing from metadata");
        }

        let meta = FileMetadata {
            filename: file.name.clone(),
            content_type: file.content_type.clone(),
            modified_time: file.modified_time,
            size_bytes: file.size_bytes.or(Some(downloaded)),
        };
        let summary = self.summarizer.summarize(extraction.text(), &meta).await;

        FileOutcome::Summarized {
            doc: DocumentSummary {
                id: file.id.clone(),
                filename: file.name.clone(),
                content_type: file.content_type.clone(),
                modified_time: file.modified_time,
                summary: summary.summary,
                size_bytes: meta.size_bytes,
                summarized_at: Utc::now(),
            },
            soft_failure: summary.failed,
        }
    }

    /// Download content, retrying once after a short delay.
    async fn fetch_with_retry(&self, file: &RemoteFile) -> anyhow::Result<Vec<u8>> {
        match self.fetcher.fetch_content(file).await {
            Ok(bytes) => Ok(bytes),
            Err(first) => {
                debug!(file = %file.name, error = %first, "download failed, retrying once");
                tokio::time::sleep(self.fetch_retry_delay).await;
                self.fetcher.fetch_content(file).await
            }
        }
    }

    /// Run extraction off the async executor; PDF parsing is CPU-bound.
    async fn extract(&self, bytes: Vec<u8>, content_type: &str) -> Extraction {
        let extractor = self.extractor.clone();
        let content_type = content_type.to_string();
        tokio::task::spawn_blocking(move || extractor.extract(&bytes, &content_type))
            .await
            .unwrap_or_else(|e| Extraction::Unsupported {
                reason: format!("extraction task failed: {}", e),
            })
    }

    /// Progress writes are best-effort during a run.
    fn progress_update(&self, update: ProgressUpdate) {
        if let Err(e) = self.progress.update(update) {
            warn!(error = %e, "failed to persist progress");
        }
    }
}

/// Turn a [`FolderRef`] into a folder id. A name must match exactly one folder.
pub async fn resolve_folder(lister: &dyn FileLister, folder: &FolderRef) -> Result<String> {
    match folder {
        FolderRef::Id(id) => Ok(id.clone()),
        FolderRef::Name(name) => {
            let ids = lister
                .resolve_folder(name)
                .await
                .map_err(|e| IngestError::Upstream(format!("folder lookup failed: {:#}", e)))?;
            match ids.as_slice() {
                [id] => Ok(id.clone()),
                [] => Err(IngestError::NotFound(format!("no folder named '{}'", name))),
                many => Err(IngestError::NotFound(format!(
                    "folder name '{}' is ambiguous: {} folders match",
                    name,
                    many.len()
                ))),
            }
        }
    }
}
