//! Ingestion progress: the persisted record and live reporters.
//!
//! [`ProgressTracker`] owns the single JSON progress record that pollers read
//! through [`crate::service::IngestionService::get_progress`]. Every update is
//! a read-merge-write under one mutex, so concurrent per-file workers never
//! lose increments and the file is never observed half-written.
//!
//! [`SyncProgressReporter`] mirrors the same events on **stderr** for the CLI,
//! so stdout stays parseable for scripts.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::models::{IngestionProgress, RunPhase};
use crate::persist;

/// Fields to merge into the progress record. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub phase: Option<RunPhase>,
    pub total: Option<usize>,
    pub skipped: Option<usize>,
    pub current_page: Option<u32>,
    /// A file finished (successfully or not): bumps `completed` by one.
    pub file_done: Option<FileDone>,
}

#[derive(Debug, Clone)]
pub struct FileDone {
    pub name: String,
    pub downloaded_bytes: u64,
    pub failed: bool,
}

pub struct ProgressTracker {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ProgressTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Result<Option<IngestionProgress>> {
        persist::read_json(&self.path)
    }

    /// Start a new run: the record is overwritten and `started_at` reset.
    pub fn begin_run(&self, run_id: &str, folder: &str) -> Result<IngestionProgress> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let progress = IngestionProgress {
            run_id: run_id.to_string(),
            folder: Some(folder.to_string()),
            phase: RunPhase::Listing,
            total: 0,
            completed: 0,
            skipped: 0,
            failed: 0,
            last_file: None,
            downloaded_bytes: 0,
            current_page: 0,
            started_at: now,
            updated_at: now,
            done: false,
            error: None,
        };
        persist::write_json_atomic(&self.path, &progress)?;
        Ok(progress)
    }

    /// Merge `update` into the stored record. `started_at` survives from the
    /// previous record; without one it is stamped now.
    pub fn update(&self, update: ProgressUpdate) -> Result<IngestionProgress> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let mut progress = self.get()?.unwrap_or_else(|| IngestionProgress {
            run_id: String::new(),
            folder: None,
            phase: RunPhase::Listing,
            total: 0,
            completed: 0,
            skipped: 0,
            failed: 0,
            last_file: None,
            downloaded_bytes: 0,
            current_page: 0,
            started_at: now,
            updated_at: now,
            done: false,
            error: None,
        });

        if let Some(phase) = update.phase {
            progress.phase = phase;
        }
        if let Some(total) = update.total {
            progress.total = total;
        }
        if let Some(skipped) = update.skipped {
            progress.skipped = skipped;
        }
        if let Some(page) = update.current_page {
            progress.current_page = page;
        }
        if let Some(done) = update.file_done {
            progress.completed += 1;
            if done.failed {
                progress.failed += 1;
            }
            progress.last_file = Some(done.name);
            progress.downloaded_bytes = done.downloaded_bytes;
        }
        progress.updated_at = now;

        persist::write_json_atomic(&self.path, &progress)?;
        Ok(progress)
    }

    /// Mark the run terminal. `error` is `None` on success.
    pub fn finish(&self, error: Option<String>) -> Result<IngestionProgress> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let Some(mut progress) = self.get()? else {
            return Err(crate::error::IngestError::cache_io(
                &self.path,
                "no progress record to finish",
            ));
        };
        progress.phase = if error.is_some() {
            RunPhase::Failed
        } else {
            RunPhase::Done
        };
        progress.done = true;
        progress.error = error;
        progress.updated_at = Utc::now();
        persist::write_json_atomic(&self.path, &progress)?;
        Ok(progress)
    }
}

/// A record that is still in flight but has not been touched within `ttl`
/// belongs to a run whose process died.
pub fn is_stale(progress: &IngestionProgress, ttl: Duration, now: DateTime<Utc>) -> bool {
    !progress.done && now - progress.updated_at > ttl
}

// ============ Live reporters ============

/// A single progress event for a run.
#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    /// Listing page `page` has been fetched.
    Listing { page: u32, files: usize },
    /// `n` of `total` changed files processed.
    Processing {
        n: usize,
        total: usize,
        file: String,
    },
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync  processing  12 / 40  report.pdf".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Listing { page, files } => {
                format!(
                    "sync  listing  page {}  ({} files so far)\n",
                    page,
                    format_number(*files as u64)
                )
            }
            SyncProgressEvent::Processing { n, total, file } => format!(
                "sync  processing  {} / {}  {}\n",
                format_number(*n as u64),
                format_number(*total as u64),
                file
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Listing { page, files } => serde_json::json!({
                "event": "progress",
                "phase": "listing",
                "page": page,
                "files": files
            }),
            SyncProgressEvent::Processing { n, total, file } => serde_json::json!({
                "event": "progress",
                "phase": "processing",
                "n": n,
                "total": total,
                "file": file
            }),
        };
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", obj);
        let _ = err.flush();
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
