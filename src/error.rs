//! Error taxonomy for ingestion runs.
//!
//! Only failures that abort a run (or refuse to start one) are errors.
//! Unsupported content types and failed summaries are ordinary outcomes,
//! see [`crate::extract::Extraction`] and [`crate::summarize::SummaryOutcome`].

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Listing, folder lookup, or authentication against the storage backend failed.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A folder name resolved to zero or several folders.
    #[error("not found: {0}")]
    NotFound(String),

    /// Reading or writing a persisted record failed.
    #[error("cache I/O error at {}: {message}", path.display())]
    CacheIo { path: PathBuf, message: String },

    /// Another run holds the single-run guard.
    #[error("an ingestion run is already in progress")]
    AlreadyRunning,
}

impl IngestError {
    pub fn cache_io(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        IngestError::CacheIo {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
