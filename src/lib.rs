//! # Drive Brain
//!
//! An incremental summarization cache over a cloud-storage folder.
//!
//! Drive Brain lists a Google Drive folder, extracts text from PDF and DOCX
//! files, asks a text-generation backend for a bounded summary of each
//! document, and keeps the results in a JSON cache keyed by file id. Files
//! whose `modifiedTime` has not changed are never downloaded or summarized
//! again, so a re-run over an unchanged folder costs a single listing.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────────┐   ┌──────────────┐
//! │ FileLister  │──▶│        Ingestor          │──▶│  CacheStore  │
//! │  (Drive)    │   │ diff → fetch → extract → │   │ (JSON, by id)│
//! └─────────────┘   │        summarize         │   └──────┬───────┘
//!                   └────────────┬─────────────┘          │
//!                                ▼                        ▼
//!                        ┌──────────────┐        ┌─────────────────┐
//!                        │ProgressTracker│◀──────│IngestionService │
//!                        └──────────────┘        │ trigger / get_* │
//!                                                └─────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! brain check                       # validate config
//! brain sync --folder-name Brain    # one incremental run
//! brain progress                    # last run status
//! brain cache --summary-only        # cache stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Run-level error type |
//! | [`models`] | Core data types |
//! | [`persist`] | Atomic JSON file reads and writes |
//! | [`traits`] | Lister / fetcher seams |
//! | [`connector_drive`] | Google Drive connector |
//! | [`extract`] | PDF / DOCX text extraction |
//! | [`generation`] | Text-generation backends |
//! | [`summarize`] | Bounded per-document summaries |
//! | [`cache`] | Document cache diff / merge / save |
//! | [`progress`] | Persisted run progress and live reporters |
//! | [`ingest`] | Run orchestration |
//! | [`service`] | Single-run guard and outbound interface |

pub mod cache;
pub mod config;
pub mod connector_drive;
pub mod error;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod models;
pub mod persist;
pub mod progress;
pub mod service;
pub mod summarize;
pub mod traits;
