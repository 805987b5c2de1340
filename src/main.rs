//! # Drive Brain CLI (`brain`)
//!
//! ## Usage
//!
//! ```bash
//! brain --config ./config/brain.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `brain sync` | Run one incremental ingestion of the configured folder |
//! | `brain progress` | Print the progress record of the current/last run |
//! | `brain cache` | Print the document cache (or its stats) |
//! | `brain check` | Validate configuration and show resolved settings |
//!
//! Logs go to stderr and are controlled by `RUST_LOG` (default `warn`, `-v`
//! for `info`, `-vv` for `debug`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use drive_brain::config::{self, Config};
use drive_brain::ingest::{Collaborators, Ingestor};
use drive_brain::models::FolderRef;
use drive_brain::progress::{ProgressMode, ProgressTracker};
use drive_brain::service::IngestionService;

/// Drive Brain: incremental document summaries for a Drive folder.
#[derive(Parser)]
#[command(name = "brain", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/brain.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest the folder: summarize new and changed documents.
    ///
    /// Unchanged files (same id and modifiedTime as in the cache) are
    /// skipped without downloading them.
    Sync {
        /// Drive folder id (overrides the config file).
        #[arg(long, conflicts_with = "folder_name")]
        folder_id: Option<String>,

        /// Drive folder name; must match exactly one folder.
        #[arg(long)]
        folder_name: Option<String>,

        /// Live progress on stderr. Defaults to `human` on a TTY, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        /// Start even if another process appears to be mid-run.
        #[arg(long)]
        force: bool,
    },

    /// Print the progress record as JSON.
    Progress,

    /// Print the document cache as JSON.
    Cache {
        /// Only print aggregate stats, not the documents.
        #[arg(long)]
        summary_only: bool,
    },

    /// Validate the configuration file.
    Check,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn build_service(cfg: &Config, progress: ProgressMode) -> anyhow::Result<IngestionService> {
    let collaborators = Collaborators::from_config(cfg)?;
    let tracker = Arc::new(ProgressTracker::new(cfg.storage.progress_path.clone()));
    let ingestor = Ingestor::new(cfg, collaborators, tracker).with_reporter(progress.reporter());
    Ok(IngestionService::new(ingestor, &cfg.ingest))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Sync {
            folder_id,
            folder_name,
            progress,
            force,
        } => {
            let folder = match (folder_id, folder_name) {
                (Some(id), _) => FolderRef::Id(id),
                (None, Some(name)) => FolderRef::Name(name),
                (None, None) => cfg.drive.folder()?,
            };
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let service = build_service(&cfg, mode)?;
            let report = service.run_blocking(&folder, force).await?;

            println!("sync {}", folder);
            println!("  listed: {} files", report.listed);
            println!("  unchanged: {}", report.unchanged);
            println!("  summarized: {}", report.summarized);
            println!("  summary failures: {}", report.soft_failures);
            println!("  download failures: {}", report.fetch_failures);
            if cfg.ingest.prune_missing {
                println!("  pruned: {}", report.pruned);
            }
            println!("  run: {}", report.run_id);
            println!("ok");
        }
        Commands::Progress => {
            let tracker = ProgressTracker::new(cfg.storage.progress_path.clone());
            match tracker.get()? {
                Some(p) => println!("{}", serde_json::to_string_pretty(&p)?),
                None => println!("no ingestion has run yet"),
            }
        }
        Commands::Cache { summary_only } => {
            let store = drive_brain::cache::CacheStore::new(cfg.storage.cache_path.clone());
            let Some(cache) = store.load_existing()? else {
                println!("no cache at {}", store.path().display());
                return Ok(());
            };
            if summary_only {
                let stats = serde_json::json!({
                    "lastUpdated": cache.last_updated,
                    "totalFiles": cache.total_files,
                    "totalSizeBytes": cache.total_size_bytes,
                });
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&cache)?);
            }
        }
        Commands::Check => {
            println!("config: {}", cli.config.display());
            match cfg.drive.folder() {
                Ok(folder) => println!("  folder: {}", folder),
                Err(_) => println!("  folder: (not set, pass --folder-id or --folder-name)"),
            }
            println!(
                "  summarizer: {}{}",
                cfg.summarizer.provider,
                cfg.summarizer
                    .model
                    .as_deref()
                    .map(|m| format!(" ({})", m))
                    .unwrap_or_default()
            );
            println!("  cache: {}", cfg.storage.cache_path.display());
            println!("  progress: {}", cfg.storage.progress_path.display());
            println!("  concurrency: {}", cfg.ingest.concurrency);
            drive_brain::generation::create_generator(&cfg.summarizer)
                .context("summarizer backend is not usable")?;
            println!("ok");
        }
    }

    Ok(())
}
