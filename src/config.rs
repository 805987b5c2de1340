use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::extract::{MIME_DOCX, MIME_PDF};
use crate::models::FolderRef;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
    #[serde(default = "default_progress_path")]
    pub progress_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_path: default_cache_path(),
            progress_path: default_progress_path(),
        }
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./data/brain_cache.json")
}
fn default_progress_path() -> PathBuf {
    PathBuf::from("./data/drive_progress.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct DriveConfig {
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub folder_name: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Listing is restricted to these MIME types. Empty means everything.
    #[serde(default = "default_mime_types")]
    pub mime_types: Vec<String>,
    #[serde(default = "default_drive_api_base")]
    pub api_base: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            folder_id: None,
            folder_name: None,
            page_size: default_page_size(),
            mime_types: default_mime_types(),
            api_base: default_drive_api_base(),
            token_url: default_token_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl DriveConfig {
    /// The folder configured in the file, if exactly one of id/name is set.
    pub fn folder(&self) -> Result<FolderRef> {
        match (&self.folder_id, &self.folder_name) {
            (Some(id), None) => Ok(FolderRef::Id(id.clone())),
            (None, Some(name)) => Ok(FolderRef::Name(name.clone())),
            (Some(_), Some(_)) => {
                anyhow::bail!("drive.folder_id and drive.folder_name are mutually exclusive")
            }
            (None, None) => anyhow::bail!(
                "no folder configured: set drive.folder_id or drive.folder_name, or pass --folder-id/--folder-name"
            ),
        }
    }
}

fn default_page_size() -> u32 {
    1000
}
fn default_mime_types() -> Vec<String> {
    vec![MIME_PDF.to_string(), MIME_DOCX.to_string()]
}
fn default_drive_api_base() -> String {
    "https://www.googleapis.com".to_string()
}
fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummarizerConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_max_summary_chars")]
    pub max_summary_chars: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_openai_api_base")]
    pub api_base: String,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            max_input_chars: default_max_input_chars(),
            max_summary_chars: default_max_summary_chars(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            api_base: default_openai_api_base(),
        }
    }
}

fn default_provider() -> String {
    "extractive".to_string()
}
fn default_max_input_chars() -> usize {
    8000
}
fn default_max_summary_chars() -> usize {
    1000
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_retries() -> u32 {
    3
}
fn default_openai_api_base() -> String {
    "https://api.openai.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Drop cached documents whose file no longer appears in the listing.
    #[serde(default)]
    pub prune_missing: bool,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Pause before the single retry of a failed content download.
    #[serde(default = "default_fetch_retry_delay_ms")]
    pub fetch_retry_delay_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            prune_missing: false,
            stale_after_secs: default_stale_after_secs(),
            fetch_retry_delay_ms: default_fetch_retry_delay_ms(),
        }
    }
}

impl IngestConfig {
    /// Silence after which an unfinished progress record counts as a dead run.
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs.min(MAX_STALE_AFTER_SECS) as i64)
    }
}

/// Upper bound for `ingest.stale_after_secs`: one year.
pub const MAX_STALE_AFTER_SECS: u64 = 365 * 24 * 60 * 60;

fn default_concurrency() -> usize {
    4
}
fn default_stale_after_secs() -> u64 {
    1800
}
fn default_fetch_retry_delay_ms() -> u64 {
    500
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.drive.page_size == 0 || config.drive.page_size > 1000 {
        anyhow::bail!("drive.page_size must be in [1, 1000]");
    }
    if config.drive.folder_id.is_some() && config.drive.folder_name.is_some() {
        anyhow::bail!("drive.folder_id and drive.folder_name are mutually exclusive");
    }

    if config.summarizer.max_summary_chars == 0 {
        anyhow::bail!("summarizer.max_summary_chars must be > 0");
    }
    if config.summarizer.max_input_chars == 0 {
        anyhow::bail!("summarizer.max_input_chars must be > 0");
    }

    match config.summarizer.provider.as_str() {
        "extractive" => {}
        "openai" => {
            if config.summarizer.model.is_none() {
                anyhow::bail!("summarizer.model must be specified when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown summarizer provider: '{}'. Must be openai or extractive.",
            other
        ),
    }

    if config.ingest.concurrency == 0 {
        anyhow::bail!("ingest.concurrency must be >= 1");
    }
    if config.ingest.stale_after_secs > MAX_STALE_AFTER_SECS {
        anyhow::bail!(
            "ingest.stale_after_secs must be <= {} (one year)",
            MAX_STALE_AFTER_SECS
        );
    }

    Ok(())
}
