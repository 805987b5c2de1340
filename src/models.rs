//! Core data models shared by the lister, cache, and progress tracker.
//!
//! Persisted records serialize as camelCase JSON so the cache file can be
//! handed verbatim to a retrieval consumer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One file in the watched folder, as returned by a listing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub content_type: String,
    pub modified_time: DateTime<Utc>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

/// One listing page plus the cursor for the next one.
#[derive(Debug, Clone, Default)]
pub struct FilePage {
    pub files: Vec<RemoteFile>,
    pub next_page_token: Option<String>,
}

/// A cached, summarized document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub content_type: String,
    /// The source file's `modified_time` when this summary was produced.
    pub modified_time: DateTime<Utc>,
    pub summary: String,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    pub summarized_at: DateTime<Utc>,
}

/// The full persisted document cache.
///
/// `total_files` and `total_size_bytes` are derived from `documents` and
/// recomputed by [`DocumentCache::recompute_totals`] on every save.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentCache {
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_files: usize,
    #[serde(default)]
    pub total_size_bytes: u64,
    #[serde(default)]
    pub documents: BTreeMap<String, DocumentSummary>,
}

impl DocumentCache {
    pub fn recompute_totals(&mut self) {
        self.total_files = self.documents.len();
        self.total_size_bytes = self
            .documents
            .values()
            .map(|d| d.size_bytes.unwrap_or(0))
            .sum();
    }
}

/// Coarse phase of a run, kept in the progress record for pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    #[default]
    Listing,
    Processing,
    Saving,
    Done,
    Failed,
}

/// Status of the current or last ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionProgress {
    pub run_id: String,
    #[serde(default)]
    pub folder: Option<String>,
    pub phase: RunPhase,
    pub total: usize,
    pub completed: usize,
    #[serde(default)]
    pub skipped: usize,
    #[serde(default)]
    pub failed: usize,
    #[serde(default)]
    pub last_file: Option<String>,
    #[serde(default)]
    pub downloaded_bytes: u64,
    #[serde(default)]
    pub current_page: u32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// How the watched folder is identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderRef {
    Id(String),
    Name(String),
}

impl std::fmt::Display for FolderRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FolderRef::Id(id) => write!(f, "id:{}", id),
            FolderRef::Name(name) => write!(f, "name:{}", name),
        }
    }
}

/// Counters returned by a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub listed: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub summarized: usize,
    pub soft_failures: usize,
    pub fetch_failures: usize,
    pub pruned: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn doc(id: &str, size: Option<u64>) -> DocumentSummary {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        DocumentSummary {
            id: id.to_string(),
            filename: format!("{}.pdf", id),
            content_type: "application/pdf".to_string(),
            modified_time: t,
            summary: "s".to_string(),
            size_bytes: size,
            summarized_at: t,
        }
    }

    #[test]
    fn totals_count_unknown_sizes_as_zero() {
        let mut cache = DocumentCache::default();
        cache.documents.insert("a".into(), doc("a", Some(10)));
        cache.documents.insert("b".into(), doc("b", None));
        cache.documents.insert("c".into(), doc("c", Some(5)));
        cache.recompute_totals();
        assert_eq!(cache.total_files, 3);
        assert_eq!(cache.total_size_bytes, 15);
    }

    #[test]
    fn remote_file_uses_camel_case_iso_timestamps() {
        let json = r#"{"id":"f1","name":"report.pdf","contentType":"application/pdf","modifiedTime":"2024-01-01T00:00:00Z"}"#;
        let file: RemoteFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.size_bytes, None);
        let back = serde_json::to_value(&file).unwrap();
        assert_eq!(back["modifiedTime"], "2024-01-01T00:00:00Z");
    }
}
