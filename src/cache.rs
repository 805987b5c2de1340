//! Durable document cache keyed by remote file id.
//!
//! The cache is one JSON file. A run loads it, decides which listed files
//! changed, merges freshly produced summaries back by id, and saves the whole
//! file atomically. Entries that were not part of the run are carried over
//! untouched.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::debug;

use crate::error::Result;
use crate::models::{DocumentCache, DocumentSummary, RemoteFile};
use crate::persist;

/// Listed files split by the change-detection policy.
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub changed: Vec<RemoteFile>,
    pub unchanged: Vec<RemoteFile>,
}

pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cache, or an empty one if nothing has been saved yet.
    pub fn load(&self) -> Result<DocumentCache> {
        Ok(self.load_existing()?.unwrap_or_default())
    }

    /// Load the cache only if it exists.
    pub fn load_existing(&self) -> Result<Option<DocumentCache>> {
        persist::read_json(&self.path)
    }

    /// Recompute aggregates, stamp `last_updated`, and replace the file atomically.
    pub fn save(&self, cache: &mut DocumentCache) -> Result<()> {
        cache.recompute_totals();
        cache.last_updated = Some(Utc::now());
        persist::write_json_atomic(&self.path, cache)?;
        debug!(
            path = %self.path.display(),
            total_files = cache.total_files,
            "cache saved"
        );
        Ok(())
    }
}

/// A file is changed iff its id is not cached or its `modified_time` differs.
pub fn is_changed(cache: &DocumentCache, file: &RemoteFile) -> bool {
    match cache.documents.get(&file.id) {
        Some(doc) => doc.modified_time != file.modified_time,
        None => true,
    }
}

pub fn partition(cache: &DocumentCache, files: Vec<RemoteFile>) -> ChangeSet {
    let (changed, unchanged) = files.into_iter().partition(|f| is_changed(cache, f));
    ChangeSet { changed, unchanged }
}

/// Replace or insert `fresh` summaries by id. Other entries are kept as-is.
pub fn merge(mut cache: DocumentCache, fresh: Vec<DocumentSummary>) -> DocumentCache {
    for doc in fresh {
        cache.documents.insert(doc.id.clone(), doc);
    }
    cache.recompute_totals();
    cache
}

/// Drop entries whose id is not in `listed_ids`. Returns the removed ids.
pub fn prune(cache: &mut DocumentCache, listed_ids: &HashSet<String>) -> Vec<String> {
    let stale: Vec<String> = cache
        .documents
        .keys()
        .filter(|id| !listed_ids.contains(*id))
        .cloned()
        .collect();
    for id in &stale {
        cache.documents.remove(id);
    }
    cache.recompute_totals();
    stale
}
