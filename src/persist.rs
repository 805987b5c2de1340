//! Whole-file JSON persistence with atomic replacement.
//!
//! Writers serialize to a sibling temp file and `rename` it over the target,
//! so a reader sees either the previous record or the new one, never a
//! truncated file.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{IngestError, Result};

/// Read a JSON record. A missing file is `Ok(None)`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(IngestError::cache_io(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| IngestError::cache_io(path, format!("invalid JSON: {}", e)))
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
///
/// Every write gets its own temp file in the target directory, so concurrent
/// writers to one path never share a temp file.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| IngestError::cache_io(path, e))?;

    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent,
        None => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| IngestError::cache_io(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| IngestError::cache_io(path, e))?;
    let written = (|| -> std::io::Result<()> {
        tmp.write_all(&json)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()
    })();
    written.map_err(|e| IngestError::cache_io(path, e))?;
    tmp.persist(path)
        .map_err(|e| IngestError::cache_io(path, e.error))?;
    Ok(())
}
