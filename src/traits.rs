//! Seams for the remote collaborators of an ingestion run.
//!
//! The orchestrator only talks to storage through [`FileLister`] and
//! [`ContentFetcher`], and to the generation backend through
//! [`crate::generation::TextGenerator`]. Production wiring uses
//! [`crate::connector_drive::DriveConnector`]; tests plug in in-memory fakes.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use anyhow::Result;
//! use drive_brain::models::FilePage;
//! use drive_brain::traits::FileLister;
//!
//! struct EmptyFolder;
//!
//! #[async_trait]
//! impl FileLister for EmptyFolder {
//!     async fn list_page(&self, _folder_id: &str, _page_token: Option<&str>) -> Result<FilePage> {
//!         Ok(FilePage::default())
//!     }
//!
//!     async fn resolve_folder(&self, name: &str) -> Result<Vec<String>> {
//!         Ok(vec![format!("id-of-{}", name)])
//!     }
//! }
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::models::{FilePage, RemoteFile};

/// Paged listing of one folder.
#[async_trait]
pub trait FileLister: Send + Sync {
    /// Fetch one page. `page_token` is `None` for the first page.
    async fn list_page(&self, folder_id: &str, page_token: Option<&str>) -> Result<FilePage>;

    /// Ids of every folder whose name is exactly `name`.
    ///
    /// Callers decide what zero or several matches mean; see
    /// [`crate::ingest::resolve_folder`].
    async fn resolve_folder(&self, name: &str) -> Result<Vec<String>>;

    /// List the whole folder, following page tokens until exhausted.
    ///
    /// `on_page` is called after every page with the 1-based page number and
    /// the number of files collected so far. Any page error aborts the
    /// listing; no partial result is returned.
    async fn list_files(
        &self,
        folder_id: &str,
        on_page: &(dyn Fn(u32, usize) + Sync),
    ) -> Result<Vec<RemoteFile>> {
        let mut files = Vec::new();
        let mut token: Option<String> = None;
        let mut page = 0u32;
        loop {
            page += 1;
            let batch = self
                .list_page(folder_id, token.as_deref())
                .await
                .with_context(|| format!("listing page {} failed", page))?;
            files.extend(batch.files);
            on_page(page, files.len());
            match batch.next_page_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }
        Ok(files)
    }
}

/// Raw content download by file id.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch_content(&self, file: &RemoteFile) -> Result<Vec<u8>>;
}
