//! Google Drive connector.
//!
//! Lists a folder through the Drive v3 REST API and downloads file content.
//! Implements [`FileLister`] and [`ContentFetcher`] for the ingestion
//! orchestrator.
//!
//! # Configuration
//!
//! ```toml
//! [drive]
//! folder_name = "Brain"          # or folder_id = "1AbC..."
//! page_size = 1000
//! mime_types = ["application/pdf"]
//! ```
//!
//! # Environment Variables
//!
//! Either a ready bearer token:
//! - `GOOGLE_ACCESS_TOKEN`
//!
//! or OAuth2 refresh-token credentials, exchanged at `drive.token_url`:
//! - `GMAIL_CLIENT_ID`, `GMAIL_CLIENT_SECRET`, `GMAIL_REFRESH_TOKEN`
//!
//! # Pagination
//!
//! `files.list` returns at most `pageSize` entries and a `nextPageToken`.
//! Callers follow the token until it is absent; a listing is never reported
//! complete before that.
//!
//! # Native Google files
//!
//! Google Docs cannot be downloaded with `alt=media`; they are exported as
//! `text/plain` instead, and the default extractor reads them as UTF-8.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::DriveConfig;
use crate::models::{FilePage, RemoteFile};
use crate::traits::{ContentFetcher, FileLister};

pub const MIME_FOLDER: &str = "application/vnd.google-apps.folder";
pub const MIME_GOOGLE_DOC: &str = "application/vnd.google-apps.document";

/// How requests are authorized.
#[derive(Clone)]
pub enum DriveAuth {
    AccessToken(String),
    RefreshToken {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
}

impl std::fmt::Debug for DriveAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriveAuth::AccessToken(_) => f.write_str("AccessToken(..)"),
            DriveAuth::RefreshToken { client_id, .. } => f
                .debug_struct("RefreshToken")
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}

impl DriveAuth {
    /// Prefer `GOOGLE_ACCESS_TOKEN`; otherwise require the refresh-token triple.
    pub fn from_env() -> Result<Self> {
        if let Ok(token) = std::env::var("GOOGLE_ACCESS_TOKEN") {
            return Ok(DriveAuth::AccessToken(token));
        }
        let client_id = std::env::var("GMAIL_CLIENT_ID")
            .context("neither GOOGLE_ACCESS_TOKEN nor GMAIL_CLIENT_ID is set")?;
        let client_secret = std::env::var("GMAIL_CLIENT_SECRET")
            .context("GMAIL_CLIENT_SECRET environment variable not set")?;
        let refresh_token = std::env::var("GMAIL_REFRESH_TOKEN")
            .context("GMAIL_REFRESH_TOKEN environment variable not set")?;
        Ok(DriveAuth::RefreshToken {
            client_id,
            client_secret,
            refresh_token,
        })
    }
}

pub struct DriveConnector {
    config: DriveConfig,
    auth: DriveAuth,
    client: reqwest::Client,
    /// Access token minted from the refresh token, reused until rejected.
    cached_token: Mutex<Option<String>>,
}

impl DriveConnector {
    pub fn new(config: DriveConfig, auth: DriveAuth) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config,
            auth,
            client,
            cached_token: Mutex::new(None),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/drive/v3/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn bearer_token(&self, force_refresh: bool) -> Result<String> {
        let (client_id, client_secret, refresh_token) = match &self.auth {
            DriveAuth::AccessToken(t) => return Ok(t.clone()),
            DriveAuth::RefreshToken {
                client_id,
                client_secret,
                refresh_token,
            } => (client_id, client_secret, refresh_token),
        };

        let mut cached = self.cached_token.lock().await;
        if !force_refresh {
            if let Some(token) = cached.as_ref() {
                return Ok(token.clone());
            }
        }

        debug!("exchanging refresh token for access token");
        let resp = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .context("OAuth token request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "OAuth token exchange failed (HTTP {}): {}",
                status,
                body.chars().take(300).collect::<String>()
            );
        }

        let token: TokenResponse = resp.json().await.context("invalid OAuth token response")?;
        *cached = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    /// GET with bearer auth. A 401 with refresh credentials triggers one
    /// token refresh and a retry.
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        let mut refreshed = false;
        loop {
            let token = self.bearer_token(refreshed).await?;
            let resp = self
                .client
                .get(url)
                .query(query)
                .bearer_auth(&token)
                .send()
                .await
                .with_context(|| format!("Drive request failed: {}", url))?;

            let status = resp.status();
            if status == reqwest::StatusCode::UNAUTHORIZED
                && !refreshed
                && matches!(self.auth, DriveAuth::RefreshToken { .. })
            {
                refreshed = true;
                continue;
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                bail!(
                    "Drive API error (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                );
            }
            return Ok(resp);
        }
    }

    fn listing_query(&self, folder_id: &str) -> String {
        let mut q = format!("'{}' in parents and trashed = false", escape_query(folder_id));
        if !self.config.mime_types.is_empty() {
            let types = self
                .config
                .mime_types
                .iter()
                .map(|m| format!("mimeType = '{}'", escape_query(m)))
                .collect::<Vec<_>>()
                .join(" or ");
            q.push_str(&format!(" and ({})", types));
        }
        q
    }
}

#[async_trait]
impl FileLister for DriveConnector {
    async fn list_page(&self, folder_id: &str, page_token: Option<&str>) -> Result<FilePage> {
        let mut query = vec![
            ("q", self.listing_query(folder_id)),
            (
                "fields",
                "nextPageToken, files(id, name, mimeType, modifiedTime, size)".to_string(),
            ),
            ("pageSize", self.config.page_size.to_string()),
            ("supportsAllDrives", "true".to_string()),
            ("includeItemsFromAllDrives", "true".to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let resp = self.get(&self.api_url("files"), &query).await?;
        let body = resp.text().await?;
        let page = parse_list_response(&body)?;
        debug!(
            files = page.files.len(),
            more = page.next_page_token.is_some(),
            "listed Drive page"
        );
        Ok(page)
    }

    async fn resolve_folder(&self, name: &str) -> Result<Vec<String>> {
        let q = format!(
            "mimeType = '{}' and name = '{}' and trashed = false",
            MIME_FOLDER,
            escape_query(name)
        );
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![
                ("q", q.clone()),
                ("fields", "nextPageToken, files(id, name)".to_string()),
                ("pageSize", "100".to_string()),
                ("supportsAllDrives", "true".to_string()),
                ("includeItemsFromAllDrives", "true".to_string()),
            ];
            if let Some(ref token) = page_token {
                query.push(("pageToken", token.clone()));
            }
            let resp = self.get(&self.api_url("files"), &query).await?;
            let list: FolderListResponse = resp.json().await.context("invalid Drive folder listing")?;
            ids.extend(list.files.into_iter().map(|f| f.id));
            match list.next_page_token {
                Some(t) if !t.is_empty() => page_token = Some(t),
                _ => break,
            }
        }
        info!(folder = name, matches = ids.len(), "resolved Drive folder by name");
        Ok(ids)
    }
}

#[async_trait]
impl ContentFetcher for DriveConnector {
    async fn fetch_content(&self, file: &RemoteFile) -> Result<Vec<u8>> {
        let resp = if file.content_type == MIME_GOOGLE_DOC {
            self.get(
                &self.api_url(&format!("files/{}/export", file.id)),
                &[("mimeType", "text/plain".to_string())],
            )
            .await?
        } else {
            self.get(
                &self.api_url(&format!("files/{}", file.id)),
                &[
                    ("alt", "media".to_string()),
                    ("supportsAllDrives", "true".to_string()),
                ],
            )
            .await?
        };
        let bytes = resp
            .bytes()
            .await
            .with_context(|| format!("failed to read content of {}", file.name))?;
        Ok(bytes.to_vec())
    }
}

// ============ Response parsing ============

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    mime_type: String,
    modified_time: Option<String>,
    /// int64 encoded as a string; absent for native Google files.
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FolderListResponse {
    #[serde(default)]
    files: Vec<FolderEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FolderEntry {
    id: String,
}

fn parse_list_response(body: &str) -> Result<FilePage> {
    let list: DriveListResponse =
        serde_json::from_str(body).context("invalid Drive files.list response")?;

    let mut files = Vec::with_capacity(list.files.len());
    for f in list.files {
        let raw_time = f
            .modified_time
            .with_context(|| format!("Drive file {} has no modifiedTime", f.id))?;
        let modified_time = DateTime::parse_from_rfc3339(&raw_time)
            .with_context(|| format!("Drive file {} has invalid modifiedTime {}", f.id, raw_time))?
            .with_timezone(&Utc);
        files.push(RemoteFile {
            id: f.id,
            name: f.name,
            content_type: f.mime_type,
            modified_time,
            size_bytes: f.size.and_then(|s| s.parse::<u64>().ok()),
        });
    }

    Ok(FilePage {
        files,
        next_page_token: list.next_page_token.filter(|t| !t.is_empty()),
    })
}

/// Escape a literal for use inside a single-quoted Drive query string.
fn escape_query(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}
