//! Remote slide images: list and download image files from a cloud drive folder.
//!
//! [`RemoteFileStore`] is the seam; [`GoogleDriveStore`] talks to the Drive v3
//! REST API with `reqwest`. Listing pages through `nextPageToken`; only image
//! entries are downloaded.
//!
//! A lecture file can stand in for the folder: [`RemoteFileStore::find_sibling_folder`]
//! looks next to the file for a folder named after it (`Lecture 3.pdf` →
//! `Lecture 3/`).

use crate::config::{DriveCredentials, ServiceConfig};
use crate::error::{CardMediaError, Lecture2AnkiError};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One downloaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Cloud drive access needed by the media stage.
#[async_trait]
pub trait RemoteFileStore: Send + Sync {
    /// Every image in `folder_ref`, ordered by name.
    async fn list_images(&self, folder_ref: &str) -> Result<Vec<RemoteFile>, Lecture2AnkiError>;

    /// Id of the folder that sits next to `file_ref` and carries its name
    /// without extension, if there is one.
    async fn find_sibling_folder(&self, file_ref: &str) -> Result<Option<String>, Lecture2AnkiError>;
}

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

#[derive(Debug, Clone, Deserialize)]
struct DriveFile {
    id: String,
    name: String,
    #[serde(rename = "mimeType", default)]
    mime_type: String,
    #[serde(default)]
    parents: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

/// Google Drive v3 client.
pub struct GoogleDriveStore {
    client: reqwest::Client,
    base: String,
    credentials: DriveCredentials,
    timeout_secs: u64,
}

impl GoogleDriveStore {
    pub fn new(
        base: impl Into<String>,
        credentials: DriveCredentials,
        timeout_secs: u64,
    ) -> Result<Self, Lecture2AnkiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Lecture2AnkiError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
            credentials,
            timeout_secs,
        })
    }

    /// # Errors
    /// [`Lecture2AnkiError::RemoteStoreNotConfigured`] when the config carries
    /// no credentials.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, Lecture2AnkiError> {
        let credentials = config.drive_credentials.clone().ok_or_else(|| {
            Lecture2AnkiError::RemoteStoreNotConfigured {
                hint: "set GOOGLE_DRIVE_TOKEN or GOOGLE_DRIVE_API_KEY".into(),
            }
        })?;
        Self::new(&config.drive_api_base, credentials, config.download_timeout_secs)
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.client.get(url);
        match &self.credentials {
            DriveCredentials::BearerToken(token) => req.bearer_auth(token),
            DriveCredentials::ApiKey(key) => req.query(&[("key", key.as_str())]),
        }
    }

    async fn send(&self, reference: &str, req: reqwest::RequestBuilder) -> Result<reqwest::Response, Lecture2AnkiError> {
        let response = req.send().await.map_err(|e| self.failed(reference, e))?;
        if !response.status().is_success() {
            return Err(Lecture2AnkiError::RemoteStoreFailed {
                reference: reference.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }
        Ok(response)
    }

    fn failed(&self, reference: &str, e: reqwest::Error) -> Lecture2AnkiError {
        let reason = if e.is_timeout() {
            format!("timed out after {}s", self.timeout_secs)
        } else {
            e.to_string()
        };
        Lecture2AnkiError::RemoteStoreFailed {
            reference: reference.to_string(),
            reason,
        }
    }

    /// All non-trashed children of `folder` matching the extra `filter`.
    async fn list_children(&self, folder: &str, filter: Option<&str>) -> Result<Vec<DriveFile>, Lecture2AnkiError> {
        let mut q = format!("'{}' in parents and trashed=false", escape_query(folder));
        if let Some(filter) = filter {
            q.push_str(" and ");
            q.push_str(filter);
        }

        let url = format!("{}/files", self.base);
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("q", q.clone()),
                ("fields", "nextPageToken, files(id, name, mimeType)".to_string()),
                ("pageSize", "1000".to_string()),
            ];
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }
            let response = self.send(folder, self.get(&url).query(&params)).await?;
            let page: FileList = response.json().await.map_err(|e| self.failed(folder, e))?;
            files.extend(page.files);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        debug!("Folder {}: {} entries", folder, files.len());
        Ok(files)
    }

    async fn metadata(&self, file_id: &str) -> Result<DriveFile, Lecture2AnkiError> {
        let url = format!("{}/files/{}", self.base, file_id);
        let req = self.get(&url).query(&[("fields", "id, name, mimeType, parents")]);
        let response = self.send(file_id, req).await?;
        response.json().await.map_err(|e| self.failed(file_id, e))
    }

    async fn download(&self, file: &DriveFile) -> Result<Vec<u8>, Lecture2AnkiError> {
        let url = format!("{}/files/{}", self.base, file.id);
        let response = self.send(&file.id, self.get(&url).query(&[("alt", "media")])).await?;
        let bytes = response.bytes().await.map_err(|e| self.failed(&file.id, e))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl RemoteFileStore for GoogleDriveStore {
    async fn list_images(&self, folder_ref: &str) -> Result<Vec<RemoteFile>, Lecture2AnkiError> {
        let mut entries: Vec<DriveFile> = self
            .list_children(folder_ref, None)
            .await?
            .into_iter()
            .filter(|f| is_image(&f.name, &f.mime_type))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let mut files = Vec::with_capacity(entries.len());
        for entry in &entries {
            match self.download(entry).await {
                Ok(bytes) => files.push(RemoteFile {
                    name: entry.name.clone(),
                    bytes,
                }),
                Err(e) => {
                    let skipped = CardMediaError::RemoteFileSkipped {
                        name: entry.name.clone(),
                        detail: e.to_string(),
                    };
                    warn!("{skipped}");
                }
            }
        }
        info!("Downloaded {}/{} images from folder {}", files.len(), entries.len(), folder_ref);
        Ok(files)
    }

    async fn find_sibling_folder(&self, file_ref: &str) -> Result<Option<String>, Lecture2AnkiError> {
        let file = self.metadata(file_ref).await?;
        let stem = file_stem(&file.name);
        let filter = format!("mimeType='{}' and name='{}'", FOLDER_MIME, escape_query(stem));
        for parent in &file.parents {
            if let Some(folder) = self.list_children(parent, Some(&filter)).await?.into_iter().next() {
                debug!("Lecture '{}' → folder {}", file.name, folder.id);
                return Ok(Some(folder.id));
            }
        }
        Ok(None)
    }
}

/// `'` and `\` must be escaped inside Drive query string literals.
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// `Lecture 3.pdf` → `Lecture 3`; names without a dot are returned whole.
pub fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(pos) if pos > 0 => &name[..pos],
        _ => name,
    }
}

fn is_image(name: &str, mime_type: &str) -> bool {
    if mime_type.starts_with("image/") {
        return true;
    }
    let lower = name.to_ascii_lowercase();
    [".jpg", ".jpeg", ".png"].iter().any(|ext| lower.ends_with(ext))
}
