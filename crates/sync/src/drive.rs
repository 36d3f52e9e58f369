/// Google Drive v3 backend
use crate::auth::{ServiceAccountAuth, ServiceAccountKey, DRIVE_READONLY_SCOPE};
use crate::{RemoteEntry, RemoteFolder, SyncError};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const PAGE_SIZE: &str = "1000";

/// A Drive folder read through a service account.
pub struct DriveFolder {
    folder_id: String,
    client: reqwest::Client,
    auth: ServiceAccountAuth,
}

impl DriveFolder {
    pub fn new(folder_id: impl Into<String>, key: ServiceAccountKey) -> Self {
        let client = reqwest::Client::new();
        Self {
            folder_id: folder_id.into(),
            auth: ServiceAccountAuth::new(key, DRIVE_READONLY_SCOPE, client.clone()),
            client,
        }
    }

    /// Load the service-account key from `credentials` and connect to `folder_id`.
    pub async fn from_credentials(
        folder_id: impl Into<String>,
        credentials: &Path,
    ) -> Result<Self, SyncError> {
        let key = ServiceAccountKey::from_file(credentials).await?;
        Ok(Self::new(folder_id, key))
    }

    pub fn folder_id(&self) -> &str {
        &self.folder_id
    }

    fn query(&self) -> String {
        format!(
            "'{}' in parents and mimeType contains 'image/' and trashed = false",
            self.folder_id.replace('\\', "\\\\").replace('\'', "\\'")
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    modified_time: String,
}

impl DriveFile {
    fn into_entry(self) -> Result<RemoteEntry, SyncError> {
        let modified = parse_modified_time(&self.modified_time)?;
        Ok(RemoteEntry {
            id: self.id,
            name: self.name,
            modified,
        })
    }
}

/// Parse Drive's `modifiedTime` (RFC 3339, UTC, fractional seconds).
pub fn parse_modified_time(value: &str) -> Result<DateTime<Utc>, SyncError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|source| SyncError::Timestamp {
            value: value.to_string(),
            source,
        })
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, SyncError> {
    if response.status().is_success() {
        return Ok(response);
    }
    Err(SyncError::Api {
        status: response.status().as_u16(),
        body: response.text().await.unwrap_or_default(),
    })
}

#[async_trait::async_trait]
impl RemoteFolder for DriveFolder {
    fn name(&self) -> &str {
        "google-drive"
    }

    async fn list(&self) -> Result<Vec<RemoteEntry>, SyncError> {
        let query = self.query();
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let token = self.auth.token().await?;
            let mut params = vec![
                ("q", query.as_str()),
                ("fields", "nextPageToken, files(id, name, modifiedTime)"),
                ("pageSize", PAGE_SIZE),
            ];
            if let Some(page) = page_token.as_deref() {
                params.push(("pageToken", page));
            }

            let response = self
                .client
                .get(FILES_URL)
                .bearer_auth(token)
                .query(&params)
                .send()
                .await?;
            let page: FileList = check(response).await?.json().await?;

            for file in page.files {
                entries.push(file.into_entry()?);
            }
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        debug!(
            "Drive folder {} lists {} images",
            self.folder_id,
            entries.len()
        );
        Ok(entries)
    }

    async fn download(&self, entry: &RemoteEntry, dest: &Path) -> Result<(), SyncError> {
        let token = self.auth.token().await?;
        let response = self
            .client
            .get(format!("{}/{}", FILES_URL, entry.id))
            .bearer_auth(token)
            .query(&[("alt", "media")])
            .send()
            .await?;
        let mut response = check(response).await?;

        let total = response.content_length();
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(SyncError::io(dest))?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await.map_err(SyncError::io(dest))?;
            written += chunk.len() as u64;
            if let Some(total) = total.filter(|t| *t > 0) {
                debug!("Download {}%: {}", written * 100 / total, entry.name);
            }
        }
        file.flush().await.map_err(SyncError::io(dest))?;
        Ok(())
    }
}
