//! Image set synchronization.
//!
//! Two ways images reach the frame:
//! - [`SourceSync`] mirrors an authoritative remote folder ([`RemoteFolder`])
//!   into a local directory and reports whether the set changed.
//! - [`UploadMailbox`] is the single-slot handoff between the upload form and
//!   the polling loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod auth;
pub mod drive;
pub mod local;
pub mod mailbox;
pub mod source;

pub use auth::{ServiceAccountAuth, ServiceAccountKey};
pub use drive::DriveFolder;
pub use local::LocalFolder;
pub use mailbox::UploadMailbox;
pub use source::{SourceSync, SyncReport};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("remote API error: {status} - {body}")]
    Api { status: u16, body: String },
    #[error("credentials error: {0}")]
    Credentials(String),
    #[error("token signing failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("invalid timestamp {value:?}: {source}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

/// One image in the remote listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Backend-specific id used to download the entry.
    pub id: String,
    /// File name; unique within the folder.
    pub name: String,
    pub modified: DateTime<Utc>,
}

/// An authoritative folder of images somewhere else.
#[async_trait::async_trait]
pub trait RemoteFolder: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Every image currently in the folder.
    async fn list(&self) -> Result<Vec<RemoteEntry>, SyncError>;

    /// Write the content of `entry` to `dest`, replacing it.
    async fn download(&self, entry: &RemoteEntry, dest: &Path) -> Result<(), SyncError>;
}

/// True when `name` is a bare file name that stays inside its folder.
pub fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}
