/// A directory on a mounted filesystem used as the authoritative remote
use crate::{RemoteEntry, RemoteFolder, SyncError};
use chrono::{DateTime, Utc};
use media_io::ImageFilter;
use std::path::{Path, PathBuf};
use tracing::warn;

pub struct LocalFolder {
    root: PathBuf,
    filter: ImageFilter,
}

impl LocalFolder {
    pub fn new(root: impl Into<PathBuf>, filter: ImageFilter) -> Self {
        Self {
            root: root.into(),
            filter,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait::async_trait]
impl RemoteFolder for LocalFolder {
    fn name(&self) -> &str {
        "local"
    }

    async fn list(&self) -> Result<Vec<RemoteEntry>, SyncError> {
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(SyncError::io(&self.root))?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(SyncError::io(&self.root))? {
            let path = entry.path();
            let meta = entry.metadata().await.map_err(SyncError::io(&path))?;
            if !meta.is_file() || !self.filter.matches(&path) {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                warn!("Skipping {} (name is not valid UTF-8)", path.display());
                continue;
            };
            let modified = meta.modified().map_err(SyncError::io(&path))?;
            entries.push(RemoteEntry {
                id: name.clone(),
                name,
                modified: DateTime::<Utc>::from(modified),
            });
        }
        Ok(entries)
    }

    async fn download(&self, entry: &RemoteEntry, dest: &Path) -> Result<(), SyncError> {
        let src = self.root.join(&entry.id);
        tokio::fs::copy(&src, dest)
            .await
            .map_err(SyncError::io(&src))?;
        Ok(())
    }
}
