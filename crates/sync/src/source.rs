/// Mirror a remote folder into a local directory
use crate::{is_plain_file_name, RemoteFolder, SyncError};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What one [`SourceSync::sync`] call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Something was downloaded or deleted.
    pub changed: bool,
    /// Number of entries in the remote listing.
    pub count: usize,
    pub downloaded: Vec<String>,
    pub deleted: Vec<String>,
}

pub struct SourceSync<R> {
    remote: R,
    local_dir: PathBuf,
}

impl<R: RemoteFolder> SourceSync<R> {
    pub fn new(remote: R, local_dir: impl Into<PathBuf>) -> Self {
        Self {
            remote,
            local_dir: local_dir.into(),
        }
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Bring the local directory in line with the remote listing.
    ///
    /// An entry is downloaded when it is missing locally or its remote
    /// modification time (whole UTC seconds) is strictly newer than the local
    /// file's. Local files missing from the listing are deleted afterwards.
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        tokio::fs::create_dir_all(&self.local_dir)
            .await
            .map_err(SyncError::io(&self.local_dir))?;

        let entries = self.remote.list().await?;
        let mut report = SyncReport {
            count: entries.len(),
            ..Default::default()
        };

        let mut remote_names: HashSet<String> = HashSet::new();
        for entry in &entries {
            if !is_plain_file_name(&entry.name) {
                warn!("Skipping remote entry with unsafe name {:?}", entry.name);
                continue;
            }
            remote_names.insert(entry.name.clone());

            let path = self.local_dir.join(&entry.name);
            let local_secs = local_modified_secs(&path).await?;
            if entry.modified.timestamp() > local_secs {
                info!("Downloading new or updated file: {}", entry.name);
                let partial = self.local_dir.join(format!(".{}.download", entry.name));
                if let Err(e) = self.remote.download(entry, &partial).await {
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(e);
                }
                tokio::fs::rename(&partial, &path)
                    .await
                    .map_err(SyncError::io(&path))?;
                report.downloaded.push(entry.name.clone());
                report.changed = true;
            } else {
                debug!("File {} is up-to-date.", entry.name);
            }
        }

        let mut dir = tokio::fs::read_dir(&self.local_dir)
            .await
            .map_err(SyncError::io(&self.local_dir))?;
        let mut stale = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(SyncError::io(&self.local_dir))?
        {
            let is_file = entry
                .file_type()
                .await
                .map_err(SyncError::io(entry.path()))?
                .is_file();
            // Names that are not valid UTF-8 can never match a listing entry.
            let name = entry.file_name();
            let listed = name.to_str().is_some_and(|n| remote_names.contains(n));
            if is_file && !listed {
                stale.push(name);
            }
        }
        stale.sort();
        for name in stale {
            let path = self.local_dir.join(&name);
            tokio::fs::remove_file(&path)
                .await
                .map_err(SyncError::io(&path))?;
            let name = name.to_string_lossy().into_owned();
            info!("Deleted file: {}", name);
            report.deleted.push(name);
            report.changed = true;
        }

        Ok(report)
    }
}

/// Local mtime in whole UTC seconds, or 0 when the file does not exist.
async fn local_modified_secs(path: &Path) -> Result<i64, SyncError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => {
            let modified = meta.modified().map_err(SyncError::io(path))?;
            Ok(DateTime::<Utc>::from(modified).timestamp())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(SyncError::io(path)(e)),
    }
}
