/// Change detection for the two ways images arrive
use crate::CycleError;
use media_io::ImageFilter;
use settings::FrameConfig;
use std::path::{Path, PathBuf};
use sync::{RemoteFolder, SourceSync, UploadMailbox};
use tracing::{debug, info, warn};

/// Tells the loop when the image folder needs a rebuild.
#[async_trait::async_trait]
pub trait ChangeSource: Send + Sync {
    fn name(&self) -> &str;

    /// Folder holding the images the slideshow is built from.
    fn images_dir(&self) -> &Path;

    /// Bring the images folder up to date; true when a rebuild is due.
    async fn poll(&mut self) -> Result<bool, CycleError>;

    /// The rebuild that followed a positive `poll` succeeded.
    fn commit(&mut self);

    /// The rebuild that followed a positive `poll` failed.
    fn abandon(&mut self);
}

/// Mirrors a remote folder and asks for a rebuild when the mirror changes or
/// the remote count differs from the last successful build.
pub struct CloudSource<R> {
    sync: SourceSync<R>,
    built_count: usize,
    last_count: usize,
    pending: bool,
}

impl<R: RemoteFolder> CloudSource<R> {
    pub fn new(sync: SourceSync<R>) -> Self {
        Self {
            sync,
            built_count: 0,
            last_count: 0,
            pending: false,
        }
    }

    pub fn from_config(remote: R, config: &FrameConfig) -> Self {
        Self::new(SourceSync::new(remote, &config.paths.images_dir))
    }
}

#[async_trait::async_trait]
impl<R: RemoteFolder> ChangeSource for CloudSource<R> {
    fn name(&self) -> &str {
        self.sync.remote().name()
    }

    fn images_dir(&self) -> &Path {
        self.sync.local_dir()
    }

    async fn poll(&mut self) -> Result<bool, CycleError> {
        let report = self.sync.sync().await?;
        self.last_count = report.count;
        if report.changed || report.count != self.built_count {
            self.pending = true;
        }
        debug!(
            "Sync of {}: changed={} count={} pending={}",
            self.name(),
            report.changed,
            report.count,
            self.pending
        );
        Ok(self.pending)
    }

    fn commit(&mut self) {
        self.built_count = self.last_count;
        self.pending = false;
    }

    fn abandon(&mut self) {
        self.pending = true;
    }
}

/// Waits for the upload marker and consumes the batch it announces.
pub struct UploadSource {
    mailbox: UploadMailbox,
    upload_dir: PathBuf,
    filter: ImageFilter,
    batch: Vec<PathBuf>,
}

impl UploadSource {
    pub fn new(
        mailbox: UploadMailbox,
        upload_dir: impl Into<PathBuf>,
        filter: ImageFilter,
    ) -> Self {
        Self {
            mailbox,
            upload_dir: upload_dir.into(),
            filter,
            batch: Vec::new(),
        }
    }

    pub fn from_config(config: &FrameConfig) -> Self {
        Self::new(
            UploadMailbox::new(&config.paths.upload_marker),
            &config.paths.upload_dir,
            config.image_filter(),
        )
    }

    fn snapshot(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        if !self.upload_dir.is_dir() {
            return Ok(files);
        }
        for entry in std::fs::read_dir(&self.upload_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() && self.filter.matches(&entry.path()) {
                files.push(entry.path());
            }
        }
        Ok(files)
    }

    fn discard_batch(&mut self) {
        for path in self.batch.drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Could not remove uploaded file {}: {}", path.display(), e);
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl ChangeSource for UploadSource {
    fn name(&self) -> &str {
        "upload"
    }

    fn images_dir(&self) -> &Path {
        &self.upload_dir
    }

    async fn poll(&mut self) -> Result<bool, CycleError> {
        if !self.mailbox.take()? {
            return Ok(false);
        }
        self.batch = self.snapshot()?;
        info!("Upload complete: {} images in batch", self.batch.len());
        Ok(true)
    }

    fn commit(&mut self) {
        self.discard_batch();
    }

    /// A batch that failed to build is dropped so it cannot break later ones.
    fn abandon(&mut self) {
        self.discard_batch();
    }
}
