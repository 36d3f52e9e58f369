/// Single-slot "upload complete" marker shared by the upload form and the
/// polling loop. The marker's existence is the whole message.
use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct UploadMailbox {
    marker: PathBuf,
}

impl UploadMailbox {
    pub fn new(marker: impl Into<PathBuf>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.marker
    }

    /// Raise the marker. Signalling twice before a `take` is one signal.
    /// Safe to call from several threads at once: each call stages its own
    /// uniquely named file.
    pub fn signal(&self) -> io::Result<()> {
        let dir = match self.marker.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                parent
            }
            None => Path::new("."),
        };
        let mut staging = tempfile::Builder::new()
            .prefix(".upload-marker")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        staging.write_all(b"Upload complete")?;
        staging.persist(&self.marker).map_err(|e| e.error)?;
        debug!("Upload marker raised at {}", self.marker.display());
        Ok(())
    }

    /// Claim the marker. Returns true exactly once per signal, even when a
    /// concurrent `signal` races with the claim.
    pub fn take(&self) -> io::Result<bool> {
        let claimed = self.sibling(".claimed");
        match std::fs::rename(&self.marker, &claimed) {
            Ok(()) => {
                match std::fs::remove_file(&claimed) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.marker.is_file()
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = OsString::from(".");
        name.push(self.marker.file_name().unwrap_or_default());
        name.push(suffix);
        self.marker.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use tempfile::tempdir;

    #[test]
    fn signal_is_taken_once() {
        let dir = tempdir().unwrap();
        let mailbox = UploadMailbox::new(dir.path().join("upload_complete.txt"));

        assert!(!mailbox.take().unwrap());
        mailbox.signal().unwrap();
        assert!(mailbox.is_pending());
        assert!(mailbox.take().unwrap());
        assert!(!mailbox.is_pending());
        assert!(!mailbox.take().unwrap());
    }

    #[test]
    fn repeated_signals_collapse() {
        let dir = tempdir().unwrap();
        let mailbox = UploadMailbox::new(dir.path().join("upload_complete.txt"));
        mailbox.signal().unwrap();
        mailbox.signal().unwrap();
        assert!(mailbox.take().unwrap());
        assert!(!mailbox.take().unwrap());
    }

    #[test]
    fn signal_creates_parent_and_leaves_no_staging_files() {
        let dir = tempdir().unwrap();
        let mailbox = UploadMailbox::new(dir.path().join("state").join("upload_complete.txt"));
        mailbox.signal().unwrap();
        mailbox.take().unwrap();
        let left: Vec<_> = std::fs::read_dir(dir.path().join("state"))
            .unwrap()
            .collect();
        assert!(left.is_empty());
    }

    #[test]
    fn concurrent_signals_all_succeed() {
        let dir = tempdir().unwrap();
        let mailbox = UploadMailbox::new(dir.path().join("upload_complete.txt"));

        for _ in 0..100 {
            let barrier = Arc::new(Barrier::new(4));
            let workers: Vec<_> = (0..4)
                .map(|_| {
                    let mailbox = mailbox.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        mailbox.signal()
                    })
                })
                .collect();
            for worker in workers {
                worker.join().unwrap().unwrap();
            }
            assert!(mailbox.take().unwrap());
            assert!(!mailbox.take().unwrap());
        }

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
