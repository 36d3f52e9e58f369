//! External player control.
//!
//! The frame shows video and images through a separate fullscreen player
//! process. [`PlaybackController`] starts those processes and hands back a
//! [`PlaybackHandle`]; the caller owns the handle and passes it back in when
//! the player must be replaced.

use media_io::{letterbox, Resolution};
use settings::{FrameConfig, PlayerConfig, TaskbarConfig};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("{0} not found on PATH")]
    ProgramMissing(String),
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to render default image {path}: {source}")]
    Render {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A running player process.
#[derive(Debug)]
pub struct PlaybackHandle {
    child: Child,
    target: PathBuf,
}

impl PlaybackHandle {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// File the player was started on.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Non-blocking liveness check.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill the player if it is still alive. Never waits for the exit; the
    /// child is reaped on a background thread.
    ///
    /// This is `Child::kill`, so SIGKILL on unix. The player is fed plain
    /// files and holds no state worth flushing, so there is no graceful
    /// SIGTERM round-trip to wait on.
    pub fn terminate(mut self) {
        if !self.is_running() {
            return;
        }
        info!("Stopping player (pid {}) for {}", self.pid(), self.target.display());
        if let Err(e) = self.child.kill() {
            warn!("Failed to stop player pid {}: {}", self.pid(), e);
            return;
        }
        let mut child = self.child;
        std::thread::spawn(move || {
            let _ = child.wait();
        });
    }
}

/// How to launch the player binary.
#[derive(Debug, Clone)]
pub struct Player {
    program: String,
    video_args: Vec<String>,
    image_args: Vec<String>,
}

impl Player {
    pub fn from_config(config: &PlayerConfig) -> Self {
        Self {
            program: config.program.clone(),
            video_args: config.video_args.clone(),
            image_args: config.image_args.clone(),
        }
    }

    fn launch(&self, args: &[String], target: &Path) -> Result<PlaybackHandle, ProcessError> {
        let program = which::which(&self.program)
            .map_err(|_| ProcessError::ProgramMissing(self.program.clone()))?;
        debug!("Launching {} {:?} {}", program.display(), args, target.display());
        let child = Command::new(&program)
            .args(args)
            .arg(target)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        Ok(PlaybackHandle {
            child,
            target: target.to_path_buf(),
        })
    }
}

/// Desktop panel toggled around fullscreen playback. Every failure is logged
/// and ignored.
#[derive(Debug, Clone)]
pub struct Taskbar {
    config: TaskbarConfig,
}

impl Taskbar {
    pub fn new(config: TaskbarConfig) -> Self {
        Self { config }
    }

    pub fn disabled() -> Self {
        Self::new(TaskbarConfig {
            enabled: false,
            ..TaskbarConfig::default()
        })
    }

    pub fn hide(&self) {
        self.run(&self.config.hide_args);
    }

    pub fn restore(&self) {
        self.run(&self.config.restore_args);
    }

    fn run(&self, args: &[String]) {
        if !self.config.enabled {
            return;
        }
        match Command::new(&self.config.program)
            .args(args)
            .stdin(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => {
                debug!("{} {:?} ok", self.config.program, args)
            }
            Ok(status) => warn!("{} {:?} exited with {}", self.config.program, args, status),
            Err(e) => warn!("Could not run {}: {}", self.config.program, e),
        }
    }
}

/// The image shown whenever there is nothing better to play.
#[derive(Debug, Clone)]
pub struct DefaultImage {
    /// Image provided by the user.
    pub source: PathBuf,
    /// Letterboxed copy handed to the viewer.
    pub display: PathBuf,
    pub size: Resolution,
    pub background: [u8; 3],
}

impl DefaultImage {
    pub fn from_config(config: &FrameConfig) -> Self {
        Self {
            source: config.paths.default_image.clone(),
            display: config.paths.default_display.clone(),
            size: config.video.resolution,
            background: config.video.background,
        }
    }

    /// Write the letterboxed default image to `display`.
    pub fn render(&self) -> Result<&Path, ProcessError> {
        let img = image::open(&self.source).map_err(|source| ProcessError::Render {
            path: self.source.clone(),
            source,
        })?;
        if let Some(parent) = self.display.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        letterbox(&img, self.size, self.background)
            .save(&self.display)
            .map_err(|source| ProcessError::Render {
                path: self.display.clone(),
                source,
            })?;
        Ok(&self.display)
    }
}

pub struct PlaybackController {
    player: Player,
    taskbar: Taskbar,
}

impl PlaybackController {
    pub fn new(player: Player, taskbar: Taskbar) -> Self {
        Self { player, taskbar }
    }

    pub fn from_config(config: &FrameConfig) -> Self {
        Self::new(
            Player::from_config(&config.player),
            Taskbar::new(config.taskbar.clone()),
        )
    }

    /// Replace `previous` with a looping fullscreen player on `video`.
    pub fn play(
        &self,
        video: &Path,
        previous: Option<PlaybackHandle>,
    ) -> Result<PlaybackHandle, ProcessError> {
        if let Some(previous) = previous {
            previous.terminate();
        }
        self.taskbar.hide();
        let handle = self.player.launch(&self.player.video_args, video)?;
        info!("Playing {} (pid {})", video.display(), handle.pid());
        Ok(handle)
    }

    /// Render the default image and open it in a fullscreen viewer, replacing
    /// the previous viewer if one is given.
    pub fn show_default(
        &self,
        image: &DefaultImage,
        previous: Option<PlaybackHandle>,
    ) -> Result<PlaybackHandle, ProcessError> {
        let display_path = image.render()?;
        if let Some(previous) = previous {
            previous.terminate();
        }
        let handle = self.player.launch(&self.player.image_args, display_path)?;
        info!("Showing default image {} (pid {})", display_path.display(), handle.pid());
        Ok(handle)
    }

    pub fn restore_taskbar(&self) {
        self.taskbar.restore();
    }
}
