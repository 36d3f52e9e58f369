//! Runtime configuration for the picture frame.
//!
//! Every constant of the slideshow pipeline lives in [`FrameConfig`]. The two
//! deployment variants differ only in values, so they are expressed as
//! presets ([`FrameConfig::cloud`] and [`FrameConfig::upload`]) rather than as
//! separate code paths. Config files are JSON; missing keys fall back to the
//! cloud preset.

use media_io::{EncodeSettings, ImageFilter, Resolution, DEFAULT_IMAGE_EXTENSIONS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub fn app_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
    base.join("picture_frame")
}

/// Where `frame-cli` looks for its config when `--config` is not given.
pub fn default_config_path() -> PathBuf {
    app_data_dir().join("config.json")
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to access config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Mirror a cloud folder.
    Cloud,
    /// Accept images from the local upload form.
    Upload,
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cloud => write!(f, "cloud"),
            Self::Upload => write!(f, "upload"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Seconds between two cycles of the loop.
    pub poll_interval_secs: u64,
    /// Lower-case extensions treated as images.
    pub allowed_extensions: Vec<String>,
    pub video: VideoConfig,
    pub paths: PathsConfig,
    pub drive: DriveConfig,
    pub player: PlayerConfig,
    pub taskbar: TaskbarConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub resolution: Resolution,
    pub frame_duration_secs: u32,
    pub fps: u32,
    pub codec: String,
    /// Padding colour around letterboxed images.
    pub background: [u8; 3],
    /// Empty the scratch frame folder once the video is built.
    pub clear_frames_after_build: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            frame_duration_secs: 60,
            fps: 1,
            codec: "libx264".to_string(),
            background: [255, 255, 255],
            clear_frames_after_build: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Local mirror of the cloud folder.
    pub images_dir: PathBuf,
    /// Scratch folder for normalized frames.
    pub resized_dir: PathBuf,
    /// Where the upload form stores files.
    pub upload_dir: PathBuf,
    pub video_file: PathBuf,
    pub upload_marker: PathBuf,
    /// Image shown when a cycle fails.
    pub default_image: PathBuf,
    /// Letterboxed copy of `default_image` handed to the viewer.
    pub default_display: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            images_dir: "images".into(),
            resized_dir: "resized_images".into(),
            upload_dir: "uploaded_images".into(),
            video_file: "slideshow.mp4".into(),
            upload_marker: "upload_complete.txt".into(),
            default_image: "default.jpg".into(),
            default_display: "default_display.jpg".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub folder_id: String,
    /// Service-account key file.
    pub credentials_file: PathBuf,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            folder_id: String::new(),
            credentials_file: "service_account_key.json".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub program: String,
    /// Arguments placed before the video path.
    pub video_args: Vec<String>,
    /// Arguments placed before the fallback image path.
    pub image_args: Vec<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            program: "mpv".to_string(),
            video_args: vec!["--loop".to_string(), "--fs".to_string()],
            image_args: vec![
                "--fs".to_string(),
                "--image-display-duration=inf".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskbarConfig {
    pub enabled: bool,
    pub program: String,
    pub hide_args: Vec<String>,
    pub restore_args: Vec<String>,
}

impl Default for TaskbarConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            program: "lxpanelctl".to_string(),
            hide_args: vec!["stop".to_string()],
            restore_args: vec!["restart".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub max_upload_files: usize,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            max_upload_files: 20,
            max_upload_bytes: 256 * 1024 * 1024,
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self::cloud()
    }
}

impl FrameConfig {
    /// Cloud-folder mirror: white padding, `slideshow.mp4`.
    pub fn cloud() -> Self {
        Self {
            poll_interval_secs: 60,
            allowed_extensions: DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            video: VideoConfig::default(),
            paths: PathsConfig::default(),
            drive: DriveConfig::default(),
            player: PlayerConfig::default(),
            taskbar: TaskbarConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Upload form: black padding, `output_video.mp4`, taskbar hidden while
    /// playing, scratch frames dropped after each build.
    pub fn upload() -> Self {
        let mut cfg = Self::cloud();
        cfg.poll_interval_secs = 1;
        cfg.video.background = [0, 0, 0];
        cfg.video.clear_frames_after_build = true;
        cfg.paths.video_file = "output_video.mp4".into();
        cfg.taskbar.enabled = true;
        cfg
    }

    pub fn for_variant(variant: Variant) -> Self {
        match variant {
            Variant::Cloud => Self::cloud(),
            Variant::Upload => Self::upload(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let json = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: Self = serde_json::from_str(&json).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let io_err = |source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(io_err)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let res = self.video.resolution;
        if res.width == 0 || res.height == 0 {
            return Err(SettingsError::Invalid(format!(
                "video resolution must be non-zero, got {}",
                res
            )));
        }
        // yuv420p needs even dimensions.
        if res.width % 2 != 0 || res.height % 2 != 0 {
            return Err(SettingsError::Invalid(format!(
                "video resolution must be even, got {}",
                res
            )));
        }
        if self.video.frame_duration_secs == 0 {
            return Err(SettingsError::Invalid(
                "frame_duration_secs must be greater than zero".to_string(),
            ));
        }
        if self.video.fps == 0 {
            return Err(SettingsError::Invalid(
                "fps must be greater than zero".to_string(),
            ));
        }
        if self.image_filter().extensions().is_empty() {
            return Err(SettingsError::Invalid(
                "allowed_extensions must not be empty".to_string(),
            ));
        }
        if self.server.max_upload_files == 0 {
            return Err(SettingsError::Invalid(
                "max_upload_files must be greater than zero".to_string(),
            ));
        }
        if self.player.program.trim().is_empty() {
            return Err(SettingsError::Invalid(
                "player program must be set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn image_filter(&self) -> ImageFilter {
        ImageFilter::new(&self.allowed_extensions)
    }

    pub fn encode_settings(&self) -> EncodeSettings {
        EncodeSettings {
            frame_duration_secs: self.video.frame_duration_secs,
            fps: self.video.fps,
            codec: self.video.codec.clone(),
        }
    }

    /// Resolve every relative path against `root`.
    pub fn rooted(mut self, root: &Path) -> Self {
        let p = &mut self.paths;
        for path in [
            &mut p.images_dir,
            &mut p.resized_dir,
            &mut p.upload_dir,
            &mut p.video_file,
            &mut p.upload_marker,
            &mut p.default_image,
            &mut p.default_display,
            &mut self.drive.credentials_file,
        ] {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        }
        self
    }
}
