use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

mod normalize;
mod slideshow;
pub use normalize::{clear_folder, fit_within, letterbox, normalize_folder, NormalizedFrame};
pub use slideshow::{
    build_slideshow, collect_frames, concat_manifest, Encoder, EncodeSettings, FfmpegEncoder,
    SlideshowVideo,
};

/// Extensions accepted when no explicit list is configured.
pub const DEFAULT_IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to decode image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("no frames found in {0}")]
    NoFrames(PathBuf),
    #[error("ffmpeg not found on PATH; please install FFmpeg")]
    EncoderMissing,
    #[error("encoder failed: {0}")]
    EncoderFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ffprobe not found on PATH; please install FFmpeg (ffprobe)")]
    FfprobeMissing,
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Output frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(1280, 720)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Case-insensitive extension allow-list for image files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFilter {
    extensions: Vec<String>,
}

impl ImageFilter {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(OsStr::to_str)
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|allowed| *allowed == ext)
            })
            .unwrap_or(false)
    }

    /// Same check on a bare file name, as received from an upload form.
    pub fn matches_name(&self, name: &str) -> bool {
        name.contains('.') && self.matches(Path::new(name))
    }
}

impl Default for ImageFilter {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE_EXTENSIONS)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    nb_frames: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct FfprobeJson {
    streams: Option<Vec<FfprobeStream>>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frames: Option<u64>,
    pub duration_seconds: Option<f64>,
}

/// Inspect an encoded slideshow with ffprobe.
pub fn probe_video(path: &Path) -> Result<VideoInfo, ProbeError> {
    let ffprobe = which::which("ffprobe").map_err(|_| ProbeError::FfprobeMissing)?;
    let out = Command::new(ffprobe)
        .arg("-v")
        .arg("error")
        .arg("-show_format")
        .arg("-show_streams")
        .arg("-print_format")
        .arg("json")
        .arg(path)
        .output()
        .map_err(|e| ProbeError::FfprobeFailed(e.to_string()))?;
    if !out.status.success() {
        return Err(ProbeError::FfprobeFailed(
            String::from_utf8_lossy(&out.stderr).into(),
        ));
    }
    parse_probe_output(path, &out.stdout)
}

fn parse_probe_output(path: &Path, stdout: &[u8]) -> Result<VideoInfo, ProbeError> {
    let parsed: FfprobeJson =
        serde_json::from_slice(stdout).map_err(|e| ProbeError::Parse(e.to_string()))?;

    let video = parsed
        .streams
        .unwrap_or_default()
        .into_iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    let duration_seconds = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse().ok());

    Ok(VideoInfo {
        path: path.to_path_buf(),
        codec: video.as_ref().and_then(|s| s.codec_name.clone()),
        width: video.as_ref().and_then(|s| s.width),
        height: video.as_ref().and_then(|s| s.height),
        frames: video
            .as_ref()
            .and_then(|s| s.nb_frames.as_deref())
            .and_then(|n| n.parse().ok()),
        duration_seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_is_case_insensitive() {
        let filter = ImageFilter::default();
        assert!(filter.matches(Path::new("holiday.JPG")));
        assert!(filter.matches(Path::new("dir/scan.Png")));
        assert!(!filter.matches(Path::new("notes.txt")));
        assert!(!filter.matches(Path::new("no_extension")));
    }

    #[test]
    fn filter_normalizes_configured_extensions() {
        let filter = ImageFilter::new([".WEBP", "", "png"]);
        assert_eq!(filter.extensions(), &["webp".to_string(), "png".to_string()]);
        assert!(filter.matches_name("a.webp"));
        assert!(!filter.matches_name("png"));
    }

    #[test]
    fn parses_probe_json() {
        let json = br#"{
            "streams": [
                {"codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720, "nb_frames": "120"}
            ],
            "format": {"duration": "120.000000"}
        }"#;
        let info = parse_probe_output(Path::new("slideshow.mp4"), json).unwrap();
        assert_eq!(info.codec.as_deref(), Some("h264"));
        assert_eq!(info.width, Some(1280));
        assert_eq!(info.height, Some(720));
        assert_eq!(info.frames, Some(120));
        assert_eq!(info.duration_seconds, Some(120.0));
    }
}
