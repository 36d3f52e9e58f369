/// Slideshow encoding: ordered still frames held for a fixed duration each
use crate::{EncodeError, ImageFilter};
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Encoding parameters for a slideshow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    /// How long each frame stays on screen, in whole seconds.
    pub frame_duration_secs: u32,
    /// Encoded frames per second. One frame per duration unit keeps files tiny.
    pub fps: u32,
    pub codec: String,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            frame_duration_secs: 60,
            fps: 1,
            codec: "libx264".to_string(),
        }
    }
}

/// Result of a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlideshowVideo {
    pub path: PathBuf,
    /// Frame file names in playback order.
    pub frames: Vec<String>,
    pub frame_duration_secs: u32,
    pub fps: u32,
    pub codec: String,
}

/// Something that turns an ordered frame list into a video file.
pub trait Encoder: Send + Sync {
    fn name(&self) -> &str;

    /// Encode `frames` (already ordered, never empty) into `output`.
    fn encode(
        &self,
        frames: &[PathBuf],
        output: &Path,
        settings: &EncodeSettings,
    ) -> Result<(), EncodeError>;
}

/// Allowed images in `dir`, sorted lexicographically by file name.
pub fn collect_frames(dir: &Path, filter: &ImageFilter) -> Result<Vec<PathBuf>, EncodeError> {
    let mut frames = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && filter.matches(&path) {
            frames.push(path);
        }
    }
    frames.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    if frames.is_empty() {
        return Err(EncodeError::NoFrames(dir.to_path_buf()));
    }
    Ok(frames)
}

/// ffconcat script holding each frame for `frame_duration_secs`.
///
/// The last file is listed twice: the concat demuxer ignores the duration of
/// the final entry otherwise.
pub fn concat_manifest(frames: &[PathBuf], frame_duration_secs: u32) -> String {
    let mut out = String::from("ffconcat version 1.0\n");
    for frame in frames {
        out.push_str(&format!("file '{}'\n", escape_concat_path(frame)));
        out.push_str(&format!("duration {}\n", frame_duration_secs));
    }
    if let Some(last) = frames.last() {
        out.push_str(&format!("file '{}'\n", escape_concat_path(last)));
    }
    out
}

fn escape_concat_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', r"'\''")
}

/// Build a slideshow from the frames in `frames_dir` into `output`.
///
/// Fails with [`EncodeError::NoFrames`] before touching `output` when the
/// folder holds no frames. The encoder writes to a sibling temp file that is
/// renamed over `output` only after it succeeds.
pub fn build_slideshow(
    encoder: &dyn Encoder,
    frames_dir: &Path,
    output: &Path,
    settings: &EncodeSettings,
    filter: &ImageFilter,
) -> Result<SlideshowVideo, EncodeError> {
    let frames = collect_frames(frames_dir, filter)?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let partial = partial_path(output);
    let result = encoder.encode(&frames, &partial, settings);
    if let Err(e) = result {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    fs::rename(&partial, output)?;

    let names: Vec<String> = frames
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect();
    info!(
        "Built {} with {} frames ({}s each) using {}",
        output.display(),
        names.len(),
        settings.frame_duration_secs,
        encoder.name()
    );

    Ok(SlideshowVideo {
        path: output.to_path_buf(),
        frames: names,
        frame_duration_secs: settings.frame_duration_secs,
        fps: settings.fps,
        codec: settings.codec.clone(),
    })
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(output.file_name().unwrap_or_else(|| OsStr::new("slideshow.mp4")));
    name.push(".partial");
    output.with_file_name(name)
}

/// Encoder backed by the ffmpeg binary and its concat demuxer.
#[derive(Debug, Clone, Default)]
pub struct FfmpegEncoder {
    program: Option<PathBuf>,
}

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit ffmpeg binary instead of looking it up on PATH.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
        }
    }

    fn resolve(&self) -> Result<PathBuf, EncodeError> {
        match &self.program {
            Some(p) => Ok(p.clone()),
            None => which::which("ffmpeg").map_err(|_| EncodeError::EncoderMissing),
        }
    }

    fn args(manifest: &Path, output: &Path, settings: &EncodeSettings) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "concat",
            "-safe",
            "0",
            "-i",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(manifest.as_os_str().to_owned());
        for arg in [
            "-r".to_string(),
            settings.fps.to_string(),
            "-c:v".to_string(),
            settings.codec.clone(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-f".to_string(),
            "mp4".to_string(),
            "-y".to_string(),
        ] {
            args.push(arg.into());
        }
        args.push(output.as_os_str().to_owned());
        args
    }
}

impl Encoder for FfmpegEncoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn encode(
        &self,
        frames: &[PathBuf],
        output: &Path,
        settings: &EncodeSettings,
    ) -> Result<(), EncodeError> {
        let ffmpeg = self.resolve()?;

        // The manifest must carry absolute paths; the demuxer resolves
        // relative entries against the manifest's own directory.
        let absolute: Vec<PathBuf> = frames
            .iter()
            .map(fs::canonicalize)
            .collect::<Result<_, _>>()?;
        let mut manifest = output.as_os_str().to_owned();
        manifest.push(".ffconcat");
        let manifest = PathBuf::from(manifest);
        fs::write(&manifest, concat_manifest(&absolute, settings.frame_duration_secs))?;

        let args = Self::args(&manifest, output, settings);
        debug!("Running {} {:?}", ffmpeg.display(), args);
        let result = Command::new(&ffmpeg).args(&args).output();
        let _ = fs::remove_file(&manifest);

        let out = result.map_err(|e| EncodeError::EncoderFailed(e.to_string()))?;
        if !out.status.success() {
            return Err(EncodeError::EncoderFailed(
                String::from_utf8_lossy(&out.stderr).into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Records the frame order it was asked to encode.
    #[derive(Default)]
    struct RecordingEncoder {
        seen: Mutex<Vec<String>>,
        fail: bool,
    }

    impl Encoder for RecordingEncoder {
        fn name(&self) -> &str {
            "recording"
        }

        fn encode(
            &self,
            frames: &[PathBuf],
            output: &Path,
            _settings: &EncodeSettings,
        ) -> Result<(), EncodeError> {
            if self.fail {
                fs::write(output, b"half a video")?;
                return Err(EncodeError::EncoderFailed("boom".into()));
            }
            let names = frames
                .iter()
                .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
                .collect();
            *self.seen.lock().unwrap() = names;
            fs::write(output, b"video")?;
            Ok(())
        }
    }

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn frames_are_sorted_by_file_name() {
        let dir = tempdir().unwrap();
        for name in ["c.png", "a.png", "B.jpg", "b.jpg", "notes.txt"] {
            touch(dir.path(), name);
        }
        let frames = collect_frames(dir.path(), &ImageFilter::default()).unwrap();
        let names: Vec<_> = frames
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["B.jpg", "a.png", "b.jpg", "c.png"]);
    }

    #[test]
    fn empty_folder_fails_without_output() {
        let frames = tempdir().unwrap();
        let out = tempdir().unwrap();
        let output = out.path().join("slideshow.mp4");
        let encoder = RecordingEncoder::default();

        let err = build_slideshow(
            &encoder,
            frames.path(),
            &output,
            &EncodeSettings::default(),
            &ImageFilter::default(),
        )
        .unwrap_err();

        assert!(matches!(err, EncodeError::NoFrames(_)));
        assert!(!output.exists());
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn build_passes_frames_in_order_and_replaces_output() {
        let frames = tempdir().unwrap();
        let out = tempdir().unwrap();
        touch(frames.path(), "b.jpg");
        touch(frames.path(), "a.png");
        let output = out.path().join("slideshow.mp4");
        fs::write(&output, b"old").unwrap();

        let encoder = RecordingEncoder::default();
        let video = build_slideshow(
            &encoder,
            frames.path(),
            &output,
            &EncodeSettings::default(),
            &ImageFilter::default(),
        )
        .unwrap();

        assert_eq!(video.frames, vec!["a.png", "b.jpg"]);
        assert_eq!(*encoder.seen.lock().unwrap(), vec!["a.png", "b.jpg"]);
        assert_eq!(fs::read(&output).unwrap(), b"video");
        assert_eq!(video.fps, 1);
        assert_eq!(video.codec, "libx264");
    }

    #[test]
    fn failed_encode_leaves_previous_output_untouched() {
        let frames = tempdir().unwrap();
        let out = tempdir().unwrap();
        touch(frames.path(), "a.png");
        let output = out.path().join("slideshow.mp4");
        fs::write(&output, b"old").unwrap();

        let encoder = RecordingEncoder {
            fail: true,
            ..Default::default()
        };
        let err = build_slideshow(
            &encoder,
            frames.path(),
            &output,
            &EncodeSettings::default(),
            &ImageFilter::default(),
        )
        .unwrap_err();

        assert!(matches!(err, EncodeError::EncoderFailed(_)));
        assert_eq!(fs::read(&output).unwrap(), b"old");
        assert!(!partial_path(&output).exists());
    }

    #[test]
    fn manifest_holds_each_frame_for_duration() {
        let frames = vec![PathBuf::from("/f/a.png"), PathBuf::from("/f/it's.jpg")];
        let manifest = concat_manifest(&frames, 60);
        assert_eq!(
            manifest,
            "ffconcat version 1.0\n\
             file '/f/a.png'\nduration 60\n\
             file '/f/it'\\''s.jpg'\nduration 60\n\
             file '/f/it'\\''s.jpg'\n"
        );
    }

    #[test]
    fn ffmpeg_args_use_one_frame_per_second() {
        let args = FfmpegEncoder::args(
            Path::new("list.ffconcat"),
            Path::new("out.mp4"),
            &EncodeSettings::default(),
        );
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let joined = args.join(" ");
        assert!(joined.contains("-f concat -safe 0 -i list.ffconcat"));
        assert!(joined.contains("-r 1 -c:v libx264 -pix_fmt yuv420p"));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }
}
