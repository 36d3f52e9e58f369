/// Letterboxing of arbitrary images onto a fixed-size canvas
use crate::{DecodeError, ImageFilter, Resolution};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One padded image written by [`normalize_folder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedFrame {
    pub source_name: String,
    pub path: PathBuf,
    pub size: Resolution,
    pub background: [u8; 3],
}

/// Largest size with the same aspect ratio that fits inside `max`.
///
/// Images already inside the box keep their size; they are never upscaled.
pub fn fit_within(width: u32, height: u32, max: Resolution) -> (u32, u32) {
    if width <= max.width && height <= max.height {
        return (width.max(1), height.max(1));
    }
    let ratio = f64::min(
        max.width as f64 / width as f64,
        max.height as f64 / height as f64,
    );
    let w = ((width as f64 * ratio).round() as u32).clamp(1, max.width);
    let h = ((height as f64 * ratio).round() as u32).clamp(1, max.height);
    (w, h)
}

/// Scale `img` down into `size` and centre it on a `background` canvas.
pub fn letterbox(img: &DynamicImage, size: Resolution, background: [u8; 3]) -> RgbImage {
    let rgb = img.to_rgb8();
    let (w, h) = fit_within(rgb.width(), rgb.height(), size);
    let scaled = if (w, h) == rgb.dimensions() {
        rgb
    } else {
        imageops::resize(&rgb, w, h, FilterType::Lanczos3)
    };

    let mut canvas = RgbImage::from_pixel(size.width, size.height, Rgb(background));
    let x = (size.width - w) / 2;
    let y = (size.height - h) / 2;
    imageops::overlay(&mut canvas, &scaled, x as i64, y as i64);
    canvas
}

/// Delete every regular file directly inside `dir`. Subdirectories are left alone.
pub fn clear_folder(dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Letterbox every allowed image of `src` into `dst`, keeping file names.
///
/// `dst` is created when missing and emptied otherwise, so frames from a
/// previous pass never survive. The first undecodable image aborts the pass.
pub fn normalize_folder(
    src: &Path,
    dst: &Path,
    size: Resolution,
    background: [u8; 3],
    filter: &ImageFilter,
) -> Result<Vec<NormalizedFrame>, DecodeError> {
    if dst.is_dir() {
        let removed = clear_folder(dst)?;
        debug!("Cleared {} stale frames from {}", removed, dst.display());
    } else {
        fs::create_dir_all(dst)?;
    }

    let mut frames = Vec::new();
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() || !filter.matches(&path) {
            continue;
        }
        let source_name = entry.file_name().to_string_lossy().into_owned();

        let img = image::open(&path).map_err(|source| DecodeError::Image {
            path: path.clone(),
            source,
        })?;
        let canvas = letterbox(&img, size, background);

        let out = dst.join(entry.file_name());
        canvas.save(&out).map_err(|source| DecodeError::Image {
            path: out.clone(),
            source,
        })?;
        debug!("Normalized {} -> {}", path.display(), out.display());

        frames.push(NormalizedFrame {
            source_name,
            path: out,
            size,
            background,
        });
    }

    info!(
        "Normalized {} images from {} at {}",
        frames.len(),
        src.display(),
        size
    );
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;
    use tempfile::tempdir;

    const TARGET: Resolution = Resolution::new(1280, 720);

    fn write_image(path: &Path, width: u32, height: u32) {
        RgbImage::from_pixel(width, height, Rgb([200, 10, 10]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn fit_never_upscales() {
        assert_eq!(fit_within(640, 480, TARGET), (640, 480));
        assert_eq!(fit_within(1280, 720, TARGET), (1280, 720));
    }

    #[test]
    fn fit_preserves_aspect_ratio() {
        assert_eq!(fit_within(2560, 1440, TARGET), (1280, 720));
        assert_eq!(fit_within(1000, 2000, TARGET), (360, 720));
        assert_eq!(fit_within(4000, 1000, TARGET), (1280, 320));
    }

    #[test]
    fn letterbox_pads_with_background() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 100, Rgb([0, 0, 255])));
        let out = letterbox(&img, Resolution::new(300, 100), [255, 255, 255]);
        assert_eq!(out.dimensions(), (300, 100));
        assert_eq!(out.get_pixel(0, 50), &Rgb([255, 255, 255]));
        assert_eq!(out.get_pixel(150, 50), &Rgb([0, 0, 255]));
        assert_eq!(out.get_pixel(299, 50), &Rgb([255, 255, 255]));
    }

    #[test]
    fn normalized_frames_match_target_exactly() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        write_image(&src.path().join("wide.png"), 3000, 500);
        write_image(&src.path().join("tall.jpg"), 400, 1600);
        write_image(&src.path().join("small.png"), 64, 48);

        let frames =
            normalize_folder(src.path(), dst.path(), TARGET, [0, 0, 0], &ImageFilter::default())
                .unwrap();
        assert_eq!(frames.len(), 3);

        for frame in &frames {
            let img = image::open(&frame.path).unwrap();
            assert_eq!(img.dimensions(), (1280, 720), "{}", frame.source_name);
        }

        // The small image sits unscaled in the middle of the canvas.
        let small = image::open(dst.path().join("small.png")).unwrap().to_rgb8();
        assert_eq!(small.get_pixel(640, 360), &Rgb([200, 10, 10]));
        assert_eq!(small.get_pixel(640 - 33, 360), &Rgb([0, 0, 0]));
    }

    #[test]
    fn stale_frames_are_purged_and_non_images_skipped() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        write_image(&src.path().join("keep.png"), 10, 10);
        fs::write(src.path().join("readme.txt"), "not an image").unwrap();
        fs::write(dst.path().join("stale.png"), "old").unwrap();

        normalize_folder(src.path(), dst.path(), TARGET, [0, 0, 0], &ImageFilter::default())
            .unwrap();

        let mut names: Vec<_> = fs::read_dir(dst.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["keep.png".to_string()]);
    }

    #[test]
    fn missing_output_folder_is_created() {
        let src = tempdir().unwrap();
        let root = tempdir().unwrap();
        let dst = root.path().join("resized_images");
        write_image(&src.path().join("a.png"), 20, 20);

        normalize_folder(src.path(), &dst, TARGET, [0, 0, 0], &ImageFilter::default()).unwrap();
        assert!(dst.join("a.png").is_file());
    }

    #[test]
    fn corrupt_image_aborts_the_pass() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        fs::write(src.path().join("broken.png"), b"definitely not a png").unwrap();

        let err =
            normalize_folder(src.path(), dst.path(), TARGET, [0, 0, 0], &ImageFilter::default())
                .unwrap_err();
        assert!(matches!(err, DecodeError::Image { .. }));
    }
}
