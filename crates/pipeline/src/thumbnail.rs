//! Frame thumbnails
//!
//! One JPEG per analyzed frame, written after the plugin chain has seen it:
//! width 320, height preserving aspect, quality 85, named by the MD5 of the
//! video path plus the frame index so concurrent jobs cannot collide.

use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, RgbImage};

use clipsight_config::constants::{JPEG_QUALITY, THUMBNAIL_WIDTH};
use clipsight_core::{Error, FrameRecord, Result};

/// `<dir>/<md5(video_path)>_<frame_idx>.jpeg`
pub fn thumbnail_path(dir: &Path, video_path: &str, frame_idx: i64) -> PathBuf {
    let hash = format!("{:x}", md5::compute(video_path.as_bytes()));
    dir.join(format!("{hash}_{frame_idx}.jpeg"))
}

/// Resize the frame to the thumbnail width and write it as a JPEG.
pub fn write_thumbnail(frame: &FrameRecord, path: &Path) -> Result<()> {
    let img = RgbImage::from_raw(frame.width, frame.height, frame.pixels.clone())
        .ok_or_else(|| Error::Analysis("Frame buffer does not match dimensions".to_string()))?;

    let target_height = ((frame.height as f64 * THUMBNAIL_WIDTH as f64 / frame.width.max(1) as f64)
        .round() as u32)
        .max(1);
    let resized = imageops::resize(
        &img,
        THUMBNAIL_WIDTH,
        target_height,
        imageops::FilterType::Triangle,
    );

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(path)?;
    let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), JPEG_QUALITY);
    encoder
        .encode_image(&resized)
        .map_err(|e| Error::Analysis(format!("Thumbnail encode failed: {e}")))?;
    Ok(())
}
