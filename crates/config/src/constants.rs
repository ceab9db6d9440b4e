//! Centralized constants
//!
//! Values that are part of the pipeline's contract rather than deployment
//! knobs live here.

/// Thumbnail target width in pixels; height preserves aspect ratio.
pub const THUMBNAIL_WIDTH: u32 = 320;

/// JPEG quality for thumbnails and face crops.
pub const JPEG_QUALITY: u8 = 85;

/// Videos shorter than this are sampled at one frame per second.
pub const SHORT_VIDEO_THRESHOLD_SECS: f64 = 90.0;

/// Frame rate assumed when the container does not report one.
pub const FALLBACK_FPS: f64 = 30.0;

/// Path prefix rewritten in external-host mode.
pub const MEDIA_PATH_PREFIX: &str = "/media/videos";

/// Capacity of the per-job progress channel. Intermediate events beyond this
/// are dropped; the final event is always delivered.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 32;

/// Sleep applied after an aggressive memory cleanup, in milliseconds.
pub const MEMORY_BACKOFF_MS: u64 = 500;

/// Minimum spacing between non-aggressive forced cleanups, in seconds.
pub const CLEANUP_MIN_INTERVAL_SECS: f64 = 5.0;

/// Detections with a side shorter than this (in original-frame pixels) are
/// discarded as noise.
pub const MIN_DETECTION_BOX_PX: f64 = 20.0;
