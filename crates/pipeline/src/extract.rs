//! Streaming frame extraction
//!
//! Lazily pulls sampled frames out of a container: one backward keyframe
//! seek per sample, decode forward until the target time, convert to RGB24
//! through the software scaler (downscaling when the source is taller than
//! the configured height), and hand the pixels downstream as a
//! [`FrameRecord`].

use std::path::Path;

use ffmpeg_the_third as ffmpeg;

use ffmpeg::format::{input, Pixel};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};

use clipsight_config::constants::{FALLBACK_FPS, SHORT_VIDEO_THRESHOLD_SECS};
use clipsight_core::{Error, FrameRecord, Result};

/// Sampling plan derived from the container before any frame is decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionPlan {
    pub fps: f64,
    pub total_frames: i64,
    /// Source frames between samples.
    pub stride: i64,
    /// Stride expressed in seconds.
    pub stride_seconds: f64,
    pub total_sampled_frames: u64,
    pub scale_factor: f64,
    pub original_width: u32,
    pub original_height: u32,
}

/// Stride selection: short videos are sampled once per second, longer ones
/// every `sample_interval_seconds`.
pub fn sampling_stride(fps: f64, duration_seconds: f64, sample_interval_seconds: f64) -> i64 {
    let stride = if duration_seconds < SHORT_VIDEO_THRESHOLD_SECS {
        fps.round() as i64
    } else {
        (fps * sample_interval_seconds).round() as i64
    };
    stride.max(1)
}

pub fn total_sampled_frames(total_frames: i64, stride: i64) -> u64 {
    if total_frames <= 0 || stride <= 0 {
        return 0;
    }
    ((total_frames + stride - 1) / stride) as u64
}

/// Output dimensions and the coordinate scale factor for a source frame.
/// Frames at or under the target height pass through unscaled.
pub fn scaled_dimensions(width: u32, height: u32, target_height: u32) -> (u32, u32, f64) {
    if height <= target_height {
        return (width, height, 1.0);
    }
    let target_width =
        ((width as f64 * target_height as f64 / height as f64).round() as u32).max(2);
    (
        target_width,
        target_height,
        height as f64 / target_height as f64,
    )
}

pub struct FrameStream {
    ictx: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::video::Video,
    scaler: SwsContext,
    video_idx: usize,
    tb_num: i32,
    tb_den: i32,
    out_w: u32,
    out_h: u32,
    plan: ExtractionPlan,
    next_sample: u64,
    last_emitted_pts: i64,
    failed: bool,
}

impl FrameStream {
    /// Open the container and derive the sampling plan.
    pub fn open(
        video_path: &Path,
        target_height: u32,
        sample_interval_seconds: f64,
    ) -> Result<Self> {
        let path_buf = video_path.to_path_buf();
        let ictx = input(&path_buf).map_err(|e| Error::Extraction(e.to_string()))?;
        let video_idx = ictx
            .streams()
            .best(Type::Video)
            .ok_or_else(|| Error::Extraction("No video stream".to_string()))?
            .index();

        let (tb_num, tb_den, fps, total_frames) = {
            let stream = ictx
                .stream(video_idx)
                .ok_or_else(|| Error::Extraction("Video stream vanished".to_string()))?;
            let tb = stream.time_base();
            let rate = stream.avg_frame_rate();
            let fps = if rate.numerator() > 0 && rate.denominator() > 0 {
                rate.numerator() as f64 / rate.denominator() as f64
            } else {
                FALLBACK_FPS
            };
            (tb.numerator(), tb.denominator(), fps, stream.frames())
        };

        if total_frames <= 0 {
            return Err(Error::Extraction("Cannot determine frame count".to_string()));
        }

        let duration_seconds = total_frames as f64 / fps;
        let stride = sampling_stride(fps, duration_seconds, sample_interval_seconds);

        // Second context for decoder construction (Parameters borrows from
        // the stream).
        let ictx2 = input(&path_buf).map_err(|e| Error::Extraction(e.to_string()))?;
        let stream2 = ictx2
            .stream(video_idx)
            .ok_or_else(|| Error::Extraction("Video stream vanished".to_string()))?;
        let dec_ctx = ffmpeg::codec::context::Context::from_parameters(stream2.parameters())
            .map_err(|e| Error::Extraction(e.to_string()))?;
        let decoder = dec_ctx
            .decoder()
            .video()
            .map_err(|e| Error::Extraction(e.to_string()))?;

        let (original_width, original_height) = (decoder.width(), decoder.height());
        let (out_w, out_h, scale_factor) =
            scaled_dimensions(original_width, original_height, target_height);

        let scaler = SwsContext::get(
            decoder.format(),
            original_width,
            original_height,
            Pixel::RGB24,
            out_w,
            out_h,
            Flags::BILINEAR,
        )
        .map_err(|e| Error::Extraction(e.to_string()))?;

        let plan = ExtractionPlan {
            fps,
            total_frames,
            stride,
            stride_seconds: stride as f64 / fps,
            total_sampled_frames: total_sampled_frames(total_frames, stride),
            scale_factor,
            original_width,
            original_height,
        };

        tracing::info!(
            video = %video_path.display(),
            total_frames,
            stride,
            sampled = plan.total_sampled_frames,
            "Opened video for extraction"
        );

        Ok(Self {
            ictx,
            decoder,
            scaler,
            video_idx,
            tb_num,
            tb_den,
            out_w,
            out_h,
            plan,
            next_sample: 0,
            last_emitted_pts: i64::MIN,
            failed: false,
        })
    }

    pub fn plan(&self) -> &ExtractionPlan {
        &self.plan
    }

    /// Seek to the sample target and decode forward until a frame at or past
    /// it comes out. Returns None at end of stream.
    fn decode_sample(&mut self, target_secs: f64) -> Result<Option<FrameRecord>> {
        let tb_num = self.tb_num as f64;
        let tb_den = self.tb_den as f64;
        let seek_pts = (target_secs * tb_den / tb_num) as i64;
        self.ictx
            .seek(seek_pts, ..=seek_pts)
            .map_err(|e| Error::Extraction(format!("Seek failed: {e}")))?;
        self.decoder.flush();

        let mut last_pts: i64 = seek_pts.saturating_sub(1);
        for (stream, packet) in self.ictx.packets().flatten() {
            if stream.index() != self.video_idx {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .map_err(|e| Error::Extraction(format!("Decode failed: {e}")))?;

            let mut decoded = ffmpeg::util::frame::video::Video::empty();
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let pts = decoded.pts().unwrap_or(last_pts + 1);
                last_pts = pts;
                let ts_secs = pts as f64 * tb_num / tb_den;
                // Frames before the target come from the keyframe-aligned
                // seek; decode-only and move on. Emitted timestamps must
                // stay strictly increasing across samples.
                if ts_secs < target_secs || pts <= self.last_emitted_pts {
                    continue;
                }
                self.last_emitted_pts = pts;

                let mut out = ffmpeg::util::frame::video::Video::empty();
                self.scaler
                    .run(&decoded, &mut out)
                    .map_err(|e| Error::Extraction(format!("Scale failed: {e}")))?;

                // Destripe: copy only visible pixels, not stride padding.
                let stride = out.stride(0);
                let raw = out.data(0);
                let row_bytes = self.out_w as usize * 3;
                let pixels: Vec<u8> = (0..self.out_h as usize)
                    .flat_map(|row| &raw[row * stride..row * stride + row_bytes])
                    .copied()
                    .collect();

                let start_time_ms = (ts_secs * 1000.0).round() as i64;
                let end_time_ms =
                    ((ts_secs + self.plan.stride_seconds) * 1000.0).round() as i64;

                return Ok(Some(FrameRecord {
                    pixels,
                    width: self.out_w,
                    height: self.out_h,
                    frame_idx: pts,
                    start_time_ms,
                    end_time_ms,
                    scale_factor: self.plan.scale_factor,
                    original_width: self.plan.original_width,
                    original_height: self.plan.original_height,
                }));
            }
        }
        Ok(None)
    }
}

impl Iterator for FrameStream {
    type Item = Result<FrameRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next_sample >= self.plan.total_sampled_frames {
            return None;
        }

        let target_secs = self.next_sample as f64 * self.plan.stride_seconds;
        self.next_sample += 1;

        match self.decode_sample(target_secs) {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_video_samples_once_per_second() {
        // 60 s at 30 fps: stride 30, exactly 60 samples.
        let stride = sampling_stride(30.0, 60.0, 2.5);
        assert_eq!(stride, 30);
        assert_eq!(total_sampled_frames(1800, stride), 60);
    }

    #[test]
    fn test_long_video_uses_sample_interval() {
        let stride = sampling_stride(30.0, 600.0, 2.5);
        assert_eq!(stride, 75);
    }

    #[test]
    fn test_stride_never_below_one() {
        assert_eq!(sampling_stride(0.2, 10.0, 2.5), 1);
        assert_eq!(sampling_stride(0.1, 1000.0, 0.5), 1);
    }

    #[test]
    fn test_fractional_fps_rounds() {
        // NTSC 29.97 under 90 s rounds to 30.
        assert_eq!(sampling_stride(29.97, 60.0, 2.5), 30);
    }

    #[test]
    fn test_total_sampled_rounds_up() {
        assert_eq!(total_sampled_frames(1801, 30), 61);
        assert_eq!(total_sampled_frames(0, 30), 0);
    }

    #[test]
    fn test_scaled_dimensions_preserve_aspect() {
        let (w, h, scale) = scaled_dimensions(1920, 1080, 720);
        assert_eq!((w, h), (1280, 720));
        assert!((scale - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_small_frames_pass_through() {
        let (w, h, scale) = scaled_dimensions(640, 360, 720);
        assert_eq!((w, h), (640, 360));
        assert_eq!(scale, 1.0);
    }

    #[test]
    fn test_scale_factor_recovers_original_coordinates() {
        // A bbox at (100, 100, 200, 200) on the processed frame maps to
        // (150, 150, 300, 300) on the original.
        let (_, _, scale) = scaled_dimensions(1920, 1080, 720);
        assert_eq!(100.0 * scale, 150.0);
        assert_eq!(200.0 * scale, 300.0);
    }

    #[test]
    fn test_open_missing_file_is_extraction_error() {
        let err = FrameStream::open(Path::new("/nonexistent/video.mp4"), 720, 2.5).unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }
}
