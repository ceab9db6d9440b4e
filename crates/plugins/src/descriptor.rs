//! Frame descriptor plugin
//!
//! Captioning is delegated to an HTTP sidecar: the frame is encoded as a
//! JPEG and posted to the configured endpoint, which replies with a short
//! natural-language description. An unreachable sidecar degrades to frames
//! without captions.

use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use clipsight_config::constants::JPEG_QUALITY;
use clipsight_core::{Error, FrameAnalysis, FramePlugin, FrameRecord, PluginDelta, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct CaptionResponse {
    caption: String,
}

pub struct DescriptorPlugin {
    endpoint: String,
    client: reqwest::blocking::Client,
    descriptions: Vec<String>,
}

impl DescriptorPlugin {
    pub fn new(endpoint: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Plugin(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            endpoint,
            client,
            descriptions: Vec::new(),
        })
    }

    fn caption(&self, frame: &FrameRecord) -> Result<String> {
        let jpeg = encode_jpeg(frame)?;
        let part = reqwest::blocking::multipart::Part::bytes(jpeg)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| Error::Plugin(e.to_string()))?;
        let form = reqwest::blocking::multipart::Form::new().part("image", part);

        let response = self
            .client
            .post(format!("{}/caption", self.endpoint))
            .multipart(form)
            .send()
            .map_err(|e| Error::Plugin(format!("Caption request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Plugin(format!(
                "Caption service returned {}",
                response.status()
            )));
        }

        let parsed: CaptionResponse = response
            .json()
            .map_err(|e| Error::Plugin(format!("Bad caption response: {e}")))?;
        Ok(parsed.caption.to_lowercase())
    }
}

fn encode_jpeg(frame: &FrameRecord) -> Result<Vec<u8>> {
    use image::codecs::jpeg::JpegEncoder;
    use image::RgbImage;

    let img = RgbImage::from_raw(frame.width, frame.height, frame.pixels.clone())
        .ok_or_else(|| Error::Plugin("Frame buffer does not match dimensions".to_string()))?;

    let mut buffer = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY)
        .encode_image(&img)
        .map_err(|e| Error::Plugin(format!("JPEG encode failed: {e}")))?;
    Ok(buffer.into_inner())
}

impl FramePlugin for DescriptorPlugin {
    fn name(&self) -> &'static str {
        "DescriptorPlugin"
    }

    fn setup(&mut self, _video_path: &Path, _job_id: &str) -> Result<()> {
        self.descriptions.clear();

        match self.client.get(format!("{}/health", self.endpoint)).send() {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(endpoint = %self.endpoint, "Caption service connected");
            }
            Ok(resp) => {
                tracing::warn!(
                    status = %resp.status(),
                    "Caption service unhealthy, proceeding anyway"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "Caption service not reachable");
            }
        }
        Ok(())
    }

    fn analyze_frame(
        &mut self,
        frame: &FrameRecord,
        _analysis: &FrameAnalysis,
        _video_path: &Path,
    ) -> Result<PluginDelta> {
        let caption = self.caption(frame)?;
        self.descriptions.push(caption.clone());

        let mut delta = PluginDelta::new();
        delta.insert("description".to_string(), json!(caption));
        Ok(delta)
    }

    fn results(&self) -> Option<serde_json::Value> {
        Some(json!({ "descriptions": self.descriptions }))
    }

    fn cleanup(&mut self) {
        self.descriptions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_jpeg_produces_valid_image() {
        let frame = FrameRecord {
            pixels: vec![100; 16 * 16 * 3],
            width: 16,
            height: 16,
            frame_idx: 0,
            start_time_ms: 0,
            end_time_ms: 1000,
            scale_factor: 1.0,
            original_width: 16,
            original_height: 16,
        };
        let jpeg = encode_jpeg(&frame).unwrap();
        // JPEG SOI marker.
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_encode_rejects_mismatched_buffer() {
        let frame = FrameRecord {
            pixels: vec![0; 10],
            width: 16,
            height: 16,
            frame_idx: 0,
            start_time_ms: 0,
            end_time_ms: 1000,
            scale_factor: 1.0,
            original_width: 16,
            original_height: 16,
        };
        assert!(encode_jpeg(&frame).is_err());
    }
}
