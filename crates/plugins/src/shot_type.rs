//! Shot type classification
//!
//! Classifies each frame as close-up / medium-shot / long-shot from the face
//! coverage reported earlier in the plugin chain, smoothed over a short
//! window to avoid flicker at cut boundaries.

use std::collections::VecDeque;
use std::path::Path;

use serde_json::json;

use clipsight_core::{FrameAnalysis, FramePlugin, FrameRecord, PluginDelta, Result};

const CLOSE_UP_THRESHOLD: f64 = 0.3;
const MEDIUM_SHOT_THRESHOLD: f64 = 0.1;
const SMOOTHING_WINDOW: usize = 5;

pub struct ShotTypePlugin {
    ratio_window: VecDeque<f64>,
}

impl ShotTypePlugin {
    pub fn new() -> Self {
        Self {
            ratio_window: VecDeque::with_capacity(SMOOTHING_WINDOW),
        }
    }

    fn classify(&mut self, frame_area: f64, faces: &[serde_json::Value]) -> &'static str {
        if faces.is_empty() {
            return "long-shot";
        }

        let face_area = total_face_area(faces);
        let ratio = if frame_area > 0.0 {
            face_area / frame_area
        } else {
            0.0
        };

        if self.ratio_window.len() == SMOOTHING_WINDOW {
            self.ratio_window.pop_front();
        }
        self.ratio_window.push_back(ratio);
        let smoothed: f64 =
            self.ratio_window.iter().sum::<f64>() / self.ratio_window.len() as f64;

        if smoothed > CLOSE_UP_THRESHOLD {
            "close-up"
        } else if smoothed > MEDIUM_SHOT_THRESHOLD {
            "medium-shot"
        } else {
            "long-shot"
        }
    }
}

impl Default for ShotTypePlugin {
    fn default() -> Self {
        Self::new()
    }
}

/// Sum the areas of `[top, right, bottom, left]` face locations.
fn total_face_area(faces: &[serde_json::Value]) -> f64 {
    faces
        .iter()
        .filter_map(|face| {
            let location = face.get("location")?.as_array()?;
            if location.len() != 4 {
                return None;
            }
            let top = location[0].as_f64()?;
            let right = location[1].as_f64()?;
            let bottom = location[2].as_f64()?;
            let left = location[3].as_f64()?;
            Some((right - left).abs() * (bottom - top).abs())
        })
        .sum()
}

impl FramePlugin for ShotTypePlugin {
    fn name(&self) -> &'static str {
        "ShotTypePlugin"
    }

    fn setup(&mut self, _video_path: &Path, _job_id: &str) -> Result<()> {
        self.ratio_window.clear();
        Ok(())
    }

    fn analyze_frame(
        &mut self,
        frame: &FrameRecord,
        analysis: &FrameAnalysis,
        _video_path: &Path,
    ) -> Result<PluginDelta> {
        // Face locations are in original-frame coordinates, so the frame
        // area must be too.
        let frame_area = frame.original_width as f64 * frame.original_height as f64;
        let empty = Vec::new();
        let faces = analysis
            .get("faces")
            .and_then(|f| f.as_array())
            .unwrap_or(&empty);

        let shot_type = self.classify(frame_area, faces);

        let mut delta = PluginDelta::new();
        delta.insert("shot_type".to_string(), json!(shot_type));
        Ok(delta)
    }

    fn cleanup(&mut self) {
        self.ratio_window.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame() -> FrameRecord {
        FrameRecord {
            pixels: Vec::new(),
            width: 100,
            height: 100,
            frame_idx: 0,
            start_time_ms: 0,
            end_time_ms: 1000,
            scale_factor: 1.0,
            original_width: 100,
            original_height: 100,
        }
    }

    fn analysis_with_faces(faces: serde_json::Value) -> FrameAnalysis {
        let mut values = serde_json::Map::new();
        values.insert("faces".to_string(), faces);
        FrameAnalysis {
            start_time_ms: 0,
            end_time_ms: 1000,
            duration_ms: 1000,
            frame_idx: 0,
            scale_factor: 1.0,
            job_id: "j".into(),
            thumbnail_path: String::new(),
            values,
        }
    }

    fn run(plugin: &mut ShotTypePlugin, faces: serde_json::Value) -> String {
        let delta = plugin
            .analyze_frame(&frame(), &analysis_with_faces(faces), Path::new("/v/a.mp4"))
            .unwrap();
        delta["shot_type"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_no_faces_is_long_shot() {
        let mut plugin = ShotTypePlugin::new();
        assert_eq!(run(&mut plugin, json!([])), "long-shot");
    }

    #[test]
    fn test_large_face_is_close_up() {
        let mut plugin = ShotTypePlugin::new();
        // 70x70 face on a 100x100 frame: ratio 0.49.
        let faces = json!([{"location": [0, 70, 70, 0]}]);
        assert_eq!(run(&mut plugin, faces), "close-up");
    }

    #[test]
    fn test_moderate_face_is_medium_shot() {
        let mut plugin = ShotTypePlugin::new();
        // 40x40 face: ratio 0.16.
        let faces = json!([{"location": [0, 40, 40, 0]}]);
        assert_eq!(run(&mut plugin, faces), "medium-shot");
    }

    #[test]
    fn test_smoothing_damps_single_spike() {
        let mut plugin = ShotTypePlugin::new();
        let tiny = json!([{"location": [0, 5, 5, 0]}]);
        for _ in 0..4 {
            assert_eq!(run(&mut plugin, tiny.clone()), "long-shot");
        }
        // One big face after four tiny ones: smoothed ratio stays below the
        // close-up threshold.
        let big = json!([{"location": [0, 80, 80, 0]}]);
        assert_eq!(run(&mut plugin, big), "medium-shot");
    }

    #[test]
    fn test_malformed_locations_are_ignored() {
        let mut plugin = ShotTypePlugin::new();
        let faces = json!([{"location": [0, 10]}, {"name": "x"}]);
        assert_eq!(run(&mut plugin, faces), "long-shot");
    }
}
