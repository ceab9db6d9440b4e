//! Dominant color analysis
//!
//! Per frame: the dominant color plus brightness and saturation from a
//! deterministic pixel subsample. Across the job: a scene-level aggregation
//! into a top-five palette with overall brightness/saturation/warmth and
//! derived color mood and harmony classifications.

use std::collections::HashSet;
use std::path::Path;

use serde_json::{json, Value};

use clipsight_core::{FrameAnalysis, FramePlugin, FrameRecord, PluginDelta, Result};

use crate::colors::{color_name, rgb_to_hex, rgb_to_hsv};

const SAMPLE_SIZE: usize = 500;
const VIBRANT_SATURATION: f64 = 0.6;
const MUTED_SATURATION: f64 = 0.3;
const PALETTE_SIZE: usize = 5;

/// Per-frame color record kept for the scene-level aggregation.
#[derive(Debug, Clone)]
struct FrameColor {
    rgb: (u8, u8, u8),
    color: Value,
    /// Share of the frame this color covers, 0-100.
    percentage: f64,
    /// 0-100.
    brightness: f64,
    /// 0-100.
    saturation: f64,
    /// -100 (cool) to +100 (warm).
    warmth: f64,
}

pub struct DominantColorPlugin {
    frame_colors: Vec<FrameColor>,
}

impl DominantColorPlugin {
    pub fn new() -> Self {
        Self {
            frame_colors: Vec::new(),
        }
    }

    /// Scene-level analysis over every frame seen so far.
    fn scene_analysis(&self) -> Option<Value> {
        if self.frame_colors.is_empty() {
            return None;
        }

        let n = self.frame_colors.len() as f64;
        let overall_brightness = round2(
            self.frame_colors.iter().map(|c| c.brightness).sum::<f64>() / n,
        );
        let overall_saturation = round2(
            self.frame_colors.iter().map(|c| c.saturation).sum::<f64>() / n,
        );
        let overall_warmth =
            round2(self.frame_colors.iter().map(|c| c.warmth).sum::<f64>() / n);

        // Most common colors by coverage-weighted hex.
        let mut weights: Vec<(String, f64)> = Vec::new();
        for frame in &self.frame_colors {
            let hex = frame.color["hex"].as_str().unwrap_or_default().to_string();
            match weights.iter_mut().find(|(h, _)| *h == hex) {
                Some((_, weight)) => *weight += frame.percentage,
                None => weights.push((hex, frame.percentage)),
            }
        }
        weights.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let top_hexes: HashSet<&str> = weights
            .iter()
            .take(PALETTE_SIZE)
            .map(|(hex, _)| hex.as_str())
            .collect();

        // Palette keeps first-appearance order among the top colors.
        let mut palette: Vec<&FrameColor> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for frame in &self.frame_colors {
            let hex = frame.color["hex"].as_str().unwrap_or_default();
            if top_hexes.contains(hex) && !seen.contains(hex) {
                palette.push(frame);
                seen.insert(hex);
            }
            if palette.len() >= PALETTE_SIZE {
                break;
            }
        }

        let vibrant_count = palette
            .iter()
            .filter(|c| c.color["is_vibrant"].as_bool().unwrap_or(false))
            .count();
        let color_mood = determine_color_mood(
            overall_brightness,
            overall_saturation,
            overall_warmth,
            vibrant_count,
        );
        let palette_rgbs: Vec<(u8, u8, u8)> = palette.iter().map(|c| c.rgb).collect();
        let color_harmony = determine_color_harmony(&palette_rgbs);

        Some(json!({
            "dominant_color": palette.first().map(|c| c.color.clone()).unwrap_or(Value::Null),
            "color_palette": palette.iter().map(|c| c.color.clone()).collect::<Vec<_>>(),
            "overall_brightness": overall_brightness,
            "overall_saturation": overall_saturation,
            "overall_warmth": overall_warmth,
            "color_mood": color_mood,
            "color_harmony": color_harmony,
        }))
    }
}

impl Default for DominantColorPlugin {
    fn default() -> Self {
        Self::new()
    }
}

/// Evenly strided subsample of a frame's pixels.
fn sample_pixels(frame: &FrameRecord) -> Vec<(u8, u8, u8)> {
    let total = frame.pixels.len() / 3;
    if total == 0 {
        return Vec::new();
    }
    let stride = (total / SAMPLE_SIZE).max(1);
    (0..total)
        .step_by(stride)
        .take(SAMPLE_SIZE)
        .map(|i| {
            (
                frame.pixels[i * 3],
                frame.pixels[i * 3 + 1],
                frame.pixels[i * 3 + 2],
            )
        })
        .collect()
}

/// Mean color of the sample: the single-cluster centroid.
fn dominant_color(pixels: &[(u8, u8, u8)]) -> (u8, u8, u8) {
    let n = pixels.len().max(1) as u64;
    let (mut r, mut g, mut b) = (0u64, 0u64, 0u64);
    for &(pr, pg, pb) in pixels {
        r += pr as u64;
        g += pg as u64;
        b += pb as u64;
    }
    ((r / n) as u8, (g / n) as u8, (b / n) as u8)
}

/// Luminance mean over the sample, 0-100.
fn mean_brightness(pixels: &[(u8, u8, u8)]) -> f64 {
    if pixels.is_empty() {
        return 0.0;
    }
    let total: f64 = pixels
        .iter()
        .map(|&(r, g, b)| 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64)
        .sum();
    total / pixels.len() as f64 / 255.0 * 100.0
}

/// HSV saturation mean over the sample, 0-100.
fn mean_saturation(pixels: &[(u8, u8, u8)]) -> f64 {
    if pixels.is_empty() {
        return 0.0;
    }
    let total: f64 = pixels.iter().map(|&rgb| rgb_to_hsv(rgb).1).sum();
    total / pixels.len() as f64 * 100.0
}

/// Color temperature of one dominant color, weighted by its coverage:
/// -100 (cool) to +100 (warm).
fn warmth(rgb: (u8, u8, u8), percentage: f64) -> f64 {
    (rgb.0 as f64 - rgb.2 as f64) / 255.0 * 100.0 * (percentage / 100.0)
}

fn determine_color_mood(
    brightness: f64,
    saturation: f64,
    warmth: f64,
    vibrant_count: usize,
) -> &'static str {
    if brightness > 70.0 {
        if saturation > 50.0 {
            "vibrant_bright"
        } else {
            "bright"
        }
    } else if brightness < 30.0 {
        "dark"
    } else if saturation < 20.0 {
        "muted"
    } else if vibrant_count >= 2 {
        "vibrant"
    } else if warmth > 30.0 {
        "warm"
    } else if warmth < -30.0 {
        "cool"
    } else {
        "neutral"
    }
}

/// Harmony of the palette from the hue spread of its first three colors.
fn determine_color_harmony(palette: &[(u8, u8, u8)]) -> &'static str {
    if palette.len() < 2 {
        return "monochromatic";
    }

    let hues: Vec<f64> = palette.iter().take(3).map(|&rgb| rgb_to_hsv(rgb).0).collect();
    let diffs: Vec<f64> = hues
        .windows(2)
        .map(|pair| {
            let diff = (pair[0] - pair[1]).abs();
            if diff > 180.0 {
                360.0 - diff
            } else {
                diff
            }
        })
        .collect();
    if diffs.is_empty() {
        return "monochromatic";
    }
    let avg_diff: f64 = diffs.iter().sum::<f64>() / diffs.len() as f64;

    if avg_diff < 30.0 {
        "monochromatic"
    } else if avg_diff < 60.0 {
        "analogous"
    } else if avg_diff > 150.0 && avg_diff < 210.0 {
        "complementary"
    } else {
        "mixed"
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl FramePlugin for DominantColorPlugin {
    fn name(&self) -> &'static str {
        "DominantColorPlugin"
    }

    fn setup(&mut self, _video_path: &Path, _job_id: &str) -> Result<()> {
        self.frame_colors.clear();
        Ok(())
    }

    fn analyze_frame(
        &mut self,
        frame: &FrameRecord,
        _analysis: &FrameAnalysis,
        _video_path: &Path,
    ) -> Result<PluginDelta> {
        let pixels = sample_pixels(frame);
        let mut delta = PluginDelta::new();

        if pixels.is_empty() {
            delta.insert("dominant_color".to_string(), Value::Null);
            return Ok(delta);
        }

        let rgb = dominant_color(&pixels);
        let (_, color_saturation, _) = rgb_to_hsv(rgb);
        let percentage = 100.0;
        let color = json!({
            "name": color_name(rgb),
            "hex": rgb_to_hex(rgb),
            "percentage": percentage,
            "is_vibrant": color_saturation >= VIBRANT_SATURATION,
            "is_muted": color_saturation < MUTED_SATURATION,
        });

        let brightness = round2(mean_brightness(&pixels));
        let saturation = round2(mean_saturation(&pixels));

        self.frame_colors.push(FrameColor {
            rgb,
            color: color.clone(),
            percentage,
            brightness,
            saturation,
            warmth: round2(warmth(rgb, percentage)),
        });

        delta.insert("dominant_color".to_string(), color);
        delta.insert("brightness".to_string(), json!(brightness));
        delta.insert("saturation".to_string(), json!(saturation));
        Ok(delta)
    }

    fn results(&self) -> Option<Value> {
        self.scene_analysis()
    }

    fn summary(&self) -> Option<Value> {
        let scene = self.scene_analysis()?;
        let overall_warmth = scene["overall_warmth"].as_f64().unwrap_or(0.0);
        let color_temperature = if overall_warmth > 20.0 {
            "warm"
        } else if overall_warmth < -20.0 {
            "cool"
        } else {
            "neutral"
        };

        Some(json!({
            "dominant_color_name": scene["dominant_color"]["name"].as_str().unwrap_or("Unknown"),
            "dominant_color_hex": scene["dominant_color"]["hex"].as_str().unwrap_or("#000000"),
            "color_mood": scene["color_mood"],
            "color_harmony": scene["color_harmony"],
            "overall_brightness": scene["overall_brightness"],
            "overall_saturation": scene["overall_saturation"],
            "color_temperature": color_temperature,
        }))
    }

    fn cleanup(&mut self) {
        self.frame_colors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(r: u8, g: u8, b: u8) -> FrameRecord {
        let mut pixels = Vec::with_capacity(32 * 32 * 3);
        for _ in 0..(32 * 32) {
            pixels.extend_from_slice(&[r, g, b]);
        }
        FrameRecord {
            pixels,
            width: 32,
            height: 32,
            frame_idx: 0,
            start_time_ms: 500,
            end_time_ms: 1500,
            scale_factor: 1.0,
            original_width: 32,
            original_height: 32,
        }
    }

    fn analysis() -> FrameAnalysis {
        FrameAnalysis {
            start_time_ms: 500,
            end_time_ms: 1500,
            duration_ms: 1000,
            frame_idx: 0,
            scale_factor: 1.0,
            job_id: "j".into(),
            thumbnail_path: String::new(),
            values: serde_json::Map::new(),
        }
    }

    fn feed(plugin: &mut DominantColorPlugin, frame: &FrameRecord) -> PluginDelta {
        plugin
            .analyze_frame(frame, &analysis(), Path::new("/v/a.mp4"))
            .unwrap()
    }

    #[test]
    fn test_solid_black_frame() {
        let mut plugin = DominantColorPlugin::new();
        plugin.setup(Path::new("/v/a.mp4"), "j").unwrap();
        let delta = feed(&mut plugin, &solid_frame(0, 0, 0));
        assert_eq!(delta["dominant_color"]["name"], "black");
        assert_eq!(delta["brightness"], 0.0);
        assert_eq!(delta["dominant_color"]["is_muted"], true);
    }

    #[test]
    fn test_vibrant_red_frame() {
        let mut plugin = DominantColorPlugin::new();
        plugin.setup(Path::new("/v/a.mp4"), "j").unwrap();
        let delta = feed(&mut plugin, &solid_frame(230, 20, 20));
        assert_eq!(delta["dominant_color"]["name"], "red");
        assert_eq!(delta["dominant_color"]["is_vibrant"], true);
    }

    #[test]
    fn test_empty_frame_reports_null_color() {
        let mut plugin = DominantColorPlugin::new();
        let mut frame = solid_frame(0, 0, 0);
        frame.pixels.clear();
        let delta = feed(&mut plugin, &frame);
        assert!(delta["dominant_color"].is_null());
    }

    #[test]
    fn test_scene_results_aggregate_palette() {
        let mut plugin = DominantColorPlugin::new();
        plugin.setup(Path::new("/v/a.mp4"), "j").unwrap();
        for _ in 0..3 {
            feed(&mut plugin, &solid_frame(230, 20, 20));
        }

        let results = plugin.results().unwrap();
        assert_eq!(results["dominant_color"]["name"], "red");
        assert_eq!(results["color_palette"].as_array().unwrap().len(), 1);
        assert_eq!(results["color_harmony"], "monochromatic");
        // (230-20)/255*100 per frame.
        assert!((results["overall_warmth"].as_f64().unwrap() - 82.35).abs() < 0.01);

        plugin.cleanup();
        assert!(plugin.results().is_none());
    }

    #[test]
    fn test_warm_scene_mood_and_temperature() {
        let mut plugin = DominantColorPlugin::new();
        plugin.setup(Path::new("/v/a.mp4"), "j").unwrap();
        for _ in 0..3 {
            feed(&mut plugin, &solid_frame(230, 20, 20));
        }

        let results = plugin.results().unwrap();
        assert_eq!(results["color_mood"], "warm");

        let summary = plugin.summary().unwrap();
        assert_eq!(summary["color_temperature"], "warm");
        assert_eq!(summary["dominant_color_name"], "red");
    }

    #[test]
    fn test_dark_scene_mood() {
        let mut plugin = DominantColorPlugin::new();
        plugin.setup(Path::new("/v/a.mp4"), "j").unwrap();
        feed(&mut plugin, &solid_frame(10, 10, 10));
        assert_eq!(plugin.results().unwrap()["color_mood"], "dark");
    }

    #[test]
    fn test_complementary_harmony() {
        let mut plugin = DominantColorPlugin::new();
        plugin.setup(Path::new("/v/a.mp4"), "j").unwrap();
        // Red (hue 0) and cyan (hue 180) alternate: diff 180 on the wheel.
        feed(&mut plugin, &solid_frame(255, 0, 0));
        feed(&mut plugin, &solid_frame(0, 255, 255));

        let results = plugin.results().unwrap();
        assert_eq!(results["color_palette"].as_array().unwrap().len(), 2);
        assert_eq!(results["color_harmony"], "complementary");
    }

    #[test]
    fn test_mood_thresholds() {
        assert_eq!(determine_color_mood(80.0, 60.0, 0.0, 0), "vibrant_bright");
        assert_eq!(determine_color_mood(80.0, 30.0, 0.0, 0), "bright");
        assert_eq!(determine_color_mood(20.0, 50.0, 0.0, 0), "dark");
        assert_eq!(determine_color_mood(50.0, 10.0, 0.0, 0), "muted");
        assert_eq!(determine_color_mood(50.0, 50.0, 0.0, 2), "vibrant");
        assert_eq!(determine_color_mood(50.0, 50.0, 40.0, 0), "warm");
        assert_eq!(determine_color_mood(50.0, 50.0, -40.0, 0), "cool");
        assert_eq!(determine_color_mood(50.0, 50.0, 0.0, 0), "neutral");
    }

    #[test]
    fn test_harmony_thresholds() {
        // Single color.
        assert_eq!(determine_color_harmony(&[(255, 0, 0)]), "monochromatic");
        // Red and orange: hues 0 and ~30.
        assert_eq!(
            determine_color_harmony(&[(255, 0, 0), (255, 128, 0)]),
            "analogous"
        );
        // Red and green: hues 0 and 120.
        assert_eq!(
            determine_color_harmony(&[(255, 0, 0), (0, 255, 0)]),
            "mixed"
        );
    }
}
