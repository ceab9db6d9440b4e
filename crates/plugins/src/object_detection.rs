//! Object detection plugin
//!
//! YOLO-family ONNX detector behind the `onnx` cargo feature. Without the
//! feature (or without a configured model) the plugin stays loaded and
//! reports no detections, so the rest of the pipeline is unaffected.

use std::path::Path;

use serde_json::json;

#[cfg(feature = "onnx")]
use clipsight_config::constants::MIN_DETECTION_BOX_PX;
#[cfg(feature = "onnx")]
use clipsight_core::Error;
use clipsight_core::{FrameAnalysis, FramePlugin, FrameRecord, PluginDelta, Result};

#[cfg(feature = "onnx")]
const INPUT_SIZE: u32 = 640;
#[cfg(feature = "onnx")]
const CONFIDENCE_THRESHOLD: f32 = 0.5;
#[cfg(feature = "onnx")]
const IOU_THRESHOLD: f32 = 0.5;

/// A detection in original-frame coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: &'static str,
    /// Percentage, 0-100.
    pub confidence: f64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

pub struct ObjectDetectionPlugin {
    model_path: Option<String>,
    #[cfg(feature = "onnx")]
    session: Option<ort::session::Session>,
}

impl ObjectDetectionPlugin {
    pub fn new(model_path: Option<String>) -> Self {
        Self {
            model_path,
            #[cfg(feature = "onnx")]
            session: None,
        }
    }

    #[cfg(feature = "onnx")]
    fn load_session(&mut self) -> Result<()> {
        use ort::session::{builder::GraphOptimizationLevel, Session};

        if self.session.is_some() {
            return Ok(());
        }
        let Some(path) = &self.model_path else {
            return Ok(());
        };

        let session = Session::builder()
            .map_err(|e| Error::ModelLoad(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| Error::ModelLoad(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e| Error::ModelLoad(e.to_string()))?;

        tracing::info!(model = %path, "Object detection model loaded");
        self.session = Some(session);
        Ok(())
    }

    #[cfg(feature = "onnx")]
    fn detect(&mut self, frame: &FrameRecord) -> Result<Vec<Detection>> {
        use ort::value::Tensor;

        let Some(session) = self.session.as_mut() else {
            return Ok(Vec::new());
        };

        let (input, gain, pad_x, pad_y) = letterbox(frame)?;
        let tensor = Tensor::from_array(input).map_err(|e| Error::Plugin(e.to_string()))?;
        let outputs = session
            .run(ort::inputs!["images" => tensor])
            .map_err(|e| Error::Plugin(e.to_string()))?;

        let (shape, data) = outputs
            .get("output0")
            .ok_or_else(|| Error::Plugin("Missing output0 tensor".to_string()))?
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::Plugin(e.to_string()))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        if dims.len() != 3 || dims[1] < 5 {
            return Err(Error::Plugin(format!(
                "Unexpected detector output shape: {dims:?}"
            )));
        }

        let candidates = decode_predictions(data, dims[1], dims[2], gain, pad_x, pad_y, frame);
        Ok(non_max_suppression(candidates, IOU_THRESHOLD))
    }

    #[cfg(not(feature = "onnx"))]
    fn detect(&mut self, _frame: &FrameRecord) -> Result<Vec<Detection>> {
        Ok(Vec::new())
    }
}

impl FramePlugin for ObjectDetectionPlugin {
    fn name(&self) -> &'static str {
        "ObjectDetectionPlugin"
    }

    fn setup(&mut self, _video_path: &Path, _job_id: &str) -> Result<()> {
        #[cfg(feature = "onnx")]
        self.load_session()?;
        #[cfg(not(feature = "onnx"))]
        if self.model_path.is_some() {
            tracing::warn!("Object detection model configured but the onnx feature is disabled");
        }
        Ok(())
    }

    fn analyze_frame(
        &mut self,
        frame: &FrameRecord,
        _analysis: &FrameAnalysis,
        _video_path: &Path,
    ) -> Result<PluginDelta> {
        let detections = self.detect(frame)?;

        let objects: Vec<serde_json::Value> = detections
            .iter()
            .map(|det| {
                json!({
                    "label": det.label,
                    "confidence": det.confidence,
                    "bbox": {
                        "x": det.x,
                        "y": det.y,
                        "width": det.width,
                        "height": det.height,
                    }
                })
            })
            .collect();

        let mut delta = PluginDelta::new();
        delta.insert("objects".to_string(), json!(objects));
        Ok(delta)
    }
}

/// Letterbox the frame into a `[1, 3, 640, 640]` float tensor, returning the
/// scaling gain and padding offsets needed to map boxes back.
#[cfg(feature = "onnx")]
fn letterbox(frame: &FrameRecord) -> Result<(ndarray::Array4<f32>, f32, f32, f32)> {
    use image::{imageops, RgbImage};

    let img = RgbImage::from_raw(frame.width, frame.height, frame.pixels.clone())
        .ok_or_else(|| Error::Plugin("Frame buffer does not match dimensions".to_string()))?;

    let gain = (INPUT_SIZE as f32 / frame.width as f32).min(INPUT_SIZE as f32 / frame.height as f32);
    let scaled_w = ((frame.width as f32 * gain).round() as u32).max(1);
    let scaled_h = ((frame.height as f32 * gain).round() as u32).max(1);
    let pad_x = (INPUT_SIZE - scaled_w) as f32 / 2.0;
    let pad_y = (INPUT_SIZE - scaled_h) as f32 / 2.0;

    let resized = imageops::resize(&img, scaled_w, scaled_h, imageops::FilterType::Triangle);

    let mut input = ndarray::Array4::<f32>::from_elem(
        (1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize),
        114.0 / 255.0,
    );
    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = x as usize + pad_x as usize;
        let ty = y as usize + pad_y as usize;
        for c in 0..3 {
            input[[0, c, ty, tx]] = pixel.0[c] as f32 / 255.0;
        }
    }

    Ok((input, gain, pad_x, pad_y))
}

/// Decode raw `[attrs, anchors]` predictions into confident detections in
/// original-frame coordinates.
#[cfg(feature = "onnx")]
fn decode_predictions(
    data: &[f32],
    attrs: usize,
    anchors: usize,
    gain: f32,
    pad_x: f32,
    pad_y: f32,
    frame: &FrameRecord,
) -> Vec<Detection> {
    let class_count = (attrs - 4).min(COCO_CLASSES.len());
    let at = |attr: usize, anchor: usize| data[attr * anchors + anchor];

    let mut detections = Vec::new();
    for anchor in 0..anchors {
        let (mut best_class, mut best_score) = (0usize, 0f32);
        for class in 0..class_count {
            let score = at(4 + class, anchor);
            if score > best_score {
                best_class = class;
                best_score = score;
            }
        }
        if best_score < CONFIDENCE_THRESHOLD {
            continue;
        }

        let cx = at(0, anchor);
        let cy = at(1, anchor);
        let w = at(2, anchor);
        let h = at(3, anchor);

        // Letterbox coords -> processed frame -> original frame.
        let scale = frame.scale_factor as f32;
        let x1 = ((cx - w / 2.0 - pad_x) / gain) * scale;
        let y1 = ((cy - h / 2.0 - pad_y) / gain) * scale;
        let width = (w / gain) * scale;
        let height = (h / gain) * scale;

        if (width as f64) < MIN_DETECTION_BOX_PX || (height as f64) < MIN_DETECTION_BOX_PX {
            continue;
        }

        detections.push(Detection {
            label: COCO_CLASSES[best_class],
            confidence: (best_score * 100.0) as f64,
            x: x1 as f64,
            y: y1 as f64,
            width: width as f64,
            height: height as f64,
        });
    }
    detections
}

#[cfg(feature = "onnx")]
fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::new();
    for det in detections {
        let overlaps = kept
            .iter()
            .any(|k| k.label == det.label && iou(k, &det) > iou_threshold as f64);
        if !overlaps {
            kept.push(det);
        }
    }
    kept
}

#[cfg(feature = "onnx")]
fn iou(a: &Detection, b: &Detection) -> f64 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

#[cfg(feature = "onnx")]
const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> FrameRecord {
        FrameRecord {
            pixels: vec![0; 4 * 4 * 3],
            width: 4,
            height: 4,
            frame_idx: 0,
            start_time_ms: 0,
            end_time_ms: 1000,
            scale_factor: 1.0,
            original_width: 4,
            original_height: 4,
        }
    }

    fn analysis() -> FrameAnalysis {
        FrameAnalysis {
            start_time_ms: 0,
            end_time_ms: 1000,
            duration_ms: 1000,
            frame_idx: 0,
            scale_factor: 1.0,
            job_id: "j".into(),
            thumbnail_path: String::new(),
            values: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_reports_empty_objects_without_model() {
        let mut plugin = ObjectDetectionPlugin::new(None);
        plugin.setup(Path::new("/v/a.mp4"), "j").unwrap();
        let delta = plugin
            .analyze_frame(&frame(), &analysis(), Path::new("/v/a.mp4"))
            .unwrap();
        assert_eq!(delta["objects"], serde_json::json!([]));
    }

    #[cfg(feature = "onnx")]
    #[test]
    fn test_nms_keeps_highest_confidence_per_overlap() {
        let a = Detection {
            label: "person",
            confidence: 90.0,
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 100.0,
        };
        let b = Detection {
            label: "person",
            confidence: 60.0,
            x: 5.0,
            y: 5.0,
            width: 100.0,
            height: 100.0,
        };
        let kept = non_max_suppression(vec![b, a], 0.5);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 90.0);
    }
}
