//! Face recognition plugin
//!
//! Detection and identification live behind the [`FaceBackend`] seam: an
//! ONNX-backed implementation under the `onnx` feature, a no-op fallback
//! otherwise, scripted backends in tests. The plugin itself owns coordinate
//! scaling, per-frame records and the unknown-face artifact registry.

use std::collections::HashMap;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::json;

use clipsight_config::constants::JPEG_QUALITY;
use clipsight_config::Settings;
use clipsight_core::{Error, FrameAnalysis, FramePlugin, FrameRecord, PluginDelta, Result};

/// A face reported by a backend, in processed-frame coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    /// Identity label; unidentified faces get `Unknown_NNN` labels that are
    /// stable within one job.
    pub name: String,
    /// Percentage, 0-100.
    pub confidence: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl DetectedFace {
    pub fn is_unknown(&self) -> bool {
        self.name.starts_with("Unknown")
    }
}

/// Face detection + identification backend.
pub trait FaceBackend: Send {
    /// Drop per-job state (the unknown-identity registry).
    fn reset(&mut self);

    /// Detect and identify faces on one frame.
    fn detect_faces(&mut self, frame: &FrameRecord) -> Result<Vec<DetectedFace>>;
}

/// Fallback backend used when no models are configured: reports no faces.
pub struct NoopFaceBackend;

impl FaceBackend for NoopFaceBackend {
    fn reset(&mut self) {}

    fn detect_faces(&mut self, _frame: &FrameRecord) -> Result<Vec<DetectedFace>> {
        Ok(Vec::new())
    }
}

/// Sidecar record for one unknown identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UnknownFaceRecord {
    name: String,
    job_id: String,
    video_path: String,
    first_seen_ms: i64,
    last_seen_ms: i64,
    appearances: u64,
    timestamps_ms: Vec<i64>,
    image_file: String,
}

pub struct FaceRecognitionPlugin {
    backend: Box<dyn FaceBackend>,
    unknown_faces_dir: PathBuf,
    saved_unknown: HashMap<String, PathBuf>,
    all_faces: Vec<serde_json::Value>,
    video_path: String,
    job_id: String,
}

impl FaceRecognitionPlugin {
    pub fn new(backend: Box<dyn FaceBackend>, unknown_faces_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            unknown_faces_dir: unknown_faces_dir.into(),
            saved_unknown: HashMap::new(),
            all_faces: Vec::new(),
            video_path: String::new(),
            job_id: String::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let backend = build_backend(settings);
        Self::new(backend, settings.analysis.unknown_faces_dir.clone())
    }

    /// Purge unknown-face artifacts left by a previous run of the same
    /// video and job, so a retried job does not accumulate duplicates.
    /// Sidecars that no longer parse are removed outright.
    fn cleanup_previous_run(&self) {
        let entries = match fs::read_dir(&self.unknown_faces_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let record = fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str::<UnknownFaceRecord>(&raw).ok());
            match record {
                Some(record)
                    if record.video_path == self.video_path && record.job_id == self.job_id =>
                {
                    let _ = fs::remove_file(&path);
                    let image = path.with_extension("jpg");
                    if image.exists() {
                        let _ = fs::remove_file(image);
                    }
                    removed += 1;
                }
                Some(_) => {}
                None => {
                    tracing::warn!(path = %path.display(), "Removing unreadable unknown-face sidecar");
                    let _ = fs::remove_file(&path);
                }
            }
        }

        if removed > 0 {
            tracing::info!(
                removed,
                job_id = %self.job_id,
                "Cleaned unknown faces from previous run"
            );
        }
    }

    /// Persist or refresh the artifacts for an unidentified identity: one
    /// JPEG crop on first appearance, a JSON sidecar updated on every one.
    fn track_unknown_face(
        &mut self,
        frame: &FrameRecord,
        face: &DetectedFace,
        timestamp_ms: i64,
    ) -> Result<()> {
        let base = format!("{}_{}", self.job_id, face.name);
        let json_path = self.unknown_faces_dir.join(format!("{base}.json"));
        let image_path = self.unknown_faces_dir.join(format!("{base}.jpg"));

        if let Some(existing) = self.saved_unknown.get(&face.name) {
            let raw = fs::read_to_string(existing)?;
            let mut record: UnknownFaceRecord = serde_json::from_str(&raw)?;
            record.last_seen_ms = timestamp_ms;
            record.appearances += 1;
            record.timestamps_ms.push(timestamp_ms);
            fs::write(existing, serde_json::to_string_pretty(&record)?)?;
            return Ok(());
        }

        fs::create_dir_all(&self.unknown_faces_dir)?;
        write_face_crop(frame, face, &image_path)?;

        let record = UnknownFaceRecord {
            name: face.name.clone(),
            job_id: self.job_id.clone(),
            video_path: self.video_path.clone(),
            first_seen_ms: timestamp_ms,
            last_seen_ms: timestamp_ms,
            appearances: 1,
            timestamps_ms: vec![timestamp_ms],
            image_file: image_path.to_string_lossy().into_owned(),
        };
        fs::write(&json_path, serde_json::to_string_pretty(&record)?)?;
        self.saved_unknown.insert(face.name.clone(), json_path);
        Ok(())
    }
}

impl FramePlugin for FaceRecognitionPlugin {
    fn name(&self) -> &'static str {
        "FaceRecognitionPlugin"
    }

    fn setup(&mut self, video_path: &Path, job_id: &str) -> Result<()> {
        self.backend.reset();
        self.saved_unknown.clear();
        self.all_faces.clear();
        self.video_path = video_path.to_string_lossy().into_owned();
        self.job_id = job_id.to_string();
        fs::create_dir_all(&self.unknown_faces_dir)?;
        self.cleanup_previous_run();
        Ok(())
    }

    fn analyze_frame(
        &mut self,
        frame: &FrameRecord,
        analysis: &FrameAnalysis,
        _video_path: &Path,
    ) -> Result<PluginDelta> {
        let detected = self.backend.detect_faces(frame)?;
        let scale = frame.scale_factor;

        let mut faces = Vec::with_capacity(detected.len());
        for face in &detected {
            // Location in original-frame coordinates, [top, right, bottom, left].
            faces.push(json!({
                "name": face.name,
                "confidence": face.confidence,
                "location": [
                    (face.top * scale).round() as i64,
                    (face.right * scale).round() as i64,
                    (face.bottom * scale).round() as i64,
                    (face.left * scale).round() as i64,
                ],
            }));

            if face.is_unknown() {
                if let Err(e) = self.track_unknown_face(frame, face, analysis.start_time_ms) {
                    tracing::warn!(
                        face = %face.name,
                        error = %e,
                        "Failed to save unknown face artifact"
                    );
                }
            }
        }

        self.all_faces.extend(faces.iter().cloned());

        let mut delta = PluginDelta::new();
        delta.insert("faces".to_string(), json!(faces));
        Ok(delta)
    }

    fn results(&self) -> Option<serde_json::Value> {
        Some(json!({ "faces": self.all_faces }))
    }

    fn summary(&self) -> Option<serde_json::Value> {
        let mut counts: HashMap<String, u64> = HashMap::new();
        for face in &self.all_faces {
            if let Some(name) = face.get("name").and_then(|n| n.as_str()) {
                *counts.entry(name.to_string()).or_default() += 1;
            }
        }
        Some(json!({ "identities": counts }))
    }

    fn cleanup(&mut self) {
        self.all_faces.clear();
        self.saved_unknown.clear();
    }
}

/// Crop the face region out of the frame and write it as a JPEG. Crops come
/// from the processed (possibly downscaled) buffer; the source video is not
/// re-read at full resolution.
fn write_face_crop(frame: &FrameRecord, face: &DetectedFace, path: &Path) -> Result<()> {
    use image::codecs::jpeg::JpegEncoder;
    use image::RgbImage;

    let img = RgbImage::from_raw(frame.width, frame.height, frame.pixels.clone())
        .ok_or_else(|| Error::Plugin("Frame buffer does not match dimensions".to_string()))?;

    let left = face.left.max(0.0) as u32;
    let top = face.top.max(0.0) as u32;
    let right = (face.right as u32).min(frame.width);
    let bottom = (face.bottom as u32).min(frame.height);
    if right <= left || bottom <= top {
        return Err(Error::Plugin("Degenerate face box".to_string()));
    }

    let crop = image::imageops::crop_imm(&img, left, top, right - left, bottom - top).to_image();
    let file = fs::File::create(path)?;
    let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), JPEG_QUALITY);
    encoder
        .encode_image(&crop)
        .map_err(|e| Error::Plugin(format!("Face crop encode failed: {e}")))?;
    Ok(())
}

#[cfg(feature = "onnx")]
fn build_backend(settings: &Settings) -> Box<dyn FaceBackend> {
    match (&settings.models.face_detection, &settings.models.face_embedding) {
        (Some(detection), Some(embedding)) => {
            match onnx::OnnxFaceBackend::new(
                detection,
                embedding,
                settings.models.known_faces_dir.as_deref(),
            ) {
                Ok(backend) => Box::new(backend),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to load face models, faces disabled");
                    Box::new(NoopFaceBackend)
                }
            }
        }
        _ => {
            tracing::info!("Face models not configured, faces disabled");
            Box::new(NoopFaceBackend)
        }
    }
}

#[cfg(not(feature = "onnx"))]
fn build_backend(settings: &Settings) -> Box<dyn FaceBackend> {
    if settings.models.face_detection.is_some() {
        tracing::warn!("Face models configured but the onnx feature is disabled");
    }
    Box::new(NoopFaceBackend)
}

#[cfg(feature = "onnx")]
mod onnx {
    //! UltraFace-style detector plus an embedding model with cosine matching
    //! against a directory of known identities. Unidentified embeddings are
    //! clustered per job into stable `Unknown_NNN` labels.

    use std::fs;
    use std::path::Path;

    use ort::session::{builder::GraphOptimizationLevel, Session};
    use ort::value::Tensor;
    use serde::Deserialize;

    use clipsight_core::{Error, FrameRecord, Result};

    use super::{DetectedFace, FaceBackend};

    const DETECTION_INPUT: (u32, u32) = (320, 240);
    const EMBEDDING_INPUT: u32 = 112;
    const SCORE_THRESHOLD: f32 = 0.7;
    const MATCH_THRESHOLD: f32 = 0.55;

    #[derive(Debug, Deserialize)]
    struct KnownFace {
        name: String,
        embedding: Vec<f32>,
    }

    pub struct OnnxFaceBackend {
        detector: Session,
        embedder: Session,
        known: Vec<KnownFace>,
        unknown_registry: Vec<(String, Vec<f32>)>,
    }

    impl OnnxFaceBackend {
        pub fn new(
            detection_model: &str,
            embedding_model: &str,
            known_faces_dir: Option<&str>,
        ) -> Result<Self> {
            let detector = load_session(detection_model)?;
            let embedder = load_session(embedding_model)?;
            let known = known_faces_dir.map(load_known_faces).unwrap_or_default();
            tracing::info!(known = known.len(), "Face recognition backend ready");
            Ok(Self {
                detector,
                embedder,
                known,
                unknown_registry: Vec::new(),
            })
        }

        fn identify(&mut self, embedding: Vec<f32>) -> (String, f32) {
            let mut best: Option<(&str, f32)> = None;
            for known in &self.known {
                let score = cosine(&known.embedding, &embedding);
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((&known.name, score));
                }
            }
            if let Some((name, score)) = best {
                if score >= MATCH_THRESHOLD {
                    return (name.to_string(), score);
                }
            }

            // Cluster against unknowns already seen in this job.
            for (label, registered) in &self.unknown_registry {
                let score = cosine(registered, &embedding);
                if score >= MATCH_THRESHOLD {
                    return (label.clone(), score);
                }
            }
            let label = format!("Unknown_{:03}", self.unknown_registry.len() + 1);
            self.unknown_registry.push((label.clone(), embedding));
            (label, 0.0)
        }
    }

    impl FaceBackend for OnnxFaceBackend {
        fn reset(&mut self) {
            self.unknown_registry.clear();
        }

        fn detect_faces(&mut self, frame: &FrameRecord) -> Result<Vec<DetectedFace>> {
            let boxes = run_detection(&mut self.detector, frame)?;

            let mut faces = Vec::with_capacity(boxes.len());
            for (left, top, right, bottom, score) in boxes {
                let embedding =
                    run_embedding(&mut self.embedder, frame, left, top, right, bottom)?;
                let (name, match_score) = self.identify(embedding);
                let confidence = if name.starts_with("Unknown") {
                    (score * 100.0) as f64
                } else {
                    (match_score * 100.0) as f64
                };
                faces.push(DetectedFace {
                    name,
                    confidence,
                    top: top as f64,
                    right: right as f64,
                    bottom: bottom as f64,
                    left: left as f64,
                });
            }
            Ok(faces)
        }
    }

    fn load_session(path: &str) -> Result<Session> {
        Session::builder()
            .map_err(|e| Error::ModelLoad(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| Error::ModelLoad(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e| Error::ModelLoad(e.to_string()))
    }

    fn load_known_faces(dir: &str) -> Vec<KnownFace> {
        let mut known = Vec::new();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir, error = %e, "Cannot read known faces directory");
                return known;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(Error::from)
                .and_then(|raw| serde_json::from_str::<KnownFace>(&raw).map_err(Error::from))
            {
                Ok(face) => known.push(face),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Bad known-face file"),
            }
        }
        known
    }

    /// Run the UltraFace detector; returns `(left, top, right, bottom, score)`
    /// boxes in processed-frame pixels.
    fn run_detection(
        session: &mut Session,
        frame: &FrameRecord,
    ) -> Result<Vec<(f32, f32, f32, f32, f32)>> {
        let input = preprocess(frame, DETECTION_INPUT.0, DETECTION_INPUT.1, 127.0, 128.0)?;
        let tensor = Tensor::from_array(input).map_err(|e| Error::Plugin(e.to_string()))?;
        let outputs = session
            .run(ort::inputs!["input" => tensor])
            .map_err(|e| Error::Plugin(e.to_string()))?;

        let (score_shape, scores) = outputs
            .get("scores")
            .ok_or_else(|| Error::Plugin("Missing scores tensor".to_string()))?
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::Plugin(e.to_string()))?;
        let (_, boxes) = outputs
            .get("boxes")
            .ok_or_else(|| Error::Plugin("Missing boxes tensor".to_string()))?
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::Plugin(e.to_string()))?;

        let count = score_shape.get(1).copied().unwrap_or(0) as usize;
        let mut detected = Vec::new();
        for i in 0..count {
            let face_score = scores[i * 2 + 1];
            if face_score < SCORE_THRESHOLD {
                continue;
            }
            let left = boxes[i * 4] * frame.width as f32;
            let top = boxes[i * 4 + 1] * frame.height as f32;
            let right = boxes[i * 4 + 2] * frame.width as f32;
            let bottom = boxes[i * 4 + 3] * frame.height as f32;
            if right <= left || bottom <= top {
                continue;
            }
            detected.push((left, top, right, bottom, face_score));
        }
        Ok(detected)
    }

    fn run_embedding(
        session: &mut Session,
        frame: &FrameRecord,
        left: f32,
        top: f32,
        right: f32,
        bottom: f32,
    ) -> Result<Vec<f32>> {
        use image::{imageops, RgbImage};

        let img = RgbImage::from_raw(frame.width, frame.height, frame.pixels.clone())
            .ok_or_else(|| Error::Plugin("Frame buffer does not match dimensions".to_string()))?;
        let x = left.max(0.0) as u32;
        let y = top.max(0.0) as u32;
        let w = ((right - left) as u32).clamp(1, frame.width.saturating_sub(x).max(1));
        let h = ((bottom - top) as u32).clamp(1, frame.height.saturating_sub(y).max(1));
        let crop = imageops::crop_imm(&img, x, y, w, h).to_image();
        let resized = imageops::resize(
            &crop,
            EMBEDDING_INPUT,
            EMBEDDING_INPUT,
            imageops::FilterType::Triangle,
        );

        let size = EMBEDDING_INPUT as usize;
        let mut input = ndarray::Array4::<f32>::zeros((1, 3, size, size));
        for (px, py, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, py as usize, px as usize]] = (pixel.0[c] as f32 - 127.5) / 128.0;
            }
        }

        let tensor = Tensor::from_array(input).map_err(|e| Error::Plugin(e.to_string()))?;
        let outputs = session
            .run(ort::inputs!["input" => tensor])
            .map_err(|e| Error::Plugin(e.to_string()))?;
        let (_, embedding) = outputs
            .get("embedding")
            .or_else(|| outputs.get("output"))
            .ok_or_else(|| Error::Plugin("Missing embedding tensor".to_string()))?
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::Plugin(e.to_string()))?;
        Ok(embedding.to_vec())
    }

    /// Resize and normalize a frame into a `[1, 3, h, w]` tensor.
    fn preprocess(
        frame: &FrameRecord,
        width: u32,
        height: u32,
        mean: f32,
        scale: f32,
    ) -> Result<ndarray::Array4<f32>> {
        use image::{imageops, RgbImage};

        let img = RgbImage::from_raw(frame.width, frame.height, frame.pixels.clone())
            .ok_or_else(|| Error::Plugin("Frame buffer does not match dimensions".to_string()))?;
        let resized = imageops::resize(&img, width, height, imageops::FilterType::Triangle);

        let mut input = ndarray::Array4::<f32>::zeros((1, 3, height as usize, width as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - mean) / scale;
            }
        }
        Ok(input)
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot / (norm_a * norm_b)
    }
}
