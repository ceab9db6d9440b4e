//! Speech model interface
//!
//! Transcription delegates to a speech model behind this trait. Backends
//! include an HTTP sidecar implementation and scripted models for tests.

use std::path::Path;

use crate::error::Result;

/// Voice-activity-detection parameters passed to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct VadOptions {
    pub enabled: bool,
    pub threshold: f64,
    pub min_speech_duration_ms: u64,
    pub min_silence_duration_ms: u64,
}

impl Default for VadOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.5,
            min_speech_duration_ms: 250,
            min_silence_duration_ms: 2000,
        }
    }
}

/// Decoding options for one transcription pass.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscribeOptions {
    pub beam_size: u32,
    pub word_timestamps: bool,
    pub vad: VadOptions,
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self {
            beam_size: 1,
            word_timestamps: true,
            vad: VadOptions::default(),
        }
    }
}

/// A word emitted by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechWord {
    pub start: f64,
    pub end: f64,
    pub word: String,
    pub probability: Option<f64>,
}

/// A segment emitted by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechSegment {
    pub id: i64,
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub avg_logprob: Option<f64>,
    pub words: Vec<SpeechWord>,
}

/// Stream-level information known before segments are consumed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeechInfo {
    pub language: Option<String>,
    /// Total audio duration in seconds, 0.0 when unknown.
    pub duration: f64,
}

/// A single-pass segment stream.
pub struct SpeechStream {
    pub info: SpeechInfo,
    pub segments: Box<dyn Iterator<Item = Result<SpeechSegment>> + Send>,
}

/// Speech-to-text model.
///
/// Implementations are shared across jobs and must be safe to call from
/// blocking worker threads. A model that cannot find a usable audio track
/// reports an error classifying as no-audio (see `Error::is_no_audio`)
/// rather than inventing empty segments.
pub trait SpeechModel: Send + Sync {
    /// Transcribe the audio track of a media file.
    fn transcribe(&self, media_path: &Path, options: &TranscribeOptions) -> Result<SpeechStream>;

    /// Model name for logging.
    fn model_name(&self) -> &str;
}
