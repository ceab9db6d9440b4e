//! Core types and traits for the clipsight video processing service
//!
//! This crate provides the foundational types used across all other crates:
//! - Job requests and the message-kind vocabulary
//! - Frame records and per-frame analysis maps
//! - Analysis and transcription result structures
//! - Service, plugin and stage metrics
//! - Traits for pluggable frame analyzers and speech models
//! - Error types

pub mod analysis;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod request;
pub mod traits;
pub mod transcript;

pub use analysis::{AnalysisSummary, FrameAnalysis, VideoAnalysisResult};
pub use error::{Error, Result};
pub use frame::FrameRecord;
pub use metrics::{
    PluginMetrics, PluginMetricsCollector, ServiceMetrics, StageMetrics, StageMetricsCollector,
    StageTimer,
};
pub use request::{AnalyzeRequest, AnalyzeSettings, JobKind, TranscribeRequest};
pub use traits::{
    FramePlugin, PluginDelta, SpeechInfo, SpeechModel, SpeechSegment, SpeechStream, SpeechWord,
    TranscribeOptions, VadOptions,
};
pub use transcript::{Segment, TranscriptionResult, Word};
