//! Analysis and transcription pipelines
//!
//! The analysis pipeline streams frames out of a container, batches them,
//! fans each batch through the plugin set and assembles a
//! [`clipsight_core::VideoAnalysisResult`]. The transcription pipeline makes
//! a single pass over the segments produced by a speech model. Both run
//! synchronously on blocking workers and report progress through bounded
//! channels.

pub mod analyzer;
pub mod extract;
pub mod memory;
pub mod progress;
pub mod stt;
pub mod thumbnail;
pub mod transcribe;

pub use analyzer::AnalysisService;
pub use extract::{sampling_stride, scaled_dimensions, total_sampled_frames, ExtractionPlan, FrameStream};
pub use memory::{MemoryMonitor, MemoryStats};
pub use progress::{AnalysisProgress, ProgressSender, TranscriptionProgress};
pub use stt::{HttpWhisperModel, SpeechModelManager};
pub use thumbnail::{thumbnail_path, write_thumbnail};
pub use transcribe::TranscriptionService;
