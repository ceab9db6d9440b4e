//! Traits for pluggable backends

pub mod plugin;
pub mod speech;

pub use plugin::{FramePlugin, PluginDelta};
pub use speech::{
    SpeechInfo, SpeechModel, SpeechSegment, SpeechStream, SpeechWord, TranscribeOptions,
    VadOptions,
};
