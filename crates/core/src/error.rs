//! Error types shared across the service

use thiserror::Error;

/// Service-wide error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Video file not found: {0}")]
    VideoNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Frame extraction failed: {0}")]
    Extraction(String),

    #[error("Analysis failed: {0}")]
    Analysis(String),

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when a transcription backend failure means "the container has no
    /// usable audio" rather than a real fault. The phrases come from the
    /// runtime errors the upstream speech stacks raise for silent or
    /// audio-less files.
    pub fn is_no_audio(&self) -> bool {
        match self {
            Error::Transcription(msg) | Error::ModelLoad(msg) => {
                let msg = msg.to_lowercase();
                ["no audio", "failed to load", "tuple index"]
                    .iter()
                    .any(|needle| msg.contains(needle))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_audio_classification() {
        assert!(Error::Transcription("No audio stream in file".into()).is_no_audio());
        assert!(Error::Transcription("tuple index out of range".into()).is_no_audio());
        assert!(Error::ModelLoad("failed to load media".into()).is_no_audio());
        assert!(!Error::Transcription("CUDA out of memory".into()).is_no_audio());
        assert!(!Error::Extraction("no audio".into()).is_no_audio());
    }
}
