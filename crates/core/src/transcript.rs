//! Transcription result structures

use serde::{Deserialize, Serialize};

/// A transcribed word with timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub start: f64,
    pub end: f64,
    pub word: String,
    pub confidence: Option<f64>,
}

/// A transcription segment. Word spans lie within the segment span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: i64,
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub confidence: Option<f64>,
    pub words: Vec<Word>,
}

/// Complete result of one transcription job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub text: String,
    pub segments: Vec<Segment>,
    pub language: String,
    pub processing_time: f64,
}

impl TranscriptionResult {
    /// Result for media with no usable audio track.
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            segments: Vec::new(),
            language: "N/A".to_string(),
            processing_time: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_result() {
        let result = TranscriptionResult::empty();
        assert!(result.text.is_empty());
        assert!(result.segments.is_empty());
        assert_eq!(result.language, "N/A");
    }

    #[test]
    fn test_segment_serialization_shape() {
        let segment = Segment {
            id: 0,
            start: 0.0,
            end: 2.5,
            text: "hello there".to_string(),
            confidence: Some(-0.2),
            words: vec![Word {
                start: 0.0,
                end: 1.0,
                word: "hello".to_string(),
                confidence: Some(0.98),
            }],
        };
        let value = serde_json::to_value(&segment).unwrap();
        assert_eq!(value["words"][0]["word"], "hello");
        assert_eq!(value["confidence"], -0.2);
    }
}
