//! Job request types

use serde::{Deserialize, Serialize};

/// The two kinds of work the service performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Analyze,
    Transcribe,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Analyze => "analyze",
            JobKind::Transcribe => "transcribe",
        }
    }
}

/// Per-job overrides accepted in the `settings` field of an analyze request.
///
/// Parsed once at admission; malformed settings reject the request before any
/// pipeline work starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_interval_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_resolution_height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_buffer_limit: Option<usize>,
}

/// Video analysis job request.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzeRequest {
    pub video_path: String,
    pub json_file_path: String,
    pub job_id: String,
    pub settings: AnalyzeSettings,
}

/// Video transcription job request.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscribeRequest {
    pub video_path: String,
    pub json_file_path: String,
    pub job_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_kind_str() {
        assert_eq!(JobKind::Analyze.as_str(), "analyze");
        assert_eq!(JobKind::Transcribe.as_str(), "transcribe");
    }

    #[test]
    fn test_settings_accept_partial_overrides() {
        let settings: AnalyzeSettings =
            serde_json::from_str(r#"{"target_resolution_height": 480}"#).unwrap();
        assert_eq!(settings.target_resolution_height, Some(480));
        assert_eq!(settings.sample_interval_seconds, None);
    }

    #[test]
    fn test_settings_reject_wrong_types() {
        assert!(serde_json::from_str::<AnalyzeSettings>(
            r#"{"target_resolution_height": "tall"}"#
        )
        .is_err());
    }
}
