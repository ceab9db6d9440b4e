//! Wire protocol: message kinds, framing and request parsing
//!
//! Every frame is UTF-8 JSON of the form `{"type": T, "payload": P}`.
//! Validation failures surface as `error` messages and never close the
//! session.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use clipsight_config::constants::MEDIA_PATH_PREFIX;
use clipsight_config::ExternalHostConfig;
use clipsight_core::{AnalyzeRequest, AnalyzeSettings, Error, Result, TranscribeRequest};

/// Message kinds on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    // Client requests
    Analyze,
    Transcribe,
    Health,

    // Server responses
    Status,
    Error,
    AnalysisProgress,
    AnalysisCompleted,
    AnalysisError,
    TranscriptionProgress,
    TranscriptionCompleted,
    TranscriptionError,
    Ping,
    Pong,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Analyze => "analyze",
            MessageType::Transcribe => "transcribe",
            MessageType::Health => "health",
            MessageType::Status => "status",
            MessageType::Error => "error",
            MessageType::AnalysisProgress => "analysis_progress",
            MessageType::AnalysisCompleted => "analysis_completed",
            MessageType::AnalysisError => "analysis_error",
            MessageType::TranscriptionProgress => "transcription_progress",
            MessageType::TranscriptionCompleted => "transcription_completed",
            MessageType::TranscriptionError => "transcription_error",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
        }
    }
}

/// Encode an outbound frame, injecting `job_id` into the payload when given.
pub fn encode_message(kind: MessageType, mut payload: Map<String, Value>, job_id: Option<&str>) -> String {
    if let Some(job_id) = job_id {
        payload.insert("job_id".to_string(), Value::String(job_id.to_string()));
    }
    serde_json::json!({
        "type": kind.as_str(),
        "payload": payload,
    })
    .to_string()
}

/// Why an inbound frame failed shape validation.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameError {
    InvalidJson,
    TypeNotString,
    PayloadNotObject,
}

impl FrameError {
    pub fn message(&self) -> &'static str {
        match self {
            FrameError::InvalidJson => "Invalid JSON format",
            FrameError::TypeNotString => "Message type must be a string",
            FrameError::PayloadNotObject => "Payload must be an object",
        }
    }
}

/// Parse an inbound frame into its type string and payload object. A missing
/// payload is treated as empty.
pub fn parse_frame(raw: &str) -> std::result::Result<(String, Map<String, Value>), FrameError> {
    let value: Value = serde_json::from_str(raw).map_err(|_| FrameError::InvalidJson)?;

    let msg_type = match value.get("type") {
        Some(Value::String(s)) => s.clone(),
        _ => return Err(FrameError::TypeNotString),
    };

    let payload = match value.get("payload") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err(FrameError::PayloadNotObject),
    };

    Ok((msg_type, payload))
}

/// Parses and validates job requests.
#[derive(Debug, Clone)]
pub struct RequestParser {
    external_host: ExternalHostConfig,
}

impl RequestParser {
    pub fn new(external_host: ExternalHostConfig) -> Self {
        Self { external_host }
    }

    pub fn parse_analyze(&self, payload: &Map<String, Value>) -> Result<AnalyzeRequest> {
        let video_path = self.resolve_video_path(required_string(payload, "video_path")?);
        let json_file_path = required_string(payload, "json_file_path")?;
        let job_id = required_string(payload, "job_id")?;
        if job_id.is_empty() {
            return Err(Error::InvalidRequest("job_id must not be empty".to_string()));
        }

        let settings = match payload.get("settings") {
            None | Some(Value::Null) => AnalyzeSettings::default(),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| Error::InvalidRequest(format!("Invalid settings: {e}")))?,
        };

        Ok(AnalyzeRequest {
            video_path,
            json_file_path,
            job_id,
            settings,
        })
    }

    pub fn parse_transcribe(&self, payload: &Map<String, Value>) -> Result<TranscribeRequest> {
        let video_path = self.resolve_video_path(required_string(payload, "video_path")?);
        let json_file_path = required_string(payload, "json_file_path")?;
        let job_id = required_string(payload, "job_id")?;
        if job_id.is_empty() {
            return Err(Error::InvalidRequest("job_id must not be empty".to_string()));
        }

        Ok(TranscribeRequest {
            video_path,
            json_file_path,
            job_id,
        })
    }

    /// Percent-decode the path and apply the external-host prefix rewrite.
    fn resolve_video_path(&self, raw: String) -> String {
        let decoded = urlencoding::decode(&raw)
            .map(|cow| cow.into_owned())
            .unwrap_or(raw);

        if self.external_host.enabled {
            if let Some(media_path) = &self.external_host.media_path {
                return decoded.replace(MEDIA_PATH_PREFIX, media_path);
            }
        }
        decoded
    }

    /// Reject requests whose video does not exist at admission time.
    pub fn validate_video_path(video_path: &str) -> Result<()> {
        if !std::path::Path::new(video_path).exists() {
            return Err(Error::VideoNotFound(format!(
                "Video file not found: {video_path}"
            )));
        }
        Ok(())
    }
}

fn required_string(payload: &Map<String, Value>, field: &str) -> Result<String> {
    match payload.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(Error::InvalidRequest(format!(
            "Field must be a string: {field}"
        ))),
        None => Err(Error::InvalidRequest(format!(
            "Missing required field: {field}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parser() -> RequestParser {
        RequestParser::new(ExternalHostConfig::default())
    }

    fn analyze_payload() -> Map<String, Value> {
        json!({
            "video_path": "/v/a.mp4",
            "json_file_path": "/out/a.json",
            "job_id": "job-1",
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn test_parse_frame_valid() {
        let (msg_type, payload) = parse_frame(r#"{"type":"ping","payload":{}}"#).unwrap();
        assert_eq!(msg_type, "ping");
        assert!(payload.is_empty());
    }

    #[test]
    fn test_parse_frame_missing_payload_defaults_empty() {
        let (_, payload) = parse_frame(r#"{"type":"health"}"#).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn test_parse_frame_rejections() {
        assert_eq!(parse_frame("not json"), Err(FrameError::InvalidJson));
        assert_eq!(
            parse_frame(r#"{"type":7,"payload":{}}"#),
            Err(FrameError::TypeNotString)
        );
        assert_eq!(
            parse_frame(r#"{"type":"x","payload":[1]}"#),
            Err(FrameError::PayloadNotObject)
        );
    }

    #[test]
    fn test_encode_injects_job_id() {
        let frame = encode_message(MessageType::AnalysisError, Map::new(), Some("j-9"));
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "analysis_error");
        assert_eq!(value["payload"]["job_id"], "j-9");
    }

    #[test]
    fn test_parse_analyze_happy_path() {
        let request = parser().parse_analyze(&analyze_payload()).unwrap();
        assert_eq!(request.video_path, "/v/a.mp4");
        assert_eq!(request.job_id, "job-1");
        assert_eq!(request.settings, AnalyzeSettings::default());
    }

    #[test]
    fn test_parse_analyze_missing_field() {
        let mut payload = analyze_payload();
        payload.remove("job_id");
        let err = parser().parse_analyze(&payload).unwrap_err();
        assert!(err.to_string().contains("Missing required field: job_id"));
    }

    #[test]
    fn test_parse_analyze_rejects_empty_job_id() {
        let mut payload = analyze_payload();
        payload.insert("job_id".into(), json!(""));
        assert!(parser().parse_analyze(&payload).is_err());
    }

    #[test]
    fn test_parse_analyze_rejects_malformed_settings() {
        let mut payload = analyze_payload();
        payload.insert("settings".into(), json!({"target_resolution_height": "x"}));
        let err = parser().parse_analyze(&payload).unwrap_err();
        assert!(err.to_string().contains("Invalid settings"));
    }

    #[test]
    fn test_video_path_is_percent_decoded() {
        let mut payload = analyze_payload();
        payload.insert("video_path".into(), json!("/v/my%20video.mp4"));
        let request = parser().parse_analyze(&payload).unwrap();
        assert_eq!(request.video_path, "/v/my video.mp4");
    }

    #[test]
    fn test_external_host_rewrites_media_prefix() {
        let parser = RequestParser::new(ExternalHostConfig {
            enabled: true,
            media_path: Some("/mnt/host-media".to_string()),
        });
        let mut payload = analyze_payload();
        payload.insert("video_path".into(), json!("/media/videos/clip.mp4"));
        let request = parser.parse_analyze(&payload).unwrap();
        assert_eq!(request.video_path, "/mnt/host-media/clip.mp4");
    }

    #[test]
    fn test_validate_video_path() {
        assert!(RequestParser::validate_video_path("/definitely/not/here.mp4").is_err());
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(RequestParser::validate_video_path(file.path().to_str().unwrap()).is_ok());
    }
}
