//! HTTP speech backend
//!
//! Sends the media file to a transcription sidecar (a faster-whisper server)
//! and maps its JSON response into the segment stream. The sidecar owns
//! model download, caching and inference; this backend owns the request
//! shape and the error mapping.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use clipsight_config::TranscriptionConfig;
use clipsight_core::{
    Error, Result, SpeechInfo, SpeechModel, SpeechSegment, SpeechStream, SpeechWord,
    TranscribeOptions,
};

#[derive(Debug, Deserialize)]
struct WireWord {
    start: f64,
    end: f64,
    word: String,
    #[serde(default)]
    probability: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireSegment {
    id: i64,
    start: f64,
    end: f64,
    text: String,
    #[serde(default)]
    avg_logprob: Option<f64>,
    #[serde(default)]
    words: Vec<WireWord>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    segments: Vec<WireSegment>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpWhisperModel {
    endpoint: String,
    model_name: String,
    client: reqwest::blocking::Client,
}

impl HttpWhisperModel {
    pub fn new(config: &TranscriptionConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::ModelLoad(format!("Failed to create HTTP client: {e}")))?;

        // Check if the sidecar is reachable; a miss is not fatal, the first
        // request will retry.
        match client.get(format!("{}/health", config.endpoint)).send() {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(endpoint = %config.endpoint, "Transcription sidecar connected");
            }
            Ok(resp) => {
                tracing::warn!(
                    status = %resp.status(),
                    "Transcription sidecar unhealthy, proceeding anyway"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "Transcription sidecar not reachable");
            }
        }

        Ok(Self {
            endpoint: config.endpoint.clone(),
            model_name: config.model_name.clone(),
            client,
        })
    }
}

impl SpeechModel for HttpWhisperModel {
    fn transcribe(&self, media_path: &Path, options: &TranscribeOptions) -> Result<SpeechStream> {
        let file = reqwest::blocking::multipart::Part::file(media_path)
            .map_err(|e| Error::Transcription(format!("Cannot read media file: {e}")))?;
        let form = reqwest::blocking::multipart::Form::new()
            .part("file", file)
            .text("model", self.model_name.clone())
            .text("beam_size", options.beam_size.to_string())
            .text("word_timestamps", options.word_timestamps.to_string())
            .text("vad_filter", options.vad.enabled.to_string())
            .text("vad_threshold", options.vad.threshold.to_string())
            .text(
                "min_speech_duration_ms",
                options.vad.min_speech_duration_ms.to_string(),
            )
            .text(
                "min_silence_duration_ms",
                options.vad.min_silence_duration_ms.to_string(),
            );

        let response = self
            .client
            .post(format!("{}/transcribe", self.endpoint))
            .multipart(form)
            .send()
            .map_err(|e| Error::Transcription(format!("Transcription request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Transcription(format!(
                "Transcription sidecar returned {}",
                response.status()
            )));
        }

        let parsed: WireResponse = response
            .json()
            .map_err(|e| Error::Transcription(format!("Bad sidecar response: {e}")))?;

        if let Some(error) = parsed.error {
            return Err(Error::Transcription(error));
        }

        let segments: Vec<Result<SpeechSegment>> = parsed
            .segments
            .into_iter()
            .map(|seg| {
                Ok(SpeechSegment {
                    id: seg.id,
                    start: seg.start,
                    end: seg.end,
                    text: seg.text,
                    avg_logprob: seg.avg_logprob,
                    words: seg
                        .words
                        .into_iter()
                        .map(|w| SpeechWord {
                            start: w.start,
                            end: w.end,
                            word: w.word,
                            probability: w.probability,
                        })
                        .collect(),
                })
            })
            .collect();

        Ok(SpeechStream {
            info: SpeechInfo {
                language: parsed.language,
                duration: parsed.duration,
            },
            segments: Box::new(segments.into_iter()),
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_response_parses_minimal_payload() {
        let raw = r#"{"segments": [], "language": "en", "duration": 3.5}"#;
        let parsed: WireResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.language.as_deref(), Some("en"));
        assert_eq!(parsed.duration, 3.5);
        assert!(parsed.error.is_none());
    }

    #[test]
    fn test_wire_response_parses_words() {
        let raw = r#"{
            "segments": [{
                "id": 0, "start": 0.0, "end": 1.5, "text": "hi there",
                "avg_logprob": -0.25,
                "words": [{"start": 0.0, "end": 0.7, "word": "hi", "probability": 0.99}]
            }],
            "language": "en",
            "duration": 1.5
        }"#;
        let parsed: WireResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.segments[0].words[0].word, "hi");
        assert_eq!(parsed.segments[0].avg_logprob, Some(-0.25));
    }

    #[test]
    fn test_wire_error_field() {
        let raw = r#"{"error": "no audio stream found"}"#;
        let parsed: WireResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.error.as_deref(), Some("no audio stream found"));
    }
}
