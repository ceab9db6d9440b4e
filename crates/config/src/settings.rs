//! Main settings module

use std::collections::HashMap;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Analysis pipeline configuration
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Transcription pipeline configuration
    #[serde(default)]
    pub transcription: TranscriptionConfig,

    /// Model paths
    #[serde(default)]
    pub models: ModelPaths,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// WebSocket server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind when serving over TCP.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind when serving over TCP.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Filesystem socket path. When set, the server binds a Unix domain
    /// socket instead of TCP; a stale socket file is removed before binding.
    #[serde(default)]
    pub socket_path: Option<String>,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_analyses: usize,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_transcriptions: usize,

    /// Keepalive ping cadence in seconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Sessions without a pong within this window are closed.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,

    /// Bound on the close handshake.
    #[serde(default = "default_close_timeout")]
    pub close_timeout_secs: u64,

    #[serde(default)]
    pub external_host: ExternalHostConfig,
}

/// External-host mode: results are returned inline over the wire and
/// `/media/videos` path prefixes are rewritten to the host media path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternalHostConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub media_path: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_max_concurrent() -> usize {
    2
}

fn default_ping_interval() -> u64 {
    60
}

fn default_ping_timeout() -> u64 {
    120
}

fn default_close_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            socket_path: None,
            max_concurrent_analyses: default_max_concurrent(),
            max_concurrent_transcriptions: default_max_concurrent(),
            ping_interval_secs: default_ping_interval(),
            ping_timeout_secs: default_ping_timeout(),
            close_timeout_secs: default_close_timeout(),
            external_host: ExternalHostConfig::default(),
        }
    }
}

/// Analysis pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Seconds between sampled frames for long videos.
    #[serde(default = "default_sample_interval")]
    pub sample_interval_seconds: f64,

    /// Frames taller than this are downscaled before analysis.
    #[serde(default = "default_target_height")]
    pub target_resolution_height: u32,

    /// Frames buffered before a batch is drained through the plugins.
    #[serde(default = "default_frame_buffer_limit")]
    pub frame_buffer_limit: usize,

    /// Forced memory cleanup runs every this many batches.
    #[serde(default = "default_memory_cleanup_interval")]
    pub memory_cleanup_interval: usize,

    /// Aggressive cleanup fires when available system memory drops below
    /// this many gigabytes.
    #[serde(default = "default_memory_pressure_gb")]
    pub memory_pressure_threshold_gb: f64,

    /// Directory for frame thumbnails.
    #[serde(default = "default_thumbnail_dir")]
    pub thumbnail_dir: String,

    /// Directory for unknown-face artifacts.
    #[serde(default = "default_unknown_faces_dir")]
    pub unknown_faces_dir: String,

    /// Per-plugin skip intervals; a plugin with interval N runs on every Nth
    /// invocation. Critical plugins ignore this.
    #[serde(default = "default_plugin_skip_interval")]
    pub plugin_skip_interval: HashMap<String, u32>,

    /// Frame captioning sidecar endpoint; captioning is skipped when unset.
    #[serde(default)]
    pub caption_endpoint: Option<String>,
}

fn default_sample_interval() -> f64 {
    2.5
}

fn default_target_height() -> u32 {
    720
}

fn default_frame_buffer_limit() -> usize {
    10
}

fn default_memory_cleanup_interval() -> usize {
    50
}

fn default_memory_pressure_gb() -> f64 {
    2.0
}

fn default_thumbnail_dir() -> String {
    "analysis_results/thumbnails".to_string()
}

fn default_unknown_faces_dir() -> String {
    ".unknown_faces".to_string()
}

fn default_plugin_skip_interval() -> HashMap<String, u32> {
    HashMap::from([
        ("DominantColorPlugin".to_string(), 3),
        ("ShotTypePlugin".to_string(), 3),
        ("DescriptorPlugin".to_string(), 4),
    ])
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_interval_seconds: default_sample_interval(),
            target_resolution_height: default_target_height(),
            frame_buffer_limit: default_frame_buffer_limit(),
            memory_cleanup_interval: default_memory_cleanup_interval(),
            memory_pressure_threshold_gb: default_memory_pressure_gb(),
            thumbnail_dir: default_thumbnail_dir(),
            unknown_faces_dir: default_unknown_faces_dir(),
            plugin_skip_interval: default_plugin_skip_interval(),
            caption_endpoint: None,
        }
    }
}

/// Transcription pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Speech model name, forwarded to the backend.
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Transcription sidecar endpoint.
    #[serde(default = "default_transcription_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_beam_size")]
    pub beam_size: u32,

    #[serde(default = "default_vad_filter")]
    pub vad_filter: bool,

    #[serde(default = "default_vad_threshold")]
    pub vad_threshold: f64,

    #[serde(default = "default_min_speech_ms")]
    pub min_speech_duration_ms: u64,

    #[serde(default = "default_min_silence_ms")]
    pub min_silence_duration_ms: u64,

    /// Request timeout for the sidecar, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_model_name() -> String {
    "medium".to_string()
}

fn default_transcription_endpoint() -> String {
    "http://127.0.0.1:9090".to_string()
}

fn default_beam_size() -> u32 {
    1
}

fn default_vad_filter() -> bool {
    true
}

fn default_vad_threshold() -> f64 {
    0.5
}

fn default_min_speech_ms() -> u64 {
    250
}

fn default_min_silence_ms() -> u64 {
    2000
}

fn default_request_timeout() -> u64 {
    600
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            endpoint: default_transcription_endpoint(),
            beam_size: default_beam_size(),
            vad_filter: default_vad_filter(),
            vad_threshold: default_vad_threshold(),
            min_speech_duration_ms: default_min_speech_ms(),
            min_silence_duration_ms: default_min_silence_ms(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Model file locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelPaths {
    /// Object detection ONNX model.
    #[serde(default)]
    pub object_detection: Option<String>,

    /// Face detection ONNX model.
    #[serde(default)]
    pub face_detection: Option<String>,

    /// Face embedding ONNX model.
    #[serde(default)]
    pub face_embedding: Option<String>,

    /// Directory of known-face embeddings (one JSON file per identity).
    #[serde(default)]
    pub known_faces_dir: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    /// Prometheus exporter bind address; metrics are disabled when unset.
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_addr: None,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.socket_path.is_none() && self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port cannot be 0 when no socket path is configured".to_string(),
            });
        }

        if self.server.max_concurrent_analyses == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.max_concurrent_analyses".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if self.server.max_concurrent_transcriptions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.max_concurrent_transcriptions".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if self.server.external_host.enabled && self.server.external_host.media_path.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "server.external_host.media_path".to_string(),
                message: "Required when external-host mode is enabled".to_string(),
            });
        }

        if self.analysis.sample_interval_seconds <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "analysis.sample_interval_seconds".to_string(),
                message: format!(
                    "Must be positive, got {}",
                    self.analysis.sample_interval_seconds
                ),
            });
        }

        if self.analysis.target_resolution_height < 16 {
            return Err(ConfigError::InvalidValue {
                field: "analysis.target_resolution_height".to_string(),
                message: "Must be at least 16 pixels".to_string(),
            });
        }

        if self.analysis.frame_buffer_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "analysis.frame_buffer_limit".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.transcription.vad_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "transcription.vad_threshold".to_string(),
                message: format!(
                    "Must be between 0.0 and 1.0, got {}",
                    self.transcription.vad_threshold
                ),
            });
        }

        Ok(())
    }
}

/// Load settings from files and environment.
///
/// Priority: env vars > `config/{env}.toml` > `config/default.toml` > defaults.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder().add_source(File::with_name("config/default").required(false));

    if let Some(env) = env {
        builder = builder.add_source(File::with_name(&format!("config/{env}")).required(false));
    }

    let config = builder
        .add_source(Environment::with_prefix("CLIPSIGHT").separator("__"))
        .build()?;

    let settings: Settings = config.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.server.port, 8765);
        assert_eq!(settings.analysis.target_resolution_height, 720);
        assert_eq!(settings.transcription.min_silence_duration_ms, 2000);
    }

    #[test]
    fn test_default_skip_intervals() {
        let settings = Settings::default();
        assert_eq!(
            settings.analysis.plugin_skip_interval.get("DominantColorPlugin"),
            Some(&3)
        );
        assert!(!settings
            .analysis
            .plugin_skip_interval
            .contains_key("ObjectDetectionPlugin"));
    }

    #[test]
    fn test_validate_rejects_zero_cap() {
        let mut settings = Settings::default();
        settings.server.max_concurrent_analyses = 0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "server.max_concurrent_analyses"
        ));
    }

    #[test]
    fn test_validate_rejects_external_host_without_media_path() {
        let mut settings = Settings::default();
        settings.server.external_host.enabled = true;
        assert!(settings.validate().is_err());
        settings.server.external_host.media_path = Some("/data/videos".to_string());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_vad_threshold() {
        let mut settings = Settings::default();
        settings.transcription.vad_threshold = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_settings_parse_from_toml() {
        let raw = r#"
            [server]
            port = 9000
            max_concurrent_analyses = 1

            [analysis]
            sample_interval_seconds = 5.0

            [analysis.plugin_skip_interval]
            ShotTypePlugin = 2
        "#;
        let settings: Settings = toml::from_str(raw).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.max_concurrent_analyses, 1);
        assert_eq!(settings.analysis.sample_interval_seconds, 5.0);
        assert_eq!(
            settings.analysis.plugin_skip_interval.get("ShotTypePlugin"),
            Some(&2)
        );
    }
}
