//! Configuration management for the clipsight service
//!
//! Supports loading configuration from:
//! - TOML files (`config/default.toml`, then `config/{env}.toml`)
//! - Environment variables (`CLIPSIGHT_` prefix, `__` section separator)
//! - Serde defaults for everything else

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, AnalysisConfig, ExternalHostConfig, ModelPaths, ObservabilityConfig,
    ServerConfig, Settings, TranscriptionConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
