//! Speech model management
//!
//! The backend is loaded lazily on first use and shared across jobs behind
//! a lock, so concurrent transcriptions never race the load.

pub mod http;

pub use http::HttpWhisperModel;

use std::sync::Arc;

use parking_lot::Mutex;

use clipsight_config::TranscriptionConfig;
use clipsight_core::{Result, SpeechModel};

pub struct SpeechModelManager {
    config: TranscriptionConfig,
    model: Mutex<Option<Arc<dyn SpeechModel>>>,
}

impl SpeechModelManager {
    pub fn new(config: TranscriptionConfig) -> Self {
        Self {
            config,
            model: Mutex::new(None),
        }
    }

    /// Manager with a pre-loaded model (tests, custom backends).
    pub fn with_model(config: TranscriptionConfig, model: Arc<dyn SpeechModel>) -> Self {
        Self {
            config,
            model: Mutex::new(Some(model)),
        }
    }

    /// Get the model, loading it on first use.
    pub fn get(&self) -> Result<Arc<dyn SpeechModel>> {
        let mut guard = self.model.lock();
        if let Some(model) = guard.as_ref() {
            return Ok(model.clone());
        }

        tracing::info!(model = %self.config.model_name, "Loading speech model");
        let model: Arc<dyn SpeechModel> = Arc::new(HttpWhisperModel::new(&self.config)?);
        *guard = Some(model.clone());
        tracing::info!("Speech model loaded");
        Ok(model)
    }
}
