//! Frame analysis plugins
//!
//! The plugin set is a fixed manifest: every plugin in [`MANIFEST_ORDER`] is
//! constructed at service start, failures are logged per plugin and the rest
//! continue. Plugins implement [`clipsight_core::FramePlugin`] and run one
//! frame at a time under the harness.

pub mod colors;
pub mod descriptor;
pub mod dominant_color;
pub mod face_recognition;
pub mod harness;
pub mod object_detection;
pub mod shot_type;

pub use descriptor::DescriptorPlugin;
pub use dominant_color::DominantColorPlugin;
pub use face_recognition::{DetectedFace, FaceBackend, FaceRecognitionPlugin};
pub use harness::{PluginSet, CRITICAL_PLUGINS};
pub use object_detection::ObjectDetectionPlugin;
pub use shot_type::ShotTypePlugin;

use clipsight_config::Settings;
use clipsight_core::FramePlugin;

/// Declared plugin order. Object detection and face recognition come first
/// so downstream plugins can read their keys within the same frame.
pub const MANIFEST_ORDER: &[&str] = &[
    "ObjectDetectionPlugin",
    "FaceRecognitionPlugin",
    "ShotTypePlugin",
    "DominantColorPlugin",
    "DescriptorPlugin",
];

/// Construct the built-in plugin set from configuration.
pub fn load_plugins(settings: &Settings) -> Vec<Box<dyn FramePlugin>> {
    let mut plugins: Vec<Box<dyn FramePlugin>> = Vec::new();

    for name in MANIFEST_ORDER {
        match build_plugin(name, settings) {
            Ok(Some(plugin)) => {
                tracing::info!(plugin = name, "Loaded plugin");
                plugins.push(plugin);
            }
            Ok(None) => {
                tracing::info!(plugin = name, "Plugin not configured, skipping");
            }
            Err(e) => {
                tracing::error!(plugin = name, error = %e, "Failed to load plugin");
            }
        }
    }

    tracing::info!(count = plugins.len(), "Loaded plugins");
    plugins
}

fn build_plugin(
    name: &str,
    settings: &Settings,
) -> clipsight_core::Result<Option<Box<dyn FramePlugin>>> {
    let plugin: Box<dyn FramePlugin> = match name {
        "ObjectDetectionPlugin" => Box::new(ObjectDetectionPlugin::new(
            settings.models.object_detection.clone(),
        )),
        "FaceRecognitionPlugin" => Box::new(FaceRecognitionPlugin::from_settings(settings)),
        "ShotTypePlugin" => Box::new(ShotTypePlugin::new()),
        "DominantColorPlugin" => Box::new(DominantColorPlugin::new()),
        "DescriptorPlugin" => match &settings.analysis.caption_endpoint {
            Some(endpoint) => Box::new(DescriptorPlugin::new(endpoint.clone())?),
            None => return Ok(None),
        },
        other => {
            return Err(clipsight_core::Error::Plugin(format!(
                "Unknown plugin in manifest: {other}"
            )))
        }
    };
    Ok(Some(plugin))
}
