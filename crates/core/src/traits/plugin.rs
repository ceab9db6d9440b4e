//! Frame analyzer plugin interface

use std::path::Path;

use serde_json::Value;

use crate::analysis::FrameAnalysis;
use crate::error::Result;
use crate::frame::FrameRecord;

/// Keys a plugin contributes to a frame's analysis record.
pub type PluginDelta = serde_json::Map<String, Value>;

/// A frame analyzer.
///
/// Plugins run synchronously on the worker that owns the job, one frame at a
/// time, in the order they appear in the manifest. A plugin sees the analysis
/// state left by the plugins before it (face boxes feed the shot-type
/// classifier, for example) and returns only its own delta.
///
/// Coordinates in a delta must be original-frame coordinates: multiply any
/// pixel position measured on the (possibly downscaled) buffer by
/// `frame.scale_factor` before reporting it.
pub trait FramePlugin: Send {
    /// Stable identifier, also the key used for skip-interval configuration
    /// and metrics.
    fn name(&self) -> &'static str;

    /// Per-job initialization. Called once before any frame is processed.
    /// A failure here is logged; the plugin stays loaded and simply produces
    /// empty results.
    fn setup(&mut self, video_path: &Path, job_id: &str) -> Result<()>;

    /// Analyze one frame and return the keys to merge into its record.
    fn analyze_frame(
        &mut self,
        frame: &FrameRecord,
        analysis: &FrameAnalysis,
        video_path: &Path,
    ) -> Result<PluginDelta>;

    /// Accumulated results over all frames of the current job.
    fn results(&self) -> Option<Value> {
        None
    }

    /// High-level summary of the current job.
    fn summary(&self) -> Option<Value> {
        None
    }

    /// Drop per-job state. Called once after the job completes.
    fn cleanup(&mut self) {}
}
