//! Plugin harness
//!
//! Drives every loaded plugin over each frame: applies the skip policy,
//! times executions, contains plugin failures and merges deltas into the
//! frame's analysis record.

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use clipsight_core::{FrameAnalysis, FramePlugin, FrameRecord, PluginMetrics, PluginMetricsCollector};

/// Plugins that run on every frame regardless of their configured skip
/// interval.
pub const CRITICAL_PLUGINS: &[&str] = &["FaceRecognitionPlugin", "ObjectDetectionPlugin"];

/// An ordered set of plugins plus their per-job bookkeeping.
///
/// The set is driven for one job at a time; the owner serializes access at
/// job level (plugins keep per-job state such as smoothing windows and the
/// unknown-face registry).
pub struct PluginSet {
    plugins: Vec<Box<dyn FramePlugin>>,
    skip_intervals: HashMap<String, u32>,
    invocation_counters: HashMap<&'static str, u64>,
    metrics: PluginMetricsCollector,
}

impl PluginSet {
    pub fn new(plugins: Vec<Box<dyn FramePlugin>>, skip_intervals: HashMap<String, u32>) -> Self {
        Self {
            plugins,
            skip_intervals,
            invocation_counters: HashMap::new(),
            metrics: PluginMetricsCollector::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Per-job initialization. A failing plugin stays loaded and will simply
    /// produce empty results for this job.
    pub fn setup(&mut self, video_path: &Path, job_id: &str) {
        for plugin in &mut self.plugins {
            if let Err(e) = plugin.setup(video_path, job_id) {
                tracing::error!(plugin = plugin.name(), error = %e, "Plugin setup failed");
            }
        }
    }

    /// Run every applicable plugin over one frame, merging each delta into
    /// `analysis` in declared order. Plugin errors are recorded and contained.
    pub fn process_frame(
        &mut self,
        frame: &FrameRecord,
        analysis: &mut FrameAnalysis,
        video_path: &Path,
    ) {
        for plugin in &mut self.plugins {
            let name = plugin.name();

            if !Self::should_run(
                &mut self.invocation_counters,
                &self.skip_intervals,
                name,
            ) {
                continue;
            }

            let start = Instant::now();
            match plugin.analyze_frame(frame, analysis, video_path) {
                Ok(delta) => {
                    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
                    self.metrics.record_execution(name, duration_ms);
                    analysis.merge(delta);
                }
                Err(e) => {
                    self.metrics.record_error(name);
                    tracing::warn!(
                        plugin = name,
                        frame_idx = frame.frame_idx,
                        error = %e,
                        "Plugin failed on frame"
                    );
                }
            }
        }
    }

    /// Skip policy: a plugin with interval K runs on invocations 1, 1+K,
    /// 1+2K, ... Critical plugins always run and do not consume a counter.
    fn should_run(
        counters: &mut HashMap<&'static str, u64>,
        skip_intervals: &HashMap<String, u32>,
        name: &'static str,
    ) -> bool {
        if CRITICAL_PLUGINS.contains(&name) {
            return true;
        }

        let interval = skip_intervals.get(name).copied().unwrap_or(1).max(1) as u64;
        let counter = counters.entry(name).or_insert(0);
        let run = *counter % interval == 0;
        *counter += 1;
        run
    }

    /// Per-job teardown.
    pub fn cleanup(&mut self) {
        for plugin in &mut self.plugins {
            plugin.cleanup();
        }
    }

    /// Aggregated plugin metrics, sorted by total duration descending.
    pub fn metrics(&self) -> Vec<PluginMetrics> {
        self.metrics.metrics()
    }

    pub fn error_count(&self, plugin_name: &str) -> u64 {
        self.metrics.error_count(plugin_name)
    }

    /// Clear metrics and skip counters so the next job starts clean.
    pub fn reset_metrics(&mut self) {
        self.metrics.reset();
        self.invocation_counters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipsight_core::{PluginDelta, Result};
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct CountingPlugin {
        name: &'static str,
        runs: Arc<AtomicU64>,
        fail: bool,
    }

    impl FramePlugin for CountingPlugin {
        fn name(&self) -> &'static str {
            self.name
        }

        fn setup(&mut self, _video_path: &Path, _job_id: &str) -> Result<()> {
            Ok(())
        }

        fn analyze_frame(
            &mut self,
            _frame: &FrameRecord,
            _analysis: &FrameAnalysis,
            _video_path: &Path,
        ) -> Result<PluginDelta> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(clipsight_core::Error::Plugin("boom".into()));
            }
            let mut delta = PluginDelta::new();
            delta.insert(self.name.to_string(), json!(true));
            Ok(delta)
        }
    }

    fn frame() -> FrameRecord {
        FrameRecord {
            pixels: vec![0; 3],
            width: 1,
            height: 1,
            frame_idx: 0,
            start_time_ms: 0,
            end_time_ms: 1000,
            scale_factor: 1.0,
            original_width: 1,
            original_height: 1,
        }
    }

    fn analysis() -> FrameAnalysis {
        FrameAnalysis {
            start_time_ms: 0,
            end_time_ms: 1000,
            duration_ms: 1000,
            frame_idx: 0,
            scale_factor: 1.0,
            job_id: "j".into(),
            thumbnail_path: String::new(),
            values: serde_json::Map::new(),
        }
    }

    fn run_frames(set: &mut PluginSet, n: usize) {
        let f = frame();
        for _ in 0..n {
            let mut a = analysis();
            set.process_frame(&f, &mut a, Path::new("/v/a.mp4"));
        }
    }

    #[test]
    fn test_skip_interval_runs_first_then_every_kth() {
        let runs = Arc::new(AtomicU64::new(0));
        let plugin = CountingPlugin {
            name: "ShotTypePlugin",
            runs: runs.clone(),
            fail: false,
        };
        let mut set = PluginSet::new(
            vec![Box::new(plugin)],
            HashMap::from([("ShotTypePlugin".to_string(), 3u32)]),
        );

        // 7 invocations with K=3 exercise invocations 1, 4 and 7.
        run_frames(&mut set, 7);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_critical_plugins_ignore_skip_interval() {
        let runs = Arc::new(AtomicU64::new(0));
        let plugin = CountingPlugin {
            name: "ObjectDetectionPlugin",
            runs: runs.clone(),
            fail: false,
        };
        let mut set = PluginSet::new(
            vec![Box::new(plugin)],
            HashMap::from([("ObjectDetectionPlugin".to_string(), 10u32)]),
        );

        run_frames(&mut set, 5);
        assert_eq!(runs.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_plugin_crash_is_contained_and_counted() {
        let crash_runs = Arc::new(AtomicU64::new(0));
        let ok_runs = Arc::new(AtomicU64::new(0));
        let mut set = PluginSet::new(
            vec![
                Box::new(CountingPlugin {
                    name: "ObjectDetectionPlugin",
                    runs: crash_runs.clone(),
                    fail: true,
                }),
                Box::new(CountingPlugin {
                    name: "FaceRecognitionPlugin",
                    runs: ok_runs.clone(),
                    fail: false,
                }),
            ],
            HashMap::new(),
        );

        let f = frame();
        let mut records = Vec::new();
        for _ in 0..4 {
            let mut a = analysis();
            set.process_frame(&f, &mut a, Path::new("/v/a.mp4"));
            records.push(a);
        }

        assert_eq!(set.error_count("ObjectDetectionPlugin"), 4);
        assert_eq!(ok_runs.load(Ordering::SeqCst), 4);
        for record in &records {
            assert_eq!(record.get("FaceRecognitionPlugin"), Some(&json!(true)));
            assert!(record.get("ObjectDetectionPlugin").is_none());
        }
    }

    #[test]
    fn test_metrics_sorted_and_reset() {
        let runs = Arc::new(AtomicU64::new(0));
        let mut set = PluginSet::new(
            vec![Box::new(CountingPlugin {
                name: "FaceRecognitionPlugin",
                runs,
                fail: false,
            })],
            HashMap::new(),
        );
        run_frames(&mut set, 3);

        let metrics = set.metrics();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].frames_processed, 3);

        set.reset_metrics();
        assert!(set.metrics().is_empty());
    }
}
