//! Analysis pipeline
//!
//! Pulls frames lazily out of the extractor, batches them into a bounded
//! buffer, fans each batch through the plugin set, writes thumbnails, emits
//! progress per drained batch and assembles the final result. Runs entirely
//! on a blocking worker; one job at a time drives the plugin set.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use clipsight_config::constants::MEMORY_BACKOFF_MS;
use clipsight_config::{AnalysisConfig, Settings};
use clipsight_core::{
    AnalysisSummary, AnalyzeRequest, Error, FrameAnalysis, FrameRecord, Result, StageMetrics,
    StageMetricsCollector, StageTimer, VideoAnalysisResult,
};
use clipsight_plugins::PluginSet;

use crate::extract::FrameStream;
use crate::memory::MemoryMonitor;
use crate::progress::{AnalysisProgress, ProgressSender};
use crate::thumbnail::{thumbnail_path, write_thumbnail};

const STAGE_NAMES: &[&str] = &[
    "plugin_setup",
    "frame_extraction",
    "frame_analysis",
    "thumbnail_extraction",
];

pub struct AnalysisService {
    config: AnalysisConfig,
    plugins: Arc<Mutex<PluginSet>>,
}

impl AnalysisService {
    pub fn new(settings: &Settings, plugins: PluginSet) -> Self {
        Self {
            config: settings.analysis.clone(),
            plugins: Arc::new(Mutex::new(plugins)),
        }
    }

    /// Effective per-job knobs after request overrides.
    fn effective_settings(&self, request: &AnalyzeRequest) -> (f64, u32, usize) {
        (
            request
                .settings
                .sample_interval_seconds
                .unwrap_or(self.config.sample_interval_seconds),
            request
                .settings
                .target_resolution_height
                .unwrap_or(self.config.target_resolution_height),
            request
                .settings
                .frame_buffer_limit
                .unwrap_or(self.config.frame_buffer_limit),
        )
    }

    /// Run one analysis job to completion. Never returns an error: pipeline
    /// failures produce an error-result with empty frame analyses.
    pub fn process(
        &self,
        request: &AnalyzeRequest,
        progress: Option<&ProgressSender<AnalysisProgress>>,
    ) -> VideoAnalysisResult {
        let start = Instant::now();
        let mut memory = MemoryMonitor::new(self.config.memory_pressure_threshold_gb);
        let mut stages = StageMetricsCollector::new();

        // Plugins keep per-job state; the lock serializes jobs over the set.
        let mut plugins = self.plugins.lock();

        let setup_timer = StageTimer::start("plugin_setup");
        plugins.setup(Path::new(&request.video_path), &request.job_id);
        stages.record_execution("plugin_setup", setup_timer.elapsed_seconds());

        let outcome = self.analyze_frames(
            &mut plugins,
            request,
            &mut memory,
            &mut stages,
            progress,
            start,
        );

        plugins.cleanup();

        let result = match outcome {
            Ok(frame_analyses) => {
                let frames = frame_analyses.len();
                tracing::info!(
                    video = %request.video_path,
                    frames,
                    "Completed analysis"
                );
                let current_mb = memory.memory_mb();
                let performance_metrics = STAGE_NAMES
                    .iter()
                    .map(|&stage| {
                        let duration = stages.duration(stage);
                        let counted = if stage == "frame_analysis" { frames } else { 0 };
                        StageMetrics {
                            stage: stage.to_string(),
                            duration_seconds: duration,
                            frames_processed: counted,
                            fps: if duration > 0.0 && counted > 0 {
                                counted as f64 / duration
                            } else {
                                0.0
                            },
                            memory_mb: current_mb,
                            peak_memory_mb: memory.peak_mb(),
                        }
                    })
                    .collect();

                VideoAnalysisResult {
                    video_file: request.video_path.clone(),
                    frame_analysis: frame_analyses,
                    summary: AnalysisSummary {
                        total_frames_analyzed: frames,
                        total_analysis_time_seconds: round2(start.elapsed().as_secs_f64()),
                        peak_memory_mb: memory.peak_mb(),
                        memory_cleanups: memory.cleanup_count(),
                        error: None,
                    },
                    performance_metrics: Some(performance_metrics),
                    plugin_performance: Some(plugins.metrics()),
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(video = %request.video_path, error = %e, "Analysis failed");
                VideoAnalysisResult::from_error(
                    &request.video_path,
                    e.to_string(),
                    memory.peak_mb(),
                    memory.cleanup_count(),
                )
            }
        };

        plugins.reset_metrics();
        result
    }

    fn analyze_frames(
        &self,
        plugins: &mut PluginSet,
        request: &AnalyzeRequest,
        memory: &mut MemoryMonitor,
        stages: &mut StageMetricsCollector,
        progress: Option<&ProgressSender<AnalysisProgress>>,
        job_start: Instant,
    ) -> Result<Vec<FrameAnalysis>> {
        let (sample_interval, target_height, buffer_limit) = self.effective_settings(request);

        let open_timer = Instant::now();
        let mut stream =
            FrameStream::open(Path::new(&request.video_path), target_height, sample_interval)?;
        stages.record_execution("frame_extraction", open_timer.elapsed().as_secs_f64());

        let total_frames = stream.plan().total_sampled_frames;
        let analysis_timer = StageTimer::start("frame_analysis");

        let mut frame_analyses: Vec<FrameAnalysis> = Vec::new();
        let mut batch: Vec<FrameRecord> = Vec::with_capacity(buffer_limit);
        let mut frames_processed: u64 = 0;
        let mut batches_drained: usize = 0;

        loop {
            let pull_timer = Instant::now();
            let next = stream.next();
            stages.record_execution("frame_extraction", pull_timer.elapsed().as_secs_f64());

            match next {
                Some(Ok(frame)) => batch.push(frame),
                Some(Err(e)) => return Err(e),
                None => break,
            }

            if batch.len() >= buffer_limit {
                frames_processed += self.drain_batch(
                    plugins,
                    &mut batch,
                    &mut frame_analyses,
                    request,
                    stages,
                )? as u64;
                batches_drained += 1;

                if let Some(progress) = progress {
                    progress.send(progress_event(
                        frames_processed,
                        total_frames,
                        job_start.elapsed().as_secs_f64(),
                    ));
                }

                if batches_drained % self.config.memory_cleanup_interval.max(1) == 0 {
                    memory.force_cleanup(false);
                }
                if memory.check_pressure() {
                    memory.force_cleanup(true);
                    std::thread::sleep(Duration::from_millis(MEMORY_BACKOFF_MS));
                }
            }
        }

        // Residual batch, then the guaranteed final progress event.
        if !batch.is_empty() {
            frames_processed +=
                self.drain_batch(plugins, &mut batch, &mut frame_analyses, request, stages)? as u64;
        }
        if let Some(progress) = progress {
            progress.send_final(progress_event(
                frames_processed,
                total_frames,
                job_start.elapsed().as_secs_f64(),
            ));
        }

        stages.record_execution("frame_analysis", analysis_timer.elapsed_seconds());
        Ok(frame_analyses)
    }

    /// Seed each buffered frame, run the plugin chain, write the thumbnail
    /// and release the pixels.
    fn drain_batch(
        &self,
        plugins: &mut PluginSet,
        batch: &mut Vec<FrameRecord>,
        frame_analyses: &mut Vec<FrameAnalysis>,
        request: &AnalyzeRequest,
        stages: &mut StageMetricsCollector,
    ) -> Result<usize> {
        let video_path = Path::new(&request.video_path);
        let thumbnail_dir = Path::new(&self.config.thumbnail_dir);
        let drained = batch.len();

        for mut frame in batch.drain(..) {
            let thumb_path = thumbnail_path(thumbnail_dir, &request.video_path, frame.frame_idx);
            let mut analysis = FrameAnalysis {
                start_time_ms: frame.start_time_ms,
                end_time_ms: frame.end_time_ms,
                duration_ms: frame.duration_ms(),
                frame_idx: frame.frame_idx,
                scale_factor: frame.scale_factor,
                job_id: request.job_id.clone(),
                thumbnail_path: thumb_path.to_string_lossy().into_owned(),
                values: serde_json::Map::new(),
            };

            plugins.process_frame(&frame, &mut analysis, video_path);

            let thumb_timer = Instant::now();
            if let Err(e) = write_thumbnail(&frame, &thumb_path) {
                tracing::warn!(
                    frame_idx = frame.frame_idx,
                    error = %e,
                    "Failed to write thumbnail"
                );
            }
            stages.record_execution("thumbnail_extraction", thumb_timer.elapsed().as_secs_f64());

            frame_analyses.push(analysis);
            frame.release_pixels();
        }

        Ok(drained)
    }
}

fn progress_event(frames_processed: u64, total_frames: u64, elapsed: f64) -> AnalysisProgress {
    let percent = if total_frames > 0 {
        (frames_processed as f64 / total_frames as f64 * 100.0).min(100.0)
    } else {
        0.0
    };
    AnalysisProgress {
        progress: round1(percent),
        elapsed: round2(elapsed),
        frames_analyzed: frames_processed,
        total_frames,
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Persist a result as pretty-printed UTF-8 JSON, creating parent
/// directories first.
pub fn save_json<T: Serialize>(value: &T, output_path: &Path) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(output_path, json).map_err(Error::from)?;
    tracing::info!(path = %output_path.display(), "Results saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipsight_core::AnalyzeSettings;

    fn service() -> AnalysisService {
        let settings = Settings::default();
        AnalysisService::new(&settings, PluginSet::new(Vec::new(), Default::default()))
    }

    fn request(settings: AnalyzeSettings) -> AnalyzeRequest {
        AnalyzeRequest {
            video_path: "/nonexistent/video.mp4".to_string(),
            json_file_path: "/tmp/out.json".to_string(),
            job_id: "job-1".to_string(),
            settings,
        }
    }

    #[test]
    fn test_progress_event_rounds_and_caps() {
        let event = progress_event(7, 9, 1.2345);
        assert_eq!(event.progress, 77.8);
        assert_eq!(event.elapsed, 1.23);

        let done = progress_event(12, 9, 2.0);
        assert_eq!(done.progress, 100.0);

        let unknown = progress_event(5, 0, 1.0);
        assert_eq!(unknown.progress, 0.0);
    }

    #[test]
    fn test_settings_overrides_apply() {
        let service = service();
        let req = request(AnalyzeSettings {
            sample_interval_seconds: Some(5.0),
            target_resolution_height: Some(480),
            frame_buffer_limit: None,
        });
        let (interval, height, buffer) = service.effective_settings(&req);
        assert_eq!(interval, 5.0);
        assert_eq!(height, 480);
        assert_eq!(buffer, Settings::default().analysis.frame_buffer_limit);
    }

    #[test]
    fn test_missing_video_yields_error_result() {
        let service = service();
        let result = service.process(&request(AnalyzeSettings::default()), None);

        assert!(result.frame_analysis.is_empty());
        let error = result.error.expect("error expected");
        assert!(error.contains("Frame extraction failed"));
        assert_eq!(result.summary.error.as_deref(), Some(error.as_str()));
    }

    #[test]
    fn test_final_progress_is_delivered_even_on_failure_free_empty_run() {
        let service = service();
        let (sender, mut rx) = ProgressSender::<AnalysisProgress>::channel();

        // The job fails at open, so no progress is emitted; the channel
        // simply closes when the sender is dropped.
        let result = std::thread::spawn(move || {
            service.process(&request(AnalyzeSettings::default()), Some(&sender))
        })
        .join()
        .unwrap();
        assert!(result.error.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_save_json_creates_parents(){
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/result.json");
        save_json(&serde_json::json!({"ok": true}), &path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\n  \"ok\": true"));
    }
}
