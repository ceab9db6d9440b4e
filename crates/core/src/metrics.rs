//! Metrics tracking and aggregation

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Service-level job counters.
///
/// Success rates are derived on read; a fresh service reports 100%.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceMetrics {
    pub total_analyses: u64,
    pub total_transcriptions: u64,
    pub failed_analyses: u64,
    pub failed_transcriptions: u64,
}

/// Read-side snapshot of [`ServiceMetrics`] with derived rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetricsSnapshot {
    pub total_analyses: u64,
    pub total_transcriptions: u64,
    pub failed_analyses: u64,
    pub failed_transcriptions: u64,
    pub success_rate_analyses: f64,
    pub success_rate_transcriptions: f64,
}

impl ServiceMetrics {
    pub fn record_analysis(&mut self, success: bool) {
        self.total_analyses += 1;
        if !success {
            self.failed_analyses += 1;
        }
    }

    pub fn record_transcription(&mut self, success: bool) {
        self.total_transcriptions += 1;
        if !success {
            self.failed_transcriptions += 1;
        }
    }

    pub fn snapshot(&self) -> ServiceMetricsSnapshot {
        ServiceMetricsSnapshot {
            total_analyses: self.total_analyses,
            total_transcriptions: self.total_transcriptions,
            failed_analyses: self.failed_analyses,
            failed_transcriptions: self.failed_transcriptions,
            success_rate_analyses: success_rate(self.total_analyses, self.failed_analyses),
            success_rate_transcriptions: success_rate(
                self.total_transcriptions,
                self.failed_transcriptions,
            ),
        }
    }
}

fn success_rate(total: u64, failed: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    ((total - failed) as f64 / total as f64) * 100.0
}

/// Aggregated per-plugin performance numbers for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetrics {
    pub plugin_name: String,
    pub total_duration_seconds: f64,
    pub frames_processed: usize,
    pub avg_time_per_frame_ms: f64,
    pub min_time_ms: f64,
    pub max_time_ms: f64,
    pub timeout_count: u64,
    pub error_count: u64,
}

/// Collects per-plugin execution timings and error counts.
///
/// Appends are sequenced by the caller (the harness drives plugins one frame
/// at a time), so no write is ever lost.
#[derive(Debug, Default)]
pub struct PluginMetricsCollector {
    timings: HashMap<String, Vec<f64>>,
    errors: HashMap<String, u64>,
    timeouts: HashMap<String, u64>,
}

impl PluginMetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_execution(&mut self, plugin_name: &str, duration_ms: f64) {
        self.timings
            .entry(plugin_name.to_string())
            .or_default()
            .push(duration_ms);
    }

    pub fn record_error(&mut self, plugin_name: &str) {
        *self.errors.entry(plugin_name.to_string()).or_default() += 1;
    }

    pub fn record_timeout(&mut self, plugin_name: &str) {
        *self.timeouts.entry(plugin_name.to_string()).or_default() += 1;
    }

    pub fn error_count(&self, plugin_name: &str) -> u64 {
        self.errors.get(plugin_name).copied().unwrap_or(0)
    }

    /// Aggregate metrics for all plugins, sorted by total duration descending.
    pub fn metrics(&self) -> Vec<PluginMetrics> {
        let mut metrics: Vec<PluginMetrics> = self
            .timings
            .iter()
            .filter(|(_, timings)| !timings.is_empty())
            .map(|(name, timings)| {
                let total_ms: f64 = timings.iter().sum();
                PluginMetrics {
                    plugin_name: name.clone(),
                    total_duration_seconds: total_ms / 1000.0,
                    frames_processed: timings.len(),
                    avg_time_per_frame_ms: total_ms / timings.len() as f64,
                    min_time_ms: timings.iter().cloned().fold(f64::INFINITY, f64::min),
                    max_time_ms: timings.iter().cloned().fold(0.0, f64::max),
                    timeout_count: self.timeouts.get(name).copied().unwrap_or(0),
                    error_count: self.errors.get(name).copied().unwrap_or(0),
                }
            })
            .collect();

        metrics.sort_by(|a, b| {
            b.total_duration_seconds
                .partial_cmp(&a.total_duration_seconds)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        metrics
    }

    pub fn reset(&mut self) {
        self.timings.clear();
        self.errors.clear();
        self.timeouts.clear();
    }
}

/// Performance record for one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub stage: String,
    pub duration_seconds: f64,
    pub frames_processed: usize,
    pub fps: f64,
    pub memory_mb: f64,
    pub peak_memory_mb: f64,
}

/// Accumulates execution time per named stage.
#[derive(Debug, Default)]
pub struct StageMetricsCollector {
    durations: HashMap<String, f64>,
}

impl StageMetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_execution(&mut self, stage: &str, duration_seconds: f64) {
        *self.durations.entry(stage.to_string()).or_default() += duration_seconds;
    }

    pub fn duration(&self, stage: &str) -> f64 {
        self.durations.get(stage).copied().unwrap_or(0.0)
    }

    pub fn reset(&mut self) {
        self.durations.clear();
    }
}

/// Scoped wall-clock timer for a pipeline stage.
#[derive(Debug)]
pub struct StageTimer {
    pub stage_name: &'static str,
    start: Instant,
}

impl StageTimer {
    pub fn start(stage_name: &'static str) -> Self {
        Self {
            stage_name,
            start: Instant::now(),
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
