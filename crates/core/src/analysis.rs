//! Per-frame analysis maps and the assembled analysis result

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::metrics::{PluginMetrics, StageMetrics};

/// Analysis record for a single sampled frame.
///
/// The fixed keys are populated by the pipeline when the frame is seeded;
/// every plugin then merges its own keys into `values` in declared order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameAnalysis {
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub duration_ms: i64,
    pub frame_idx: i64,
    pub scale_factor: f64,
    pub job_id: String,
    pub thumbnail_path: String,
    /// Plugin-contributed keys (objects, faces, dominant_color, ...).
    #[serde(flatten)]
    pub values: serde_json::Map<String, Value>,
}

impl FrameAnalysis {
    /// Merge a plugin's delta into this record. Later writes win.
    pub fn merge(&mut self, delta: serde_json::Map<String, Value>) {
        for (key, value) in delta {
            self.values.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// Summary block of an analysis result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub total_frames_analyzed: usize,
    pub total_analysis_time_seconds: f64,
    pub peak_memory_mb: f64,
    pub memory_cleanups: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Complete result of one analysis job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoAnalysisResult {
    pub video_file: String,
    pub frame_analysis: Vec<FrameAnalysis>,
    pub summary: AnalysisSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_metrics: Option<Vec<StageMetrics>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_performance: Option<Vec<PluginMetrics>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VideoAnalysisResult {
    /// Result for a job that failed before producing any frames. The error
    /// string lands both at the top level and inside the summary.
    pub fn from_error(video_path: &str, error: String, peak_mb: f64, cleanups: u64) -> Self {
        Self {
            video_file: video_path.to_string(),
            frame_analysis: Vec::new(),
            summary: AnalysisSummary {
                peak_memory_mb: peak_mb,
                memory_cleanups: cleanups,
                error: Some(error.clone()),
                ..Default::default()
            },
            performance_metrics: None,
            plugin_performance: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(start_ms: i64) -> FrameAnalysis {
        FrameAnalysis {
            start_time_ms: start_ms,
            end_time_ms: start_ms + 1000,
            duration_ms: 1000,
            frame_idx: start_ms / 33,
            scale_factor: 1.0,
            job_id: "job-1".to_string(),
            thumbnail_path: String::new(),
            values: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_merge_overrides_later_wins() {
        let mut analysis = frame(0);
        let mut first = serde_json::Map::new();
        first.insert("shot_type".into(), json!("long-shot"));
        analysis.merge(first);

        let mut second = serde_json::Map::new();
        second.insert("shot_type".into(), json!("close-up"));
        second.insert("brightness".into(), json!(0.4));
        analysis.merge(second);

        assert_eq!(analysis.get("shot_type"), Some(&json!("close-up")));
        assert_eq!(analysis.get("brightness"), Some(&json!(0.4)));
    }

    #[test]
    fn test_plugin_keys_flatten_into_serialized_record() {
        let mut analysis = frame(2000);
        let mut delta = serde_json::Map::new();
        delta.insert("objects".into(), json!([{"label": "cat"}]));
        analysis.merge(delta);

        let value = serde_json::to_value(&analysis).unwrap();
        assert_eq!(value["start_time_ms"], json!(2000));
        assert_eq!(value["objects"][0]["label"], json!("cat"));
    }

    #[test]
    fn test_error_result_mirrors_error_into_summary() {
        let result = VideoAnalysisResult::from_error("/v/a.mp4", "decode failed".into(), 12.5, 3);
        assert!(result.frame_analysis.is_empty());
        assert_eq!(result.error.as_deref(), Some("decode failed"));
        assert_eq!(result.summary.error.as_deref(), Some("decode failed"));
        assert_eq!(result.summary.memory_cleanups, 3);
    }
}
