//! Service state and job admission
//!
//! One lock guards the status, the active path sets and the job counters.
//! Admission is check-and-reserve: a path enters its kind's active set only
//! if it is in neither set and the kind's cap has room. The returned guard
//! removes the path and records the outcome on drop, so the bookkeeping
//! survives worker panics.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use clipsight_core::metrics::{ServiceMetrics, ServiceMetricsSnapshot};
use clipsight_core::JobKind;

/// Process-wide operational status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Loading,
    Ready,
    Processing,
    Error,
}

/// Why a job was refused admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    AlreadyProcessing { video_path: String },
    Saturated { kind: JobKind, cap: usize },
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionError::AlreadyProcessing { video_path } => {
                write!(f, "Video already being processed: {video_path}")
            }
            AdmissionError::Saturated { kind, cap } => {
                write!(
                    f,
                    "Too many concurrent {} jobs (limit {cap})",
                    kind.as_str()
                )
            }
        }
    }
}

#[derive(Debug)]
struct StateInner {
    status: ServiceStatus,
    active_analyses: HashSet<String>,
    active_transcriptions: HashSet<String>,
    metrics: ServiceMetrics,
}

/// Consistent read-side snapshot for health responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: ServiceStatus,
    pub active_analyses: usize,
    pub active_transcriptions: usize,
    pub metrics: ServiceMetricsSnapshot,
}

pub struct ServiceState {
    inner: Mutex<StateInner>,
    max_concurrent_analyses: usize,
    max_concurrent_transcriptions: usize,
}

impl ServiceState {
    pub fn new(max_concurrent_analyses: usize, max_concurrent_transcriptions: usize) -> Self {
        Self {
            inner: Mutex::new(StateInner {
                status: ServiceStatus::Loading,
                active_analyses: HashSet::new(),
                active_transcriptions: HashSet::new(),
                metrics: ServiceMetrics::default(),
            }),
            max_concurrent_analyses,
            max_concurrent_transcriptions,
        }
    }

    pub fn set_status(&self, status: ServiceStatus) {
        self.inner.lock().status = status;
    }

    /// True when the path is in flight under either kind.
    pub fn is_processing(&self, video_path: &str) -> bool {
        let inner = self.inner.lock();
        inner.active_analyses.contains(video_path)
            || inner.active_transcriptions.contains(video_path)
    }

    /// Check-and-reserve. On success the path is in its kind's active set
    /// and the returned guard owns the reservation.
    pub fn begin(
        self: &Arc<Self>,
        kind: JobKind,
        video_path: &str,
    ) -> Result<JobGuard, AdmissionError> {
        let mut inner = self.inner.lock();

        if inner.active_analyses.contains(video_path)
            || inner.active_transcriptions.contains(video_path)
        {
            return Err(AdmissionError::AlreadyProcessing {
                video_path: video_path.to_string(),
            });
        }

        let (set, cap) = match kind {
            JobKind::Analyze => (&mut inner.active_analyses, self.max_concurrent_analyses),
            JobKind::Transcribe => (
                &mut inner.active_transcriptions,
                self.max_concurrent_transcriptions,
            ),
        };
        if set.len() >= cap {
            return Err(AdmissionError::Saturated { kind, cap });
        }

        set.insert(video_path.to_string());
        let active = set.len();
        drop(inner);

        tracing::info!(kind = kind.as_str(), video = video_path, active, "Started job");
        Ok(JobGuard {
            state: self.clone(),
            kind,
            video_path: video_path.to_string(),
            done: false,
        })
    }

    fn finish(&self, kind: JobKind, video_path: &str, success: bool) {
        let active = {
            let mut inner = self.inner.lock();
            let set = match kind {
                JobKind::Analyze => &mut inner.active_analyses,
                JobKind::Transcribe => &mut inner.active_transcriptions,
            };
            set.remove(video_path);
            let active = set.len();
            match kind {
                JobKind::Analyze => inner.metrics.record_analysis(success),
                JobKind::Transcribe => inner.metrics.record_transcription(success),
            }
            active
        };

        crate::metrics::record_job(kind, success);
        tracing::info!(
            kind = kind.as_str(),
            video = video_path,
            success,
            active,
            "Finished job"
        );
    }

    /// Snapshot taken under the lock: readers see pre- or post-state of any
    /// admission, never a torn mix.
    pub fn health_snapshot(&self) -> HealthStatus {
        let inner = self.inner.lock();
        HealthStatus {
            status: inner.status,
            active_analyses: inner.active_analyses.len(),
            active_transcriptions: inner.active_transcriptions.len(),
            metrics: inner.metrics.snapshot(),
        }
    }
}

/// Reservation held for the lifetime of a job. Dropping it without calling
/// [`JobGuard::finish`] counts the job as failed, which is exactly what a
/// panicking worker should report.
pub struct JobGuard {
    state: Arc<ServiceState>,
    kind: JobKind,
    video_path: String,
    done: bool,
}

impl JobGuard {
    pub fn finish(mut self, success: bool) {
        self.done = true;
        self.state.finish(self.kind, &self.video_path, success);
    }

    pub fn video_path(&self) -> &str {
        &self.video_path
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if !self.done {
            self.state.finish(self.kind, &self.video_path, false);
        }
    }
}
