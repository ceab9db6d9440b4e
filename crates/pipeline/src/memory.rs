//! Memory monitoring
//!
//! Advisory process/system memory tracking backing the pipeline's cleanup
//! cadence and pressure backoff. Numbers feed the job summary; they are a
//! backpressure signal, not a correctness requirement.

use std::time::Instant;

use sysinfo::{Pid, System};

use clipsight_config::constants::CLEANUP_MIN_INTERVAL_SECS;

/// Snapshot of memory statistics for the job summary.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemoryStats {
    pub current_mb: f64,
    pub peak_mb: f64,
    pub available_mb: f64,
    pub cleanup_count: u64,
}

pub struct MemoryMonitor {
    system: System,
    pid: Option<Pid>,
    pressure_threshold_gb: f64,
    peak_mb: f64,
    cleanup_count: u64,
    last_cleanup: Instant,
}

impl MemoryMonitor {
    pub fn new(pressure_threshold_gb: f64) -> Self {
        let pid = sysinfo::get_current_pid().ok();
        Self {
            system: System::new(),
            pid,
            pressure_threshold_gb,
            peak_mb: 0.0,
            cleanup_count: 0,
            last_cleanup: Instant::now(),
        }
    }

    /// Current process RSS in megabytes, updating the recorded peak.
    pub fn memory_mb(&mut self) -> f64 {
        let Some(pid) = self.pid else {
            return 0.0;
        };
        self.system.refresh_process(pid);
        let mb = self
            .system
            .process(pid)
            .map(|p| p.memory() as f64 / 1024.0 / 1024.0)
            .unwrap_or(0.0);
        self.peak_mb = self.peak_mb.max(mb);
        mb
    }

    /// Available system memory in gigabytes.
    pub fn available_gb(&mut self) -> f64 {
        self.system.refresh_memory();
        self.system.available_memory() as f64 / 1024.0 / 1024.0 / 1024.0
    }

    /// Record a forced cleanup pass. Non-aggressive passes are rate-limited.
    pub fn force_cleanup(&mut self, aggressive: bool) {
        let now = Instant::now();
        if !aggressive
            && now.duration_since(self.last_cleanup).as_secs_f64() < CLEANUP_MIN_INTERVAL_SECS
        {
            return;
        }
        self.last_cleanup = now;
        self.cleanup_count += 1;

        let current = self.memory_mb();
        if aggressive || self.cleanup_count % 10 == 0 {
            tracing::debug!(
                cleanup = self.cleanup_count,
                current_mb = format_args!("{current:.0}"),
                peak_mb = format_args!("{:.0}", self.peak_mb),
                aggressive,
                "Memory cleanup"
            );
        }
    }

    /// True when available system memory has fallen below the configured
    /// pressure threshold.
    pub fn check_pressure(&mut self) -> bool {
        let available = self.available_gb();
        if available < self.pressure_threshold_gb {
            tracing::warn!(
                available_gb = format_args!("{available:.1}"),
                "Memory pressure detected"
            );
            return true;
        }
        false
    }

    pub fn peak_mb(&self) -> f64 {
        self.peak_mb
    }

    pub fn cleanup_count(&self) -> u64 {
        self.cleanup_count
    }

    pub fn stats(&mut self) -> MemoryStats {
        let current = self.memory_mb();
        let available = self.available_gb() * 1024.0;
        MemoryStats {
            current_mb: current,
            peak_mb: self.peak_mb,
            available_mb: available,
            cleanup_count: self.cleanup_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_tracks_current() {
        let mut monitor = MemoryMonitor::new(2.0);
        let current = monitor.memory_mb();
        assert!(monitor.peak_mb() >= current);
    }

    #[test]
    fn test_cleanup_rate_limited_unless_aggressive() {
        let mut monitor = MemoryMonitor::new(2.0);
        monitor.force_cleanup(false);
        monitor.force_cleanup(false);
        assert_eq!(monitor.cleanup_count(), 1);

        monitor.force_cleanup(true);
        assert_eq!(monitor.cleanup_count(), 2);
    }

    #[test]
    fn test_pressure_with_generous_threshold_is_false() {
        // 0 GB threshold can never be undercut.
        let mut monitor = MemoryMonitor::new(0.0);
        assert!(!monitor.check_pressure());
    }

    #[test]
    fn test_stats_reflect_cleanups() {
        let mut monitor = MemoryMonitor::new(2.0);
        monitor.force_cleanup(true);
        let stats = monitor.stats();
        assert_eq!(stats.cleanup_count, 1);
        assert!(stats.peak_mb >= stats.current_mb);
    }
}
