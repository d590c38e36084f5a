//! Metrics collection and reporting.

use std::time::Instant;

use parking_lot::RwLock;
use tracing::debug;

use pipview_ipc::{PipelineStats, ViewerMetrics, WarningType};

/// Device recreations within one reporting interval that count as a burst.
pub const DEVICE_LOSS_BURST_THRESHOLD: u64 = 3;

/// Derives viewer metrics from pipeline counter snapshots.
pub struct MetricsCollector {
    start_time: RwLock<Option<Instant>>,
    last_report_time: RwLock<Instant>,
    last_stats: RwLock<PipelineStats>,
    loss_burst_threshold: u64,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new(loss_burst_threshold: u64) -> Self {
        Self {
            start_time: RwLock::new(None),
            last_report_time: RwLock::new(Instant::now()),
            last_stats: RwLock::new(PipelineStats::default()),
            loss_burst_threshold,
        }
    }

    /// Start metrics collection from the given baseline.
    pub fn start(&self, baseline: PipelineStats) {
        *self.start_time.write() = Some(Instant::now());
        *self.last_report_time.write() = Instant::now();
        *self.last_stats.write() = baseline;
    }

    /// Stop metrics collection.
    pub fn stop(&self) {
        *self.start_time.write() = None;
    }

    /// Returns true between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.start_time.read().is_some()
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self, stats: PipelineStats) -> ViewerMetrics {
        let now = Instant::now();
        let elapsed = now.duration_since(*self.last_report_time.read());
        let last = *self.last_stats.read();

        let presented = stats.frames_presented.saturating_sub(last.frames_presented);
        let fps = if elapsed.as_secs_f32() > 0.0 {
            presented as f32 / elapsed.as_secs_f32()
        } else {
            0.0
        };

        let uptime_seconds = self
            .start_time
            .read()
            .map(|s| now.duration_since(s).as_secs())
            .unwrap_or(0);

        ViewerMetrics {
            fps,
            uptime_seconds,
            stats,
        }
    }

    /// Check for warnings since the last report.
    pub fn check_warnings(&self, stats: PipelineStats) -> Vec<WarningType> {
        let last = *self.last_stats.read();
        let mut warnings = Vec::new();

        let recreations = stats
            .device_recreations
            .saturating_sub(last.device_recreations);
        if recreations >= self.loss_burst_threshold {
            warnings.push(WarningType::DeviceLossBurst { count: recreations });
        }

        let drops = stats.frames_dropped.saturating_sub(last.frames_dropped);
        if drops > 0 {
            warnings.push(WarningType::FrameDrops { count: drops });
        }

        let failures = stats
            .recovery_failures
            .saturating_sub(last.recovery_failures);
        if failures > 0 {
            warnings.push(WarningType::RecoveryFailed { count: failures });
        }

        if !warnings.is_empty() {
            debug!(count = warnings.len(), "Performance warnings");
        }
        warnings
    }

    /// Update last report time and baseline for interval calculations.
    pub fn mark_reported(&self, stats: PipelineStats) {
        *self.last_report_time.write() = Instant::now();
        *self.last_stats.write() = stats;
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(DEVICE_LOSS_BURST_THRESHOLD)
    }
}
