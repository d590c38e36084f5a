//! Lock-free pipeline counters.

use std::sync::atomic::{AtomicU64, Ordering};

use pipview_ipc::PipelineStats;

use crate::recovery::RecoveryReport;

/// Counters updated from the frame handler and read from any thread.
#[derive(Debug, Default)]
pub struct FrameCounters {
    notifications: AtomicU64,
    spurious_wakeups: AtomicU64,
    frames_presented: AtomicU64,
    frames_dropped: AtomicU64,
    size_changes: AtomicU64,
    recoveries: AtomicU64,
    recovery_attempts: AtomicU64,
    device_recreations: AtomicU64,
    recovery_failures: AtomicU64,
    sessions_started: AtomicU64,
}

impl FrameCounters {
    pub fn record_notification(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_spurious_wakeup(&self) {
        self.spurious_wakeups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_presented(&self) {
        self.frames_presented.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_size_change(&self) {
        self.size_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recovery(&self, report: &RecoveryReport) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
        self.recovery_attempts
            .fetch_add(u64::from(report.attempts), Ordering::Relaxed);
        if report.device_recreated {
            self.device_recreations.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_recovery_failure(&self, attempts: u32) {
        self.recovery_failures.fetch_add(1, Ordering::Relaxed);
        self.recovery_attempts
            .fetch_add(u64::from(attempts), Ordering::Relaxed);
    }

    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current values.
    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            notifications: self.notifications.load(Ordering::Relaxed),
            spurious_wakeups: self.spurious_wakeups.load(Ordering::Relaxed),
            frames_presented: self.frames_presented.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            size_changes: self.size_changes.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            recovery_attempts: self.recovery_attempts.load(Ordering::Relaxed),
            device_recreations: self.device_recreations.load(Ordering::Relaxed),
            recovery_failures: self.recovery_failures.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
        }
    }
}
