//! Common types used across messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Width and height of captured content in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentSize {
    /// Width in pixels.
    pub width: i32,

    /// Height in pixels.
    pub height: i32,
}

impl ContentSize {
    /// Create a new content size.
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Returns true if either dimension is zero or negative.
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Dimensions as unsigned values, clamping negatives to zero.
    pub fn to_u32(self) -> (u32, u32) {
        (self.width.max(0) as u32, self.height.max(0) as u32)
    }
}

impl fmt::Display for ContentSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Counters reported by the capture pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Frame-arrived notifications handled.
    pub notifications: u64,

    /// Notifications that found no queued frame.
    pub spurious_wakeups: u64,

    /// Frames painted onto the drawing surface.
    pub frames_presented: u64,

    /// Frames discarded because conversion or painting failed.
    pub frames_dropped: u64,

    /// Content size changes that forced a frame pool rebuild.
    pub size_changes: u64,

    /// Completed recovery loops.
    pub recoveries: u64,

    /// Individual recovery attempts, including failed ones.
    pub recovery_attempts: u64,

    /// Devices created after the first one.
    pub device_recreations: u64,

    /// Recovery loops that gave up.
    pub recovery_failures: u64,

    /// Capture sessions started.
    pub sessions_started: u64,
}

/// Viewer metrics derived from pipeline counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewerMetrics {
    /// Frames presented per second since the last report.
    pub fps: f32,

    /// Seconds since the current capture started.
    pub uptime_seconds: u64,

    /// Raw pipeline counters.
    pub stats: PipelineStats,
}

/// Types of performance warnings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WarningType {
    /// The device was lost repeatedly within one reporting interval.
    DeviceLossBurst { count: u64 },

    /// Frames were dropped within one reporting interval.
    FrameDrops { count: u64 },

    /// A recovery loop gave up.
    RecoveryFailed { count: u64 },
}
