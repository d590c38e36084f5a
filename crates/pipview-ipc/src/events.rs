//! Events sent from the engine to the host.

use serde::{Deserialize, Serialize};

use crate::state::ViewerState;
use crate::types::{ContentSize, ViewerMetrics, WarningType};

/// Events that the engine can send to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ViewerEvent {
    /// Engine state has changed.
    StateChanged {
        /// Previous state.
        previous: Box<ViewerState>,

        /// Current state.
        current: Box<ViewerState>,
    },

    /// The captured source changed size and the frame pool was rebuilt.
    SourceResized {
        /// New content size.
        size: ContentSize,
    },

    /// The GPU device or frame pool was rebuilt after a failure.
    DeviceRecovered {
        /// Attempts the recovery loop needed.
        attempts: u32,

        /// Whether a new device was created.
        device_recreated: bool,
    },

    /// Updated viewer metrics.
    Metrics(ViewerMetrics),

    /// Performance warning detected.
    PerformanceWarning(WarningType),

    /// Error occurred.
    Error {
        /// Whether the error is recoverable.
        recoverable: bool,

        /// Error message.
        message: String,
    },

    /// Engine is ready.
    Ready,

    /// Engine has shut down.
    Shutdown,
}
