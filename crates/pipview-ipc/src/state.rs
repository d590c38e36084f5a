//! Engine state machine types.

use serde::{Deserialize, Serialize};

use crate::types::ContentSize;

/// The current state of the viewer engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum ViewerState {
    /// Nothing is being captured.
    #[default]
    Idle,

    /// Requesting access, picking a source and binding the session.
    Starting,

    /// Frames from a source are being presented.
    Capturing {
        /// Display name of the captured source.
        source: String,

        /// Content size of the source.
        size: ContentSize,
    },

    /// The last capture ended in an error.
    Error {
        /// Error message.
        message: String,

        /// Whether starting again may succeed.
        recoverable: bool,
    },
}

impl ViewerState {
    /// Returns true if the engine is in the Idle state.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true if the engine is starting.
    pub fn is_starting(&self) -> bool {
        matches!(self, Self::Starting)
    }

    /// Returns true if a source is being captured.
    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing { .. })
    }

    /// Returns true if the engine is in an error state.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Starting => "Starting",
            Self::Capturing { .. } => "Capturing",
            Self::Error { .. } => "Error",
        }
    }
}

/// Reason a capture stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Host requested stop.
    UserRequested,

    /// The captured source went away (e.g. its window was closed).
    SourceClosed,

    /// A new capture replaced this one.
    Superseded,

    /// No usable device could be obtained.
    RecoveryFailed { message: String },

    /// The engine is shutting down.
    Shutdown,
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::UserRequested => "Capture stopped by user".to_string(),
            Self::SourceClosed => "Captured window was closed".to_string(),
            Self::Superseded => "Capture replaced by a new source".to_string(),
            Self::RecoveryFailed { message } => format!("Device recovery failed: {message}"),
            Self::Shutdown => "Viewer shutting down".to_string(),
        }
    }

    /// Returns true if the stop is part of normal operation.
    pub fn is_normal(&self) -> bool {
        !matches!(self, Self::RecoveryFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(ViewerState::Idle.name(), "Idle");
        assert_eq!(ViewerState::Starting.name(), "Starting");
        let capturing = ViewerState::Capturing {
            source: "Game".to_string(),
            size: ContentSize::new(800, 600),
        };
        assert!(capturing.is_capturing());
        assert_eq!(capturing.name(), "Capturing");
    }

    #[test]
    fn test_stop_reason_classification() {
        assert!(StopReason::SourceClosed.is_normal());
        assert!(StopReason::Superseded.is_normal());
        let failed = StopReason::RecoveryFailed {
            message: "no adapter".to_string(),
        };
        assert!(!failed.is_normal());
        assert_eq!(failed.message(), "Device recovery failed: no adapter");
    }
}
