//! Error types for the capture pipeline.

use thiserror::Error;

/// Errors that can occur during capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Windows API error.
    #[error("Windows API error: {message}")]
    WindowsApi {
        message: String,
        #[cfg(windows)]
        #[source]
        source: Option<windows::core::Error>,
    },

    /// The picker was closed without choosing a source.
    #[error("Source selection cancelled")]
    SourceSelectionCancelled,

    /// Capture source not found.
    #[error("Capture source not found: {0}")]
    SourceNotFound(String),

    /// The captured source went away.
    #[error("Capture source closed")]
    SourceClosed,

    /// Capture already started.
    #[error("Capture already started")]
    AlreadyStarted,

    /// Operation not allowed in the current session state.
    #[error("Invalid session state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    /// A frame could not be turned into a drawable image.
    #[error("Frame conversion error: {0}")]
    FrameConversion(String),

    /// The GPU device became unusable.
    #[error("Capture device lost")]
    DeviceLost,

    /// No GPU device could be created.
    #[error("Device creation failed: {0}")]
    DeviceCreation(String),

    /// The recovery loop gave up.
    #[error("Device recovery failed after {attempts} attempts: {last_error}")]
    RecoveryExhausted { attempts: u32, last_error: String },

    /// The operation was abandoned because capture is stopping.
    #[error("Capture cancelled")]
    Cancelled,

    /// Graphics capture not supported on this system.
    #[error("Windows Graphics Capture not supported")]
    NotSupported,

    /// Permission denied for capture.
    #[error("Permission denied for capture")]
    PermissionDenied,
}

impl CaptureError {
    /// Returns true if the error means the GPU device must be recreated.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost)
    }

    /// Returns true if retrying the operation later may succeed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::NotSupported | Self::PermissionDenied)
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for CaptureError {
    fn from(err: windows::core::Error) -> Self {
        if crate::wgc::is_device_lost_code(err.code()) {
            return Self::DeviceLost;
        }
        Self::WindowsApi {
            message: err.message().to_string(),
            source: Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_lost_classification() {
        assert!(CaptureError::DeviceLost.is_device_lost());
        assert!(!CaptureError::DeviceCreation("no adapter".into()).is_device_lost());
    }

    #[test]
    fn test_recoverable() {
        assert!(CaptureError::DeviceLost.is_recoverable());
        assert!(CaptureError::SourceClosed.is_recoverable());
        assert!(!CaptureError::NotSupported.is_recoverable());
        assert!(!CaptureError::PermissionDenied.is_recoverable());
    }

    #[test]
    fn test_recovery_message() {
        let err = CaptureError::RecoveryExhausted {
            attempts: 3,
            last_error: "Capture device lost".into(),
        };
        assert_eq!(
            err.to_string(),
            "Device recovery failed after 3 attempts: Capture device lost"
        );
    }
}
