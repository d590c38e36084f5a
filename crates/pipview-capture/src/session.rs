//! Capture session state machine.

use tracing::{debug, info};

use crate::error::CaptureError;
use crate::CaptureResult;

/// Platform handle for a capture session bound to one source and one pool.
pub trait SessionControl: Send + 'static {
    /// Include the cursor in captured frames.
    fn set_cursor_capture_enabled(&self, enabled: bool) -> CaptureResult<()>;

    /// Draw the system capture border around the source.
    fn set_border_required(&self, required: bool) -> CaptureResult<()>;

    /// Begin hardware frame production.
    fn start_capture(&self) -> CaptureResult<()>;

    /// Release the session.
    fn close(&self);
}

/// Lifecycle of a [`CaptureSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session has been bound yet.
    #[default]
    Uninitialized,

    /// Bound to a source and pool, not capturing.
    Bound,

    /// Producing frames.
    Active,

    /// Stopped and released.
    Stopped,
}

impl SessionState {
    /// Returns a simple string representation of the state.
    pub fn name(self) -> &'static str {
        match self {
            Self::Uninitialized => "Uninitialized",
            Self::Bound => "Bound",
            Self::Active => "Active",
            Self::Stopped => "Stopped",
        }
    }
}

/// Options applied before capture starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Include the cursor in frames.
    pub cursor_visible: bool,

    /// Show the capture border around the source.
    pub border_visible: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            cursor_visible: true,
            border_visible: true,
        }
    }
}

/// Owns a session handle and enforces `Bound -> Active -> Stopped`.
pub struct CaptureSession<S: SessionControl> {
    handle: S,
    options: SessionOptions,
    state: SessionState,
}

impl<S: SessionControl> CaptureSession<S> {
    /// Bind a session handle. Options take effect when [`start`](Self::start) runs.
    pub fn bind(handle: S, options: SessionOptions) -> Self {
        Self {
            handle,
            options,
            state: SessionState::Bound,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Options the session was bound with.
    pub fn options(&self) -> SessionOptions {
        self.options
    }

    /// Apply the options and start capturing.
    pub fn start(&mut self) -> CaptureResult<()> {
        match self.state {
            SessionState::Active => return Err(CaptureError::AlreadyStarted),
            SessionState::Bound => {}
            other => {
                return Err(CaptureError::InvalidState {
                    expected: SessionState::Bound.name(),
                    actual: other.name(),
                })
            }
        }

        self.handle
            .set_cursor_capture_enabled(self.options.cursor_visible)?;
        // Border suppression is only requested when it was granted; leaving
        // the platform default keeps the border.
        if !self.options.border_visible {
            self.handle.set_border_required(false)?;
        }
        self.handle.start_capture()?;

        self.state = SessionState::Active;
        info!(
            cursor = self.options.cursor_visible,
            border = self.options.border_visible,
            "Capture session started"
        );
        Ok(())
    }

    /// Close the session. Safe in every state.
    pub fn stop(&mut self) {
        if self.state != SessionState::Stopped {
            self.handle.close();
            debug!(previous = self.state.name(), "Capture session closed");
            self.state = SessionState::Stopped;
        }
    }
}

impl<S: SessionControl> Drop for CaptureSession<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
