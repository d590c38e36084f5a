//! Capture session handle.

use tracing::warn;
use windows::Graphics::Capture::GraphicsCaptureSession;

use crate::session::SessionControl;
use crate::CaptureResult;

/// `GraphicsCaptureSession` bound to one item and one frame pool.
pub struct WgcSession {
    session: GraphicsCaptureSession,
}

impl WgcSession {
    pub(crate) fn new(session: GraphicsCaptureSession) -> Self {
        Self { session }
    }
}

impl SessionControl for WgcSession {
    fn set_cursor_capture_enabled(&self, enabled: bool) -> CaptureResult<()> {
        self.session.SetIsCursorCaptureEnabled(enabled)?;
        Ok(())
    }

    fn set_border_required(&self, required: bool) -> CaptureResult<()> {
        self.session.SetIsBorderRequired(required)?;
        Ok(())
    }

    fn start_capture(&self) -> CaptureResult<()> {
        self.session.StartCapture()?;
        Ok(())
    }

    fn close(&self) {
        if let Err(e) = self.session.Close() {
            warn!("Failed to close capture session: {}", e);
        }
    }
}
