//! Frame pool management for WGC capture.

use parking_lot::Mutex;
use pipview_ipc::ContentSize;
use tracing::{debug, trace, warn};
use windows::Foundation::TypedEventHandler;
use windows::Graphics::Capture::{Direct3D11CaptureFrame, Direct3D11CaptureFramePool};
use windows::Graphics::DirectX::Direct3D11::IDirect3DSurface;
use windows::Graphics::DirectX::DirectXPixelFormat;

use super::d3d11::WgcDevice;
use super::session::WgcSession;
use super::window::WgcItem;
use super::{to_size, to_size_int32};
use crate::frame::{CaptureFrame, PixelFormat};
use crate::frame_pool::{FramePool, SignalHandler, SubscriptionToken};
use crate::CaptureResult;

fn to_directx_format(format: PixelFormat) -> DirectXPixelFormat {
    match format {
        PixelFormat::Bgra8UNorm => DirectXPixelFormat::B8G8R8A8UIntNormalized,
    }
}

/// Free-threaded `Direct3D11CaptureFramePool`.
pub struct WgcFramePool {
    pool: Direct3D11CaptureFramePool,
    size: Mutex<ContentSize>,
    tokens: Mutex<Vec<i64>>,
}

impl WgcFramePool {
    pub fn new(
        device: &WgcDevice,
        format: PixelFormat,
        capacity: u32,
        size: ContentSize,
    ) -> CaptureResult<Self> {
        debug!(%size, capacity, "Creating frame pool");

        let pool = Direct3D11CaptureFramePool::CreateFreeThreaded(
            device.direct3d(),
            to_directx_format(format),
            capacity as i32,
            to_size_int32(size),
        )?;

        Ok(Self {
            pool,
            size: Mutex::new(size),
            tokens: Mutex::new(Vec::new()),
        })
    }
}

impl FramePool for WgcFramePool {
    type Device = WgcDevice;
    type Item = WgcItem;
    type Frame = WgcFrame;
    type Session = WgcSession;

    fn recreate(
        &self,
        device: &WgcDevice,
        format: PixelFormat,
        capacity: u32,
        size: ContentSize,
    ) -> CaptureResult<()> {
        self.pool.Recreate(
            device.direct3d(),
            to_directx_format(format),
            capacity as i32,
            to_size_int32(size),
        )?;
        *self.size.lock() = size;
        debug!(%size, "Frame pool recreated");
        Ok(())
    }

    fn try_get_next_frame(&self) -> CaptureResult<Option<WgcFrame>> {
        match self.pool.TryGetNextFrame() {
            Ok(frame) => {
                let size = match frame.ContentSize() {
                    Ok(size) => to_size(size),
                    Err(e) => {
                        let _ = frame.Close();
                        return Err(e.into());
                    }
                };
                Ok(Some(WgcFrame { frame, size }))
            }
            // A null frame comes back as an error carrying S_OK.
            Err(e) if e.code().is_ok() => {
                trace!("No frame queued");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn on_frame_arrived(&self, handler: SignalHandler) -> CaptureResult<SubscriptionToken> {
        let token = self.pool.FrameArrived(&TypedEventHandler::new(move |_, _| {
            handler();
            Ok(())
        }))?;
        self.tokens.lock().push(token);
        Ok(SubscriptionToken(token))
    }

    fn create_capture_session(&self, item: &WgcItem) -> CaptureResult<WgcSession> {
        let session = self.pool.CreateCaptureSession(item.item())?;
        Ok(WgcSession::new(session))
    }

    fn size(&self) -> ContentSize {
        *self.size.lock()
    }

    fn close(&self) {
        for token in self.tokens.lock().drain(..) {
            if let Err(e) = self.pool.RemoveFrameArrived(token) {
                debug!("Failed to remove frame handler: {}", e);
            }
        }
        if let Err(e) = self.pool.Close() {
            warn!("Failed to close frame pool: {}", e);
        }
    }
}

/// A frame taken from the pool. Returned to the pool on drop.
pub struct WgcFrame {
    frame: Direct3D11CaptureFrame,
    size: ContentSize,
}

impl WgcFrame {
    /// GPU surface holding the frame.
    pub fn surface(&self) -> CaptureResult<IDirect3DSurface> {
        Ok(self.frame.Surface()?)
    }
}

impl CaptureFrame for WgcFrame {
    fn content_size(&self) -> ContentSize {
        self.size
    }
}

impl Drop for WgcFrame {
    fn drop(&mut self) {
        let _ = self.frame.Close();
    }
}
