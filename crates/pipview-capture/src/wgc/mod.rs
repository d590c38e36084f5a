//! Windows Graphics Capture backend.
//!
//! Frames come from a free-threaded `Direct3D11CaptureFramePool`, so
//! frame-arrived handlers run on the system thread pool. The drawing surface
//! is a DXGI swap chain shown through DirectComposition on the overlay window.

mod access;
mod d3d11;
mod frame_pool;
mod overlay;
mod session;
mod surface;
mod window;

pub use access::BorderlessAccess;
pub use d3d11::{D3D11Device, WgcDevice};
pub use frame_pool::{WgcFrame, WgcFramePool};
pub use overlay::{OverlayHandle, OverlayWindow, ResizeHook};
pub use session::WgcSession;
pub use surface::{CompositionSurface, WgcImage};
pub use window::{enumerate_windows, SystemPicker, WgcItem, WindowInfo, WindowPicker};

use pipview_ipc::ContentSize;
use tracing::debug;
use windows::core::{Interface, HRESULT};
use windows::Graphics::Capture::GraphicsCaptureSession;
use windows::Graphics::SizeInt32;
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Texture2D, D3D11_BIND_SHADER_RESOURCE, D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT,
};
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_DEVICE_HUNG, DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_DEVICE_RESET,
    DXGI_ERROR_DRIVER_INTERNAL_ERROR,
};
use windows::Win32::System::WinRT::Direct3D11::IDirect3DDxgiInterfaceAccess;
use windows::Win32::System::WinRT::{RoInitialize, RO_INIT_MULTITHREADED};

use crate::backend::CaptureBackend;
use crate::error::CaptureError;
use crate::frame::{CaptureFrame, PixelFormat};
use crate::CaptureResult;

/// Returns true for HRESULTs that mean the device must be recreated.
pub fn is_device_lost_code(code: HRESULT) -> bool {
    code == DXGI_ERROR_DEVICE_REMOVED
        || code == DXGI_ERROR_DEVICE_RESET
        || code == DXGI_ERROR_DEVICE_HUNG
        || code == DXGI_ERROR_DRIVER_INTERNAL_ERROR
}

/// Initialize the Windows Runtime for the calling thread.
pub fn init_apartment() -> CaptureResult<()> {
    unsafe { RoInitialize(RO_INIT_MULTITHREADED)? };
    Ok(())
}

pub(crate) fn to_size(size: SizeInt32) -> ContentSize {
    ContentSize::new(size.Width, size.Height)
}

pub(crate) fn to_size_int32(size: ContentSize) -> SizeInt32 {
    SizeInt32 {
        Width: size.width.max(1),
        Height: size.height.max(1),
    }
}

/// Capture backend bound to one overlay window.
pub struct WgcBackend {
    hwnd: isize,
}

impl WgcBackend {
    /// Create a backend that presents into `hwnd`.
    pub fn new(hwnd: isize) -> CaptureResult<Self> {
        if !GraphicsCaptureSession::IsSupported()? {
            return Err(CaptureError::NotSupported);
        }
        Ok(Self { hwnd })
    }

    /// Overlay window handle.
    pub fn hwnd(&self) -> isize {
        self.hwnd
    }
}

impl CaptureBackend for WgcBackend {
    type Device = WgcDevice;
    type Item = WgcItem;
    type Frame = WgcFrame;
    type Session = WgcSession;
    type Pool = WgcFramePool;
    type Image = WgcImage;
    type Surface = CompositionSurface;

    fn create_device(&self) -> CaptureResult<WgcDevice> {
        WgcDevice::new()
    }

    fn create_frame_pool(
        &self,
        device: &WgcDevice,
        format: PixelFormat,
        capacity: u32,
        size: ContentSize,
    ) -> CaptureResult<WgcFramePool> {
        WgcFramePool::new(device, format, capacity, size)
    }

    fn create_image(&self, device: &WgcDevice, frame: &WgcFrame) -> CaptureResult<WgcImage> {
        let surface = frame.surface()?;
        let access: IDirect3DDxgiInterfaceAccess = surface.cast()?;
        let source: ID3D11Texture2D = unsafe { access.GetInterface()? };

        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { source.GetDesc(&mut desc) };
        desc.Usage = D3D11_USAGE_DEFAULT;
        desc.BindFlags = D3D11_BIND_SHADER_RESOURCE.0 as u32;
        desc.CPUAccessFlags = 0;
        desc.MiscFlags = 0;

        let mut texture = None;
        unsafe {
            device
                .d3d()
                .device()
                .CreateTexture2D(&desc, None, Some(&mut texture))?;
        }
        let texture = texture.ok_or_else(|| {
            CaptureError::FrameConversion("texture creation returned nothing".to_string())
        })?;

        unsafe { device.d3d().context().CopyResource(&texture, &source) };
        device.check_removed()?;

        Ok(WgcImage::new(texture, frame.content_size()))
    }

    fn create_surface(
        &self,
        device: &WgcDevice,
        size: ContentSize,
    ) -> CaptureResult<CompositionSurface> {
        debug!(hwnd = self.hwnd, %size, "Creating composition surface");
        CompositionSurface::new(self.hwnd, device, size)
    }

    fn attach_surface(
        &self,
        surface: &mut CompositionSurface,
        device: &WgcDevice,
    ) -> CaptureResult<()> {
        surface.attach(device)
    }
}
