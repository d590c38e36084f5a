//! Direct3D 11 device management for capture and presentation.

use tracing::{debug, instrument};
use windows::core::Interface;
use windows::Graphics::DirectX::Direct3D11::IDirect3DDevice;
use windows::Win32::Graphics::Direct3D::D3D_DRIVER_TYPE_HARDWARE;
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Multithread,
    D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_SDK_VERSION,
};
use windows::Win32::Graphics::Dxgi::IDXGIDevice;
use windows::Win32::System::WinRT::Direct3D11::CreateDirect3D11DeviceFromDXGIDevice;

use crate::error::CaptureError;
use crate::CaptureResult;

/// Direct3D 11 device and immediate context.
#[derive(Clone)]
pub struct D3D11Device {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
}

impl D3D11Device {
    /// Create a hardware device with BGRA support.
    #[instrument(name = "d3d11_create_device")]
    pub fn new() -> CaptureResult<Self> {
        let mut device = None;
        let mut context = None;

        unsafe {
            D3D11CreateDevice(
                None,
                D3D_DRIVER_TYPE_HARDWARE,
                None,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                None,
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )
        }
        .map_err(|e| CaptureError::DeviceCreation(e.message().to_string()))?;

        let device = device
            .ok_or_else(|| CaptureError::DeviceCreation("no D3D11 device returned".to_string()))?;
        let context = context.ok_or_else(|| {
            CaptureError::DeviceCreation("no D3D11 device context returned".to_string())
        })?;

        // Frame handlers run on pool threads.
        if let Ok(multithread) = context.cast::<ID3D11Multithread>() {
            let _ = unsafe { multithread.SetMultithreadProtected(true) };
        }

        debug!("Created D3D11 device");
        Ok(Self { device, context })
    }

    /// Get the D3D11 device.
    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }

    /// Get the device context.
    pub fn context(&self) -> &ID3D11DeviceContext {
        &self.context
    }

    /// Get the DXGI device interface.
    pub fn dxgi_device(&self) -> CaptureResult<IDXGIDevice> {
        let dxgi: IDXGIDevice = self.device.cast()?;
        Ok(dxgi)
    }
}

/// D3D11 device plus its WinRT wrapper used by the capture APIs.
pub struct WgcDevice {
    d3d: D3D11Device,
    direct3d: IDirect3DDevice,
}

// SAFETY: the device is created with multithread protection, and the pipeline
// serializes all context use behind its state lock.
unsafe impl Send for WgcDevice {}

impl WgcDevice {
    pub fn new() -> CaptureResult<Self> {
        let d3d = D3D11Device::new()?;
        let dxgi_device = d3d.dxgi_device()?;
        let inspectable = unsafe { CreateDirect3D11DeviceFromDXGIDevice(&dxgi_device) }
            .map_err(|e| CaptureError::DeviceCreation(e.message().to_string()))?;
        let direct3d: IDirect3DDevice = inspectable.cast()?;

        Ok(Self { d3d, direct3d })
    }

    pub fn d3d(&self) -> &D3D11Device {
        &self.d3d
    }

    /// WinRT device handed to frame pools.
    pub fn direct3d(&self) -> &IDirect3DDevice {
        &self.direct3d
    }

    /// Report `DeviceLost` if the driver removed the device.
    pub fn check_removed(&self) -> CaptureResult<()> {
        unsafe { self.d3d.device.GetDeviceRemovedReason() }?;
        Ok(())
    }
}
