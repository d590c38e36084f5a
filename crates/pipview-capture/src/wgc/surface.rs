//! Swap chain surface presented through DirectComposition.

use pipview_ipc::ContentSize;
use tracing::{debug, instrument};
use windows::Foundation::Numerics::Matrix3x2;
use windows::Win32::Foundation::{HWND, RECT};
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Device, ID3D11DeviceContext, ID3D11RenderTargetView, ID3D11Texture2D, D3D11_BOX,
};
use windows::Win32::Graphics::DirectComposition::{
    DCompositionCreateDevice2, IDCompositionDesktopDevice, IDCompositionTarget,
    IDCompositionVisual2,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_ALPHA_MODE_PREMULTIPLIED, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_UNKNOWN,
    DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    IDXGIFactory2, IDXGISwapChain1, DXGI_PRESENT, DXGI_SCALING_STRETCH,
    DXGI_SWAP_CHAIN_DESC1, DXGI_SWAP_CHAIN_FLAG, DXGI_SWAP_EFFECT_FLIP_SEQUENTIAL,
    DXGI_USAGE_RENDER_TARGET_OUTPUT,
};

use windows::Win32::UI::WindowsAndMessaging::GetClientRect;

use super::d3d11::WgcDevice;
use crate::error::CaptureError;
use crate::surface::{Color, DrawingSurface, Placement};
use crate::CaptureResult;

const SWAP_CHAIN_BUFFERS: u32 = 2;

/// A frame copied into a texture owned by the pipeline's device.
pub struct WgcImage {
    texture: ID3D11Texture2D,
    size: ContentSize,
}

// SAFETY: the texture is only used on the device it was created on, under
// the pipeline's state lock.
unsafe impl Send for WgcImage {}

impl WgcImage {
    pub(crate) fn new(texture: ID3D11Texture2D, size: ContentSize) -> Self {
        Self { texture, size }
    }

    pub fn size(&self) -> ContentSize {
        self.size
    }
}

struct BackBuffer {
    texture: ID3D11Texture2D,
    target: ID3D11RenderTargetView,
}

/// Composition swap chain attached to the overlay window.
pub struct CompositionSurface {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    swap_chain: IDXGISwapChain1,
    composition: IDCompositionDesktopDevice,
    _target: IDCompositionTarget,
    visual: IDCompositionVisual2,
    size: ContentSize,
    viewport: ContentSize,
    back_buffer: Option<BackBuffer>,
}

// SAFETY: access is serialized by the mutex the pipeline keeps the surface in.
unsafe impl Send for CompositionSurface {}

fn create_swap_chain(device: &WgcDevice, size: ContentSize) -> CaptureResult<IDXGISwapChain1> {
    let (width, height) = size.to_u32();
    let desc = DXGI_SWAP_CHAIN_DESC1 {
        Width: width.max(1),
        Height: height.max(1),
        Format: DXGI_FORMAT_B8G8R8A8_UNORM,
        Stereo: false.into(),
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
        BufferCount: SWAP_CHAIN_BUFFERS,
        Scaling: DXGI_SCALING_STRETCH,
        SwapEffect: DXGI_SWAP_EFFECT_FLIP_SEQUENTIAL,
        AlphaMode: DXGI_ALPHA_MODE_PREMULTIPLIED,
        Flags: 0,
    };

    let dxgi_device = device.d3d().dxgi_device()?;
    let factory: IDXGIFactory2 = unsafe { dxgi_device.GetAdapter()?.GetParent()? };
    let swap_chain =
        unsafe { factory.CreateSwapChainForComposition(device.d3d().device(), &desc, None)? };
    Ok(swap_chain)
}

fn client_size(hwnd: HWND) -> Option<ContentSize> {
    let mut rect = RECT::default();
    unsafe { GetClientRect(hwnd, &mut rect) }.ok()?;
    Some(ContentSize::new(
        rect.right - rect.left,
        rect.bottom - rect.top,
    ))
}

impl CompositionSurface {
    /// Create the swap chain and show it in `hwnd`.
    #[instrument(name = "composition_surface_new", skip(device))]
    pub fn new(hwnd: isize, device: &WgcDevice, size: ContentSize) -> CaptureResult<Self> {
        let swap_chain = create_swap_chain(device, size)?;
        let dxgi_device = device.d3d().dxgi_device()?;

        let composition: IDCompositionDesktopDevice =
            unsafe { DCompositionCreateDevice2(&dxgi_device)? };
        let hwnd = HWND(hwnd as *mut _);
        let target = unsafe { composition.CreateTargetForHwnd(hwnd, true)? };
        let visual = unsafe { composition.CreateVisual()? };

        unsafe {
            visual.SetContent(&swap_chain)?;
            target.SetRoot(&visual)?;
        }

        let surface = Self {
            device: device.d3d().device().clone(),
            context: device.d3d().context().clone(),
            swap_chain,
            composition,
            _target: target,
            visual,
            size,
            viewport: client_size(hwnd).unwrap_or(size),
            back_buffer: None,
        };
        surface.apply_placement()?;

        debug!(viewport = %surface.viewport, "Composition surface attached");
        Ok(surface)
    }

    /// Scale the visual to fit the viewport, centered, and commit.
    fn apply_placement(&self) -> CaptureResult<()> {
        let placement = Placement::fit(self.size, self.viewport);
        let transform = Matrix3x2 {
            M11: placement.scale,
            M12: 0.0,
            M21: 0.0,
            M22: placement.scale,
            M31: placement.offset_x,
            M32: placement.offset_y,
        };

        unsafe {
            self.visual.SetTransform2(&transform)?;
            self.composition.Commit()?;
        }
        Ok(())
    }

    /// Rebuild the swap chain on a new device, keeping the visual.
    pub fn attach(&mut self, device: &WgcDevice) -> CaptureResult<()> {
        self.back_buffer = None;
        let swap_chain = create_swap_chain(device, self.size)?;

        unsafe { self.visual.SetContent(&swap_chain)? };

        self.swap_chain = swap_chain;
        self.device = device.d3d().device().clone();
        self.context = device.d3d().context().clone();
        self.apply_placement()?;
        debug!(size = %self.size, "Surface attached to new device");
        Ok(())
    }

    fn back_buffer(&self) -> CaptureResult<&BackBuffer> {
        self.back_buffer.as_ref().ok_or(CaptureError::InvalidState {
            expected: "drawing",
            actual: "idle",
        })
    }
}

impl DrawingSurface for CompositionSurface {
    type Image = WgcImage;

    fn size(&self) -> ContentSize {
        self.size
    }

    fn resize(&mut self, size: ContentSize) -> CaptureResult<()> {
        self.back_buffer = None;
        let (width, height) = size.to_u32();
        unsafe {
            self.swap_chain.ResizeBuffers(
                0,
                width.max(1),
                height.max(1),
                DXGI_FORMAT_UNKNOWN,
                DXGI_SWAP_CHAIN_FLAG(0),
            )?;
        }
        self.size = size;
        self.apply_placement()
    }

    fn set_viewport(&mut self, viewport: ContentSize) -> CaptureResult<()> {
        if viewport == self.viewport {
            return Ok(());
        }
        self.viewport = viewport;
        debug!(%viewport, size = %self.size, "Refitting surface to viewport");
        self.apply_placement()
    }

    fn begin_draw(&mut self) -> CaptureResult<()> {
        let texture: ID3D11Texture2D = unsafe { self.swap_chain.GetBuffer(0)? };
        let mut target = None;
        unsafe {
            self.device
                .CreateRenderTargetView(&texture, None, Some(&mut target))?;
        }
        let target = target.ok_or(CaptureError::DeviceLost)?;
        self.back_buffer = Some(BackBuffer { texture, target });
        Ok(())
    }

    fn clear(&mut self, color: Color) -> CaptureResult<()> {
        let back_buffer = self.back_buffer()?;
        unsafe {
            self.context
                .ClearRenderTargetView(&back_buffer.target, &color.to_array());
        }
        Ok(())
    }

    fn draw_image(&mut self, image: &WgcImage) -> CaptureResult<()> {
        let back_buffer = self.back_buffer()?;
        let (width, height) = image.size.to_u32();
        let (surface_width, surface_height) = self.size.to_u32();
        let region = D3D11_BOX {
            left: 0,
            top: 0,
            front: 0,
            right: width.min(surface_width),
            bottom: height.min(surface_height),
            back: 1,
        };

        unsafe {
            self.context.CopySubresourceRegion(
                &back_buffer.texture,
                0,
                0,
                0,
                0,
                &image.texture,
                0,
                Some(&region),
            );
        }
        Ok(())
    }

    fn end_draw(&mut self) -> CaptureResult<()> {
        if self.back_buffer.take().is_none() {
            return Ok(());
        }
        unsafe { self.swap_chain.Present(1, DXGI_PRESENT(0)) }.ok()?;
        Ok(())
    }
}
