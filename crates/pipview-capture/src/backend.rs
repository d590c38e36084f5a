//! Platform backend the pipeline is generic over.

use pipview_ipc::ContentSize;

use crate::frame::{CaptureFrame, PixelFormat};
use crate::frame_pool::FramePool;
use crate::session::SessionControl;
use crate::source::CaptureItem;
use crate::surface::DrawingSurface;
use crate::CaptureResult;

/// Factory for the GPU and capture resources of one platform.
///
/// Every operation that touches the device reports loss as
/// `CaptureError::DeviceLost`.
pub trait CaptureBackend: Send + Sync + 'static {
    /// GPU device used for image operations.
    type Device: Send + 'static;

    /// Capture source handle.
    type Item: CaptureItem;

    /// Frame produced by the pool.
    type Frame: CaptureFrame;

    /// Session handle.
    type Session: SessionControl;

    /// Frame pool bound to a device.
    type Pool: FramePool<
        Device = Self::Device,
        Item = Self::Item,
        Frame = Self::Frame,
        Session = Self::Session,
    >;

    /// Drawable image built from a frame.
    type Image: Send + 'static;

    /// Surface the compositor displays.
    type Surface: DrawingSurface<Image = Self::Image>;

    /// Create a GPU device.
    fn create_device(&self) -> CaptureResult<Self::Device>;

    /// Create a frame pool with no subscribers.
    fn create_frame_pool(
        &self,
        device: &Self::Device,
        format: PixelFormat,
        capacity: u32,
        size: ContentSize,
    ) -> CaptureResult<Self::Pool>;

    /// Turn a frame's GPU surface into an image owned by `device`.
    fn create_image(&self, device: &Self::Device, frame: &Self::Frame)
        -> CaptureResult<Self::Image>;

    /// Create the drawing surface attached to the compositor.
    fn create_surface(&self, device: &Self::Device, size: ContentSize)
        -> CaptureResult<Self::Surface>;

    /// Rebind an existing surface to a newly created device.
    fn attach_surface(&self, surface: &mut Self::Surface, device: &Self::Device)
        -> CaptureResult<()>;
}
