//! Captured frame types.

use pipview_ipc::ContentSize;

/// Number of frames buffered by a frame pool.
pub const FRAME_POOL_CAPACITY: u32 = 2;

/// Pixel formats a frame pool can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// 8-bit BGRA, normalized unsigned integers.
    #[default]
    Bgra8UNorm,
}

/// A single captured frame, released when dropped.
pub trait CaptureFrame: Send {
    /// Size of the captured content when this frame was produced.
    fn content_size(&self) -> ContentSize;
}
