//! Frame pool abstraction.

use pipview_ipc::ContentSize;

use crate::frame::{CaptureFrame, PixelFormat};
use crate::session::SessionControl;
use crate::CaptureResult;

/// Callback invoked when a frame pool or capture item raises a signal.
pub type SignalHandler = Box<dyn Fn() + Send + Sync + 'static>;

/// Identifies a registered signal handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(pub i64);

/// A bounded queue the capture source publishes finished frames into.
///
/// The pool keeps its identity across [`FramePool::recreate`], so handlers
/// registered with [`FramePool::on_frame_arrived`] stay attached. A pool built
/// with `CaptureBackend::create_frame_pool` starts without subscribers.
pub trait FramePool: Send + 'static {
    /// Device the pool allocates frames on.
    type Device;

    /// Source type sessions are created for.
    type Item;

    /// Frame type handed out by [`FramePool::try_get_next_frame`].
    type Frame: CaptureFrame;

    /// Session handle type created by this pool.
    type Session: SessionControl;

    /// Rebind the pool to a device and size in place.
    fn recreate(
        &self,
        device: &Self::Device,
        format: PixelFormat,
        capacity: u32,
        size: ContentSize,
    ) -> CaptureResult<()>;

    /// Take the next queued frame without blocking. `Ok(None)` when empty.
    fn try_get_next_frame(&self) -> CaptureResult<Option<Self::Frame>>;

    /// Register a handler fired each time a frame becomes available.
    fn on_frame_arrived(&self, handler: SignalHandler) -> CaptureResult<SubscriptionToken>;

    /// Create a capture session that feeds this pool from `item`.
    fn create_capture_session(&self, item: &Self::Item) -> CaptureResult<Self::Session>;

    /// Size the pool is currently configured for.
    fn size(&self) -> ContentSize;

    /// Release the pool. Further frames are not delivered.
    fn close(&self);
}
