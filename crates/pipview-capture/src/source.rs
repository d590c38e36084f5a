//! Capture sources and the host collaborators that produce them.

use pipview_ipc::ContentSize;

use crate::frame_pool::{SignalHandler, SubscriptionToken};
use crate::CaptureResult;

/// Handle to the window or region being captured.
pub trait CaptureItem: Send + 'static {
    /// Human readable name of the source.
    fn display_name(&self) -> String;

    /// Current content size.
    fn size(&self) -> CaptureResult<ContentSize>;

    /// Register a handler fired when the source disappears.
    fn on_closed(&self, handler: SignalHandler) -> CaptureResult<SubscriptionToken>;

    /// Remove a handler registered with [`on_closed`](Self::on_closed).
    fn remove_closed(&self, token: SubscriptionToken);
}

/// Lets the user choose a source.
pub trait SourcePicker: Send {
    /// Source type produced.
    type Item: CaptureItem;

    /// Returns `Ok(None)` when the user cancels.
    fn pick(&self) -> CaptureResult<Option<Self::Item>>;
}

/// Capability query for suppressing the capture border.
pub trait CaptureAccess: Send {
    /// Returns true when borderless capture is allowed.
    fn request_borderless(&self) -> CaptureResult<bool>;
}

/// Window-manager hook that puts the viewer into always-on-top overlay mode.
pub trait OverlayHost: Send {
    fn enter_overlay_mode(&self);
}
