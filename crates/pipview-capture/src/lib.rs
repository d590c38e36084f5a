//! Capture and recovery pipeline for the pipview overlay.
//!
//! Frames from a captured window are painted onto a compositor surface as
//! they arrive. Content resizes rebuild the frame pool, and a lost GPU device
//! is replaced without stopping the capture. Platform resources sit behind
//! [`CaptureBackend`]; the Windows Graphics Capture implementation lives in
//! `wgc`.

mod backend;
mod device;
mod error;
mod frame;
mod frame_pool;
mod pipeline;
mod processor;
mod recovery;
mod session;
mod source;
mod stats;
mod surface;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

#[cfg(windows)]
pub mod wgc;

pub use backend::CaptureBackend;
pub use device::DeviceContext;
pub use error::CaptureError;
pub use frame::{CaptureFrame, PixelFormat, FRAME_POOL_CAPACITY};
pub use frame_pool::{FramePool, SignalHandler, SubscriptionToken};
pub use pipeline::{
    Pipeline, PipelineConfig, PipelineEvent, StartOutcome, PIPELINE_EVENT_CAPACITY,
};
pub use processor::{FrameContext, FrameOutcome, FrameProcessor};
pub use recovery::{recover, RecoveryPolicy, RecoveryReport, MAX_RECOVERY_ATTEMPTS};
pub use session::{CaptureSession, SessionControl, SessionOptions, SessionState};
pub use source::{CaptureAccess, CaptureItem, OverlayHost, SourcePicker};
pub use stats::FrameCounters;
pub use surface::{Color, DrawSession, DrawingSurface, Placement};

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;
