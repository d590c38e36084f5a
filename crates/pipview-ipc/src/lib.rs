//! Typed host<->engine messages for pipview.
//!
//! This crate defines the message types exchanged between the overlay host
//! and the capture engine, plus the viewer configuration.

mod commands;
mod config;
mod events;
mod state;
mod types;

pub use commands::ViewerCommand;
pub use config::{CaptureConfig, ConfigError, RecoveryConfig, SurfaceConfig, ViewerConfig};
pub use events::ViewerEvent;
pub use state::{StopReason, ViewerState};
pub use types::{ContentSize, PipelineStats, ViewerMetrics, WarningType};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (host → engine).
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Channel capacity for events (engine → host).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<ViewerCommand>, Receiver<ViewerCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<ViewerEvent>, Receiver<ViewerEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
