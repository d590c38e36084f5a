//! Commands sent from the host to the engine.

use serde::{Deserialize, Serialize};

/// Commands that the host can send to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewerCommand {
    /// Ask for borderless access, run the source picker and start capturing
    /// the chosen source. An active capture is replaced.
    StartCapture,

    /// Stop the current capture. Safe to send when nothing is running.
    StopCapture,

    /// Request current engine state.
    GetState,

    /// Request a metrics snapshot.
    GetMetrics,

    /// Shutdown the engine completely.
    Shutdown,
}
