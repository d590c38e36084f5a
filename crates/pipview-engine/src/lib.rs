//! Core orchestrator for the pipview overlay.
//!
//! This crate drives one capture pipeline from host commands, turns
//! pipeline events into viewer events, and reports metrics.

mod metrics;
mod orchestrator;

pub use metrics::{MetricsCollector, DEVICE_LOSS_BURST_THRESHOLD};
pub use orchestrator::{Collaborators, Engine};

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use pipview_capture::{CaptureBackend, CaptureResult, Pipeline, PipelineConfig};
use pipview_ipc::{ViewerCommand, ViewerConfig, ViewerEvent};

/// Create an engine over `backend` configured from `config`.
pub fn create_engine<B: CaptureBackend>(
    backend: B,
    config: &ViewerConfig,
    collaborators: Collaborators<B>,
    command_rx: Receiver<ViewerCommand>,
    event_tx: Sender<ViewerEvent>,
) -> CaptureResult<Engine<B>> {
    let pipeline = Pipeline::new(backend, PipelineConfig::from(config))?;
    Ok(Engine::new(
        pipeline,
        collaborators,
        command_rx,
        event_tx,
        Duration::from_millis(config.metrics_interval_ms.max(1)),
    ))
}
