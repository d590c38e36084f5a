//! Main engine orchestrator.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{select, tick, Receiver, Sender};
use parking_lot::RwLock;
use tracing::{debug, error, info, instrument, warn};

use pipview_capture::{
    CaptureAccess, CaptureBackend, OverlayHost, Pipeline, PipelineEvent,
    SourcePicker, StartOutcome,
};
use pipview_ipc::{StopReason, ViewerCommand, ViewerEvent, ViewerState};

use crate::metrics::MetricsCollector;

/// Host-side collaborators used by the interactive start flow.
pub struct Collaborators<B: CaptureBackend> {
    pub picker: Box<dyn SourcePicker<Item = B::Item>>,
    pub access: Box<dyn CaptureAccess>,
    pub host: Box<dyn OverlayHost>,
}

/// Drives a capture pipeline from host commands.
pub struct Engine<B: CaptureBackend> {
    command_rx: Receiver<ViewerCommand>,
    event_tx: Sender<ViewerEvent>,
    state: Arc<RwLock<ViewerState>>,
    pipeline: Pipeline<B>,
    pipeline_events: Receiver<PipelineEvent>,
    collaborators: Collaborators<B>,
    metrics: MetricsCollector,
    metrics_interval: Duration,
}

impl<B: CaptureBackend> Engine<B> {
    /// Create a new engine.
    pub fn new(
        pipeline: Pipeline<B>,
        collaborators: Collaborators<B>,
        command_rx: Receiver<ViewerCommand>,
        event_tx: Sender<ViewerEvent>,
        metrics_interval: Duration,
    ) -> Self {
        let pipeline_events = pipeline.events();
        Self {
            command_rx,
            event_tx,
            state: Arc::new(RwLock::new(ViewerState::Idle)),
            pipeline,
            pipeline_events,
            collaborators,
            metrics: MetricsCollector::default(),
            metrics_interval,
        }
    }

    /// Shared view of the engine state.
    pub fn state(&self) -> Arc<RwLock<ViewerState>> {
        Arc::clone(&self.state)
    }

    /// The pipeline the engine drives.
    pub fn pipeline(&self) -> &Pipeline<B> {
        &self.pipeline
    }

    /// Run the engine (blocking) until `Shutdown` or the command channel closes.
    #[instrument(name = "engine_run", skip(self))]
    pub fn run(&mut self) {
        info!("Engine starting");
        self.send_event(ViewerEvent::Ready);

        let metrics_tick = tick(self.metrics_interval);
        let commands = self.command_rx.clone();
        let pipeline_events = self.pipeline_events.clone();

        loop {
            select! {
                recv(commands) -> command => match command {
                    Ok(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    Err(_) => {
                        info!("Command channel disconnected, shutting down");
                        self.stop_capture();
                        break;
                    }
                },
                recv(pipeline_events) -> event => {
                    if let Ok(event) = event {
                        self.handle_pipeline_event(event);
                    }
                },
                recv(metrics_tick) -> _ => {
                    if self.state.read().is_capturing() {
                        self.emit_metrics();
                    }
                },
            }
        }

        info!("Engine stopped");
    }

    /// Handle a command. Returns false if engine should stop.
    pub fn handle_command(&mut self, command: ViewerCommand) -> bool {
        debug!(?command, "Handling command");

        match command {
            ViewerCommand::StartCapture => self.start_capture(),
            ViewerCommand::StopCapture => self.stop_capture(),
            ViewerCommand::GetState => self.send_state(),
            ViewerCommand::GetMetrics => self.emit_metrics(),
            ViewerCommand::Shutdown => {
                self.stop_capture();
                self.send_event(ViewerEvent::Shutdown);
                return false;
            }
        }

        true
    }

    /// Process every pipeline event that is already queued.
    pub fn drain_pipeline_events(&mut self) {
        while let Ok(event) = self.pipeline_events.try_recv() {
            self.handle_pipeline_event(event);
        }
    }

    #[instrument(name = "start_capture", skip(self))]
    fn start_capture(&mut self) {
        if self.state.read().is_starting() {
            debug!("Already starting, ignoring start command");
            return;
        }

        info!("Starting capture");
        self.transition_to(ViewerState::Starting);

        let outcome = self.pipeline.start_capture_async(
            self.collaborators.picker.as_ref(),
            self.collaborators.access.as_ref(),
            self.collaborators.host.as_ref(),
        );

        match outcome {
            StartOutcome::Started(source) => {
                self.metrics.start(self.pipeline.stats());
                let size = self.pipeline.last_known_size().unwrap_or_default();
                self.transition_to(ViewerState::Capturing { source, size });
                info!("Capture started successfully");
            }
            StartOutcome::Cancelled => {
                // Any previous capture is still running.
                self.transition_to(self.current_capture_state());
            }
            StartOutcome::Failed(e) => {
                error!("Capture start failed: {}", e);
                let recoverable = e.is_recoverable();
                self.send_event(ViewerEvent::Error {
                    recoverable,
                    message: e.to_string(),
                });
                self.transition_to(ViewerState::Error {
                    message: e.to_string(),
                    recoverable,
                });
            }
        }
    }

    #[instrument(name = "stop_capture", skip(self))]
    fn stop_capture(&mut self) {
        self.pipeline.stop_capture();
        self.metrics.stop();

        if !self.state.read().is_idle() {
            self.transition_to(ViewerState::Idle);
        }
    }

    fn handle_pipeline_event(&mut self, event: PipelineEvent) {
        debug!(?event, "Pipeline event");

        match event {
            PipelineEvent::Started { .. } => {}
            PipelineEvent::Resized { size } => {
                if let ViewerState::Capturing { size: current, .. } = &mut *self.state.write() {
                    *current = size;
                }
                self.send_event(ViewerEvent::SourceResized { size });
            }
            PipelineEvent::Recovered {
                attempts,
                device_recreated,
            } => {
                info!(attempts, device_recreated, "Device recovered");
                self.send_event(ViewerEvent::DeviceRecovered {
                    attempts,
                    device_recreated,
                });
            }
            PipelineEvent::Stopped { reason } => self.on_capture_stopped(reason),
        }
    }

    fn on_capture_stopped(&mut self, reason: StopReason) {
        if reason == StopReason::Superseded || self.pipeline.source_name().is_some() {
            // A newer capture is running.
            return;
        }

        self.metrics.stop();
        match reason {
            StopReason::RecoveryFailed { .. } => {
                let message = reason.message();
                warn!("Capture ended: {}", message);
                self.send_event(ViewerEvent::Error {
                    recoverable: true,
                    message: message.clone(),
                });
                self.transition_to(ViewerState::Error {
                    message,
                    recoverable: true,
                });
            }
            _ => {
                if self.state.read().is_capturing() {
                    info!("Capture ended: {}", reason.message());
                    self.transition_to(ViewerState::Idle);
                }
            }
        }
    }

    fn current_capture_state(&self) -> ViewerState {
        match (self.pipeline.source_name(), self.pipeline.last_known_size()) {
            (Some(source), Some(size)) => ViewerState::Capturing { source, size },
            _ => ViewerState::Idle,
        }
    }

    fn send_state(&self) {
        let state = self.state.read().clone();
        self.send_event(ViewerEvent::StateChanged {
            previous: Box::new(state.clone()),
            current: Box::new(state),
        });
    }

    fn emit_metrics(&self) {
        let stats = self.pipeline.stats();
        self.send_event(ViewerEvent::Metrics(self.metrics.snapshot(stats)));

        for warning in self.metrics.check_warnings(stats) {
            self.send_event(ViewerEvent::PerformanceWarning(warning));
        }

        self.metrics.mark_reported(stats);
    }

    fn transition_to(&self, new_state: ViewerState) {
        let previous = {
            let mut state = self.state.write();
            let prev = state.clone();
            *state = new_state.clone();
            prev
        };

        debug!(
            previous = %previous.name(),
            current = %new_state.name(),
            "State transition"
        );

        self.send_event(ViewerEvent::StateChanged {
            previous: Box::new(previous),
            current: Box::new(new_state),
        });
    }

    fn send_event(&self, event: ViewerEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}
