//! Capture pipeline: owns the device, pool, session and drawing surface.
//!
//! Frame handling runs on whatever thread the platform delivers
//! frame-arrived notifications on. All mutable pipeline state sits behind one
//! lock, so notifications are handled one at a time and a stop never tears
//! down resources while a frame is being processed.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use pipview_ipc::{ContentSize, PipelineStats, StopReason, ViewerConfig};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::backend::CaptureBackend;
use crate::device::DeviceContext;
use crate::error::CaptureError;
use crate::frame::{PixelFormat, FRAME_POOL_CAPACITY};
use crate::frame_pool::{FramePool, SubscriptionToken};
use crate::processor::{FrameContext, FrameOutcome, FrameProcessor};
use crate::recovery::RecoveryPolicy;
use crate::session::{CaptureSession, SessionOptions, SessionState};
use crate::source::{CaptureAccess, CaptureItem, OverlayHost, SourcePicker};
use crate::stats::FrameCounters;
use crate::CaptureResult;

/// Capacity of the pipeline event channel.
pub const PIPELINE_EVENT_CAPACITY: usize = 64;

thread_local! {
    static DISPATCHING: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running a frame handler.
struct DispatchGuard {
    previous: bool,
}

impl DispatchGuard {
    fn enter() -> Self {
        Self {
            previous: DISPATCHING.with(|d| d.replace(true)),
        }
    }

    fn active() -> bool {
        DISPATCHING.with(Cell::get)
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCHING.with(|d| d.set(self.previous));
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Include the cursor in captured frames.
    pub cursor_visible: bool,

    /// Ask for borderless capture.
    pub hide_border: bool,

    /// Put the host into overlay mode once a source is picked.
    pub enter_overlay: bool,

    /// Frame pool pixel format.
    pub pixel_format: PixelFormat,

    /// Size of the drawing surface before the first frame.
    pub initial_surface_size: ContentSize,

    /// Retry policy for device recovery.
    pub recovery: RecoveryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&ViewerConfig::default())
    }
}

impl From<&ViewerConfig> for PipelineConfig {
    fn from(config: &ViewerConfig) -> Self {
        Self {
            cursor_visible: config.capture.cursor_visible,
            hide_border: config.capture.hide_border,
            enter_overlay: config.capture.enter_overlay,
            pixel_format: PixelFormat::Bgra8UNorm,
            initial_surface_size: ContentSize::new(
                config.surface.initial_width,
                config.surface.initial_height,
            ),
            recovery: RecoveryPolicy::from(&config.recovery),
        }
    }
}

/// Events published by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A capture session started.
    Started { source: String, size: ContentSize },

    /// The source changed size and the pool was rebuilt.
    Resized { size: ContentSize },

    /// The frame pool was rebuilt after device loss.
    Recovered { attempts: u32, device_recreated: bool },

    /// The capture ended.
    Stopped { reason: StopReason },
}

/// Result of the interactive start flow.
#[derive(Debug)]
pub enum StartOutcome {
    /// Capture is running for the named source.
    Started(String),

    /// The user dismissed the picker.
    Cancelled,

    /// Capture could not be started.
    Failed(CaptureError),
}

impl StartOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }
}

struct ActiveCapture<B: CaptureBackend> {
    generation: u64,
    source_name: String,
    item: B::Item,
    pool: B::Pool,
    session: CaptureSession<B::Session>,
    closed_token: Option<SubscriptionToken>,
}

struct Inner<B: CaptureBackend> {
    devices: DeviceContext<B>,
    processor: FrameProcessor<B>,
    active: Option<ActiveCapture<B>>,
    state: SessionState,
    next_generation: u64,
}

struct StopRequest {
    reason: StopReason,
    generation: Option<u64>,
}

struct Shared<B: CaptureBackend> {
    backend: B,
    config: PipelineConfig,
    inner: Mutex<Inner<B>>,
    surface: Arc<Mutex<B::Surface>>,
    counters: FrameCounters,
    cancel: AtomicBool,
    active_generation: AtomicU64,
    pending_stop: Mutex<Option<StopRequest>>,
    events: Sender<PipelineEvent>,
}

/// Live capture pipeline.
///
/// Dropping the pipeline stops any active capture.
pub struct Pipeline<B: CaptureBackend> {
    shared: Arc<Shared<B>>,
    events: Receiver<PipelineEvent>,
}

impl<B: CaptureBackend> Pipeline<B> {
    /// Create the device and drawing surface. No capture is started.
    #[instrument(name = "pipeline_new", skip_all)]
    pub fn new(backend: B, config: PipelineConfig) -> CaptureResult<Self> {
        let devices = DeviceContext::create(&backend)?;
        let surface = backend.create_surface(devices.device()?, config.initial_surface_size)?;
        let processor = FrameProcessor::new(config.pixel_format, config.recovery.clone());
        let (events_tx, events_rx) = crossbeam_channel::bounded(PIPELINE_EVENT_CAPACITY);

        info!(
            surface = %config.initial_surface_size,
            max_recovery_attempts = ?config.recovery.max_attempts,
            "Pipeline created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                backend,
                config,
                inner: Mutex::new(Inner {
                    devices,
                    processor,
                    active: None,
                    state: SessionState::Uninitialized,
                    next_generation: 1,
                }),
                surface: Arc::new(Mutex::new(surface)),
                counters: FrameCounters::default(),
                cancel: AtomicBool::new(false),
                active_generation: AtomicU64::new(0),
                pending_stop: Mutex::new(None),
                events: events_tx,
            }),
            events: events_rx,
        })
    }

    /// Receiver for pipeline events.
    pub fn events(&self) -> Receiver<PipelineEvent> {
        self.events.clone()
    }

    /// Interactive start: request borderless access, let the user pick a
    /// source, enter overlay mode, then start capturing.
    #[instrument(name = "pipeline_start_interactive", skip_all)]
    pub fn start_capture_async(
        &self,
        picker: &dyn SourcePicker<Item = B::Item>,
        access: &dyn CaptureAccess,
        host: &dyn OverlayHost,
    ) -> StartOutcome {
        let allow_borderless = self.shared.config.hide_border && {
            match access.request_borderless() {
                Ok(allowed) => {
                    debug!(allowed, "Borderless capture access");
                    allowed
                }
                Err(e) => {
                    warn!("Borderless access request failed: {}", e);
                    false
                }
            }
        };

        let item = match picker.pick() {
            Ok(Some(item)) => item,
            Ok(None) | Err(CaptureError::SourceSelectionCancelled) => {
                info!("Source selection cancelled");
                return StartOutcome::Cancelled;
            }
            Err(e) => {
                warn!("Source picker failed: {}", e);
                return StartOutcome::Failed(e);
            }
        };

        if self.shared.config.enter_overlay {
            host.enter_overlay_mode();
        }

        let source = item.display_name();
        match self.start_capture(item, allow_borderless) {
            Ok(()) => StartOutcome::Started(source),
            Err(e) => {
                error!("Failed to start capture: {}", e);
                StartOutcome::Failed(e)
            }
        }
    }

    /// Start capturing `item`, replacing any active capture.
    #[instrument(name = "pipeline_start", skip_all, fields(source = %item.display_name()))]
    pub fn start_capture(&self, item: B::Item, allow_borderless: bool) -> CaptureResult<()> {
        if DispatchGuard::active() {
            return Err(CaptureError::InvalidState {
                expected: "outside frame handler",
                actual: "inside frame handler",
            });
        }

        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        shared.teardown(&mut inner, StopReason::Superseded);
        shared.cancel.store(false, Ordering::SeqCst);
        *shared.pending_stop.lock() = None;

        let size = item.size()?;
        if !inner.devices.is_valid() {
            let device = inner.devices.recreate(&shared.backend)?;
            shared
                .backend
                .attach_surface(&mut shared.surface.lock(), device)?;
        }

        let pool = shared.backend.create_frame_pool(
            inner.devices.device()?,
            shared.config.pixel_format,
            FRAME_POOL_CAPACITY,
            size,
        )?;

        let generation = inner.next_generation;
        inner.next_generation += 1;

        let options = SessionOptions {
            cursor_visible: shared.config.cursor_visible,
            border_visible: !(shared.config.hide_border && allow_borderless),
        };

        let (session, closed_token) = match bind_session(shared, &pool, &item, generation, options)
        {
            Ok(bound) => bound,
            Err(e) => {
                pool.close();
                return Err(e);
            }
        };

        let source_name = item.display_name();
        inner.processor.reset(size);
        inner.active = Some(ActiveCapture {
            generation,
            source_name: source_name.clone(),
            item,
            pool,
            session,
            closed_token: Some(closed_token),
        });
        inner.state = SessionState::Active;
        shared.active_generation.store(generation, Ordering::SeqCst);
        shared.counters.record_session_started();

        info!(%size, generation, "Capture started");
        shared.send_event(PipelineEvent::Started {
            source: source_name,
            size,
        });
        Ok(())
    }

    /// Stop the active capture. Idempotent.
    ///
    /// Called from inside a frame handler the stop runs once that handler
    /// returns.
    pub fn stop_capture(&self) {
        self.shared.request_stop(StopRequest {
            reason: StopReason::UserRequested,
            generation: None,
        });
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.shared.inner.lock().state
    }

    /// Size the frame pool is configured for while capturing.
    pub fn last_known_size(&self) -> Option<ContentSize> {
        let inner = self.shared.inner.lock();
        inner.active.as_ref().map(|_| inner.processor.last_size())
    }

    /// Name of the source being captured.
    pub fn source_name(&self) -> Option<String> {
        let inner = self.shared.inner.lock();
        inner.active.as_ref().map(|a| a.source_name.clone())
    }

    /// Number of devices created so far.
    pub fn device_generation(&self) -> u64 {
        self.shared.inner.lock().devices.generation()
    }

    /// Drawing surface shown by the compositor.
    pub fn surface(&self) -> Arc<Mutex<B::Surface>> {
        Arc::clone(&self.shared.surface)
    }

    /// Snapshot of pipeline counters.
    pub fn stats(&self) -> PipelineStats {
        self.shared.counters.snapshot()
    }

    /// The backend the pipeline was built with.
    pub fn backend(&self) -> &B {
        &self.shared.backend
    }
}

impl<B: CaptureBackend> Drop for Pipeline<B> {
    fn drop(&mut self) {
        self.shared.request_stop(StopRequest {
            reason: StopReason::Shutdown,
            generation: None,
        });
    }
}

/// Subscribe to the pool and item, then start a session.
fn bind_session<B: CaptureBackend>(
    shared: &Arc<Shared<B>>,
    pool: &B::Pool,
    item: &B::Item,
    generation: u64,
    options: SessionOptions,
) -> CaptureResult<(CaptureSession<B::Session>, SubscriptionToken)> {
    let weak: Weak<Shared<B>> = Arc::downgrade(shared);
    pool.on_frame_arrived(Box::new(move || {
        if let Some(shared) = weak.upgrade() {
            shared.on_frame_arrived(generation);
        }
    }))?;

    let weak: Weak<Shared<B>> = Arc::downgrade(shared);
    let token = item.on_closed(Box::new(move || {
        if let Some(shared) = weak.upgrade() {
            shared.on_source_closed(generation);
        }
    }))?;

    let started = pool.create_capture_session(item).and_then(|handle| {
        let mut session = CaptureSession::bind(handle, options);
        session.start()?;
        Ok(session)
    });

    match started {
        Ok(session) => Ok((session, token)),
        Err(e) => {
            item.remove_closed(token);
            Err(e)
        }
    }
}

impl<B: CaptureBackend> Shared<B> {
    fn on_frame_arrived(&self, generation: u64) {
        let _dispatch = DispatchGuard::enter();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let Some(active) = inner
            .active
            .as_ref()
            .filter(|active| active.generation == generation)
        else {
            trace!(generation, "Ignoring notification for stale capture");
            return;
        };

        let result = inner.processor.process(FrameContext {
            backend: &self.backend,
            devices: &mut inner.devices,
            pool: &active.pool,
            surface: &self.surface,
            counters: &self.counters,
            cancel: &self.cancel,
        });

        match result {
            Ok(FrameOutcome::NoFrame) => {}
            Ok(FrameOutcome::Processed {
                size,
                size_changed,
                recovery,
                ..
            }) => {
                if size_changed {
                    self.send_event(PipelineEvent::Resized { size });
                }
                if let Some(report) = recovery {
                    if report.device_recreated {
                        self.send_event(PipelineEvent::Recovered {
                            attempts: report.attempts,
                            device_recreated: true,
                        });
                    }
                }
            }
            Err(CaptureError::Cancelled) => {
                debug!("Frame handling abandoned for stop");
            }
            Err(e @ CaptureError::RecoveryExhausted { .. }) => {
                error!("Giving up on capture: {}", e);
                self.teardown(
                    inner,
                    StopReason::RecoveryFailed {
                        message: e.to_string(),
                    },
                );
            }
            Err(e) => {
                warn!("Frame dropped: {}", e);
            }
        }

        let pending = self.pending_stop.lock().take();
        if let Some(request) = pending {
            self.teardown_matching(inner, request);
        }
    }

    fn on_source_closed(&self, generation: u64) {
        if self.active_generation.load(Ordering::SeqCst) != generation {
            trace!(generation, "Ignoring close for stale capture");
            return;
        }
        info!("Capture source closed");
        self.request_stop(StopRequest {
            reason: StopReason::SourceClosed,
            generation: Some(generation),
        });
    }

    fn request_stop(&self, request: StopRequest) {
        self.cancel.store(true, Ordering::SeqCst);

        if DispatchGuard::active() {
            debug!(reason = ?request.reason, "Deferring stop until frame handling returns");
            let mut pending = self.pending_stop.lock();
            if pending.is_none() {
                *pending = Some(request);
            }
            return;
        }

        let mut inner = self.inner.lock();
        self.teardown_matching(&mut inner, request);
    }

    fn teardown_matching(&self, inner: &mut Inner<B>, request: StopRequest) {
        let current = inner.active.as_ref().map(|active| active.generation);
        match (request.generation, current) {
            (Some(wanted), Some(current)) if wanted != current => {
                trace!(wanted, current, "Stop request for stale capture");
                self.cancel.store(false, Ordering::SeqCst);
            }
            _ => self.teardown(inner, request.reason),
        }
    }

    /// Release the session, pool and item subscriptions. Safe when idle.
    fn teardown(&self, inner: &mut Inner<B>, reason: StopReason) {
        if let Some(mut active) = inner.active.take() {
            self.active_generation.store(0, Ordering::SeqCst);
            if let Some(token) = active.closed_token.take() {
                active.item.remove_closed(token);
            }
            active.session.stop();
            active.pool.close();
            inner.processor.clear_current_frame();

            info!(
                source = %active.source_name,
                reason = %reason.message(),
                "Capture stopped"
            );
            self.send_event(PipelineEvent::Stopped { reason });
        }
        inner.state = SessionState::Stopped;
        self.cancel.store(false, Ordering::SeqCst);
    }

    fn send_event(&self, event: PipelineEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                debug!(?event, "Pipeline event channel full, dropping event");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::surface::{DrawingSurface, Placement};
    use crate::testing::{
        GpuEvent, MockAccess, MockBackend, MockHost, MockItem, MockPicker, SurfaceContent,
    };

    fn config() -> PipelineConfig {
        PipelineConfig {
            recovery: RecoveryPolicy::unbounded(),
            ..PipelineConfig::default()
        }
    }

    fn pipeline() -> Pipeline<MockBackend> {
        Pipeline::new(MockBackend::new(), config()).unwrap()
    }

    fn drain(pipeline: &Pipeline<MockBackend>) -> Vec<PipelineEvent> {
        pipeline.events().try_iter().collect()
    }

    #[test]
    fn test_new_creates_initial_surface() {
        let pipeline = pipeline();

        assert_eq!(pipeline.state(), SessionState::Uninitialized);
        assert_eq!(pipeline.device_generation(), 1);
        assert_eq!(pipeline.surface().lock().size(), ContentSize::new(400, 400));
        assert_eq!(pipeline.last_known_size(), None);
    }

    #[test]
    fn test_stop_before_any_capture() {
        let pipeline = pipeline();

        pipeline.stop_capture();
        pipeline.stop_capture();

        assert_eq!(pipeline.state(), SessionState::Stopped);
        assert!(drain(&pipeline).is_empty());
        assert_eq!(pipeline.backend().gpu().sessions_closed(), 0);
    }

    #[test]
    fn test_start_configures_session() {
        let pipeline = pipeline();
        let item = MockItem::new("Notepad", ContentSize::new(800, 600));

        pipeline.start_capture(item.clone(), true).unwrap();

        assert_eq!(pipeline.state(), SessionState::Active);
        assert_eq!(pipeline.last_known_size(), Some(ContentSize::new(800, 600)));
        assert_eq!(pipeline.source_name().as_deref(), Some("Notepad"));
        assert_eq!(item.closed_handlers(), 1);

        let gpu = pipeline.backend().gpu();
        assert!(gpu.events().contains(&GpuEvent::SessionStarted {
            session: 1,
            cursor: false,
            border_required: false,
        }));
        let pool = gpu.current_pool().unwrap();
        assert_eq!(pool.size(), ContentSize::new(800, 600));
        assert_eq!(pool.capacity(), FRAME_POOL_CAPACITY);

        assert_eq!(
            drain(&pipeline),
            vec![PipelineEvent::Started {
                source: "Notepad".into(),
                size: ContentSize::new(800, 600),
            }]
        );
    }

    #[test]
    fn test_border_kept_without_access() {
        let pipeline = pipeline();
        pipeline
            .start_capture(MockItem::new("Notepad", ContentSize::new(800, 600)), false)
            .unwrap();

        assert!(pipeline
            .backend()
            .gpu()
            .events()
            .contains(&GpuEvent::SessionStarted {
                session: 1,
                cursor: false,
                border_required: true,
            }));
    }

    #[test]
    fn test_steady_frames_painted() {
        let pipeline = pipeline();
        let size = ContentSize::new(800, 600);
        pipeline
            .start_capture(MockItem::new("Notepad", size), true)
            .unwrap();
        let pool = pipeline.backend().gpu().current_pool().unwrap();

        for _ in 0..3 {
            pool.push_frame(size);
        }

        let stats = pipeline.stats();
        assert_eq!(stats.frames_presented, 3);
        assert_eq!(stats.size_changes, 0);
        assert_eq!(pipeline.surface().lock().presents(), 3);
        assert_eq!(pool.recreations(), 0);
    }

    #[test]
    fn test_resize_rebuilds_pool_once() {
        let pipeline = pipeline();
        pipeline
            .start_capture(MockItem::new("Notepad", ContentSize::new(800, 600)), true)
            .unwrap();
        let pool = pipeline.backend().gpu().current_pool().unwrap();
        drain(&pipeline);

        let bigger = ContentSize::new(1024, 768);
        pool.push_frame(bigger);
        pool.push_frame(bigger);

        assert_eq!(pool.recreations(), 1);
        assert_eq!(pool.size(), bigger);
        assert_eq!(pipeline.last_known_size(), Some(bigger));
        assert_eq!(pipeline.surface().lock().size(), bigger);
        assert_eq!(pipeline.device_generation(), 1);
        assert_eq!(drain(&pipeline), vec![PipelineEvent::Resized { size: bigger }]);
    }

    #[test]
    fn test_resized_content_stays_fitted_to_window() {
        let pipeline = pipeline();
        pipeline
            .start_capture(MockItem::new("Notepad", ContentSize::new(800, 600)), true)
            .unwrap();
        let pool = pipeline.backend().gpu().current_pool().unwrap();
        pipeline
            .surface()
            .lock()
            .set_viewport(ContentSize::new(400, 400))
            .unwrap();

        pool.push_frame(ContentSize::new(1600, 900));

        let surface = pipeline.surface();
        let surface = surface.lock();
        assert_eq!(surface.size(), ContentSize::new(1600, 900));
        assert_eq!(
            surface.placement(),
            Placement {
                scale: 0.25,
                offset_x: 0.0,
                offset_y: 87.5,
            }
        );
    }

    #[test]
    fn test_spurious_notification_ignored() {
        let pipeline = pipeline();
        pipeline
            .start_capture(MockItem::new("Notepad", ContentSize::new(800, 600)), true)
            .unwrap();
        let pool = pipeline.backend().gpu().current_pool().unwrap();

        pool.notify();

        let stats = pipeline.stats();
        assert_eq!(stats.notifications, 1);
        assert_eq!(stats.spurious_wakeups, 1);
        assert_eq!(pipeline.surface().lock().presents(), 0);
        assert_eq!(pipeline.state(), SessionState::Active);
    }

    #[test]
    fn test_recovers_after_repeated_device_loss() {
        let pipeline = pipeline();
        let size = ContentSize::new(800, 600);
        pipeline
            .start_capture(MockItem::new("Notepad", size), true)
            .unwrap();
        let gpu = pipeline.backend().gpu();
        let pool = gpu.current_pool().unwrap();
        drain(&pipeline);

        gpu.lose_images(1);
        gpu.lose_pool_recreates(2);
        pool.push_frame(size);

        assert_eq!(pipeline.device_generation(), 4);
        assert_eq!(pool.device_id(), gpu.latest_device_id());
        assert_eq!(pipeline.surface().lock().presents(), 0);
        assert_eq!(
            drain(&pipeline),
            vec![PipelineEvent::Recovered {
                attempts: 3,
                device_recreated: true,
            }]
        );

        pool.push_frame(size);
        let surface = pipeline.surface();
        let surface = surface.lock();
        assert_eq!(surface.presents(), 1);
        assert!(matches!(
            surface.content(),
            SurfaceContent::Image(image) if image.device == gpu.latest_device_id()
        ));
    }

    #[test]
    fn test_recovery_exhaustion_stops_capture() {
        let config = PipelineConfig {
            recovery: RecoveryPolicy::immediate(2),
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::new(MockBackend::new(), config).unwrap();
        let item = MockItem::new("Notepad", ContentSize::new(800, 600));
        pipeline.start_capture(item.clone(), true).unwrap();
        let gpu = pipeline.backend().gpu();
        let pool = gpu.current_pool().unwrap();
        drain(&pipeline);

        gpu.lose_images(1);
        gpu.fail_device_creations(5);
        pool.push_frame(ContentSize::new(800, 600));

        assert_eq!(pipeline.state(), SessionState::Stopped);
        assert!(pool.is_closed());
        assert_eq!(item.closed_handlers(), 0);
        assert_eq!(pipeline.stats().recovery_failures, 1);
        assert!(matches!(
            drain(&pipeline).as_slice(),
            [PipelineEvent::Stopped {
                reason: StopReason::RecoveryFailed { .. }
            }]
        ));

        // A later start brings up a fresh device.
        gpu.fail_device_creations(0);
        pipeline
            .start_capture(MockItem::new("Calc", ContentSize::new(300, 300)), true)
            .unwrap();
        assert_eq!(pipeline.state(), SessionState::Active);
    }

    #[test]
    fn test_restart_replaces_previous_capture() {
        let pipeline = pipeline();
        let first = MockItem::new("Notepad", ContentSize::new(800, 600));
        pipeline.start_capture(first.clone(), true).unwrap();
        let gpu = pipeline.backend().gpu();
        let first_pool = gpu.current_pool().unwrap();

        pipeline
            .start_capture(MockItem::new("Calc", ContentSize::new(320, 480)), true)
            .unwrap();

        assert!(first_pool.is_closed());
        assert_eq!(first.closed_handlers(), 0);
        assert_eq!(gpu.open_pools(), 1);
        assert_eq!(gpu.sessions_closed(), 1);
        assert_eq!(pipeline.last_known_size(), Some(ContentSize::new(320, 480)));

        let log = gpu.events();
        let position = |wanted: &GpuEvent| log.iter().position(|e| e == wanted).unwrap();
        let second_started = log
            .iter()
            .position(|e| matches!(e, GpuEvent::SessionStarted { session: 2, .. }))
            .unwrap();
        assert!(position(&GpuEvent::SessionClosed { session: 1 }) < second_started);
        assert!(position(&GpuEvent::PoolClosed { pool: 1 }) < second_started);

        let events = drain(&pipeline);
        assert!(events.contains(&PipelineEvent::Stopped {
            reason: StopReason::Superseded
        }));

        // The old item closing must not stop the new capture.
        first.close();
        assert_eq!(pipeline.state(), SessionState::Active);
    }

    #[test]
    fn test_stale_handler_ignored() {
        let pipeline = pipeline();
        pipeline
            .start_capture(MockItem::new("Notepad", ContentSize::new(800, 600)), true)
            .unwrap();
        let old_pool = pipeline.backend().gpu().current_pool().unwrap();
        pipeline
            .start_capture(MockItem::new("Calc", ContentSize::new(320, 480)), true)
            .unwrap();

        old_pool.fire_stale_handlers();

        assert_eq!(pipeline.stats().notifications, 0);
        assert_eq!(pipeline.last_known_size(), Some(ContentSize::new(320, 480)));
    }

    #[test]
    fn test_stop_releases_everything() {
        let pipeline = pipeline();
        let item = MockItem::new("Notepad", ContentSize::new(800, 600));
        pipeline.start_capture(item.clone(), true).unwrap();
        let gpu = pipeline.backend().gpu();
        let pool = gpu.current_pool().unwrap();

        pipeline.stop_capture();

        assert_eq!(pipeline.state(), SessionState::Stopped);
        assert!(pool.is_closed());
        assert_eq!(gpu.sessions_closed(), 1);
        assert_eq!(item.closed_handlers(), 0);
        assert_eq!(pipeline.last_known_size(), None);

        pool.push_frame(ContentSize::new(800, 600));
        assert_eq!(pipeline.stats().notifications, 0);

        // Idempotent.
        pipeline.stop_capture();
        assert_eq!(gpu.sessions_closed(), 1);
    }

    #[test]
    fn test_source_closed_stops_capture() {
        let pipeline = pipeline();
        let item = MockItem::new("Notepad", ContentSize::new(800, 600));
        pipeline.start_capture(item.clone(), true).unwrap();
        drain(&pipeline);

        item.close();

        assert_eq!(pipeline.state(), SessionState::Stopped);
        assert_eq!(
            drain(&pipeline),
            vec![PipelineEvent::Stopped {
                reason: StopReason::SourceClosed
            }]
        );
    }

    #[test]
    fn test_close_during_frame_handling_is_deferred() {
        let pipeline = pipeline();
        let size = ContentSize::new(800, 600);
        let item = MockItem::new("Notepad", size);
        pipeline.start_capture(item.clone(), true).unwrap();
        let gpu = pipeline.backend().gpu();
        let pool = gpu.current_pool().unwrap();

        let closing = item.clone();
        gpu.on_create_image(move || closing.close());
        pool.push_frame(size);

        assert_eq!(pipeline.state(), SessionState::Stopped);
        assert!(pool.is_closed());
        assert_eq!(pipeline.stats().frames_presented, 1);
    }

    #[test]
    fn test_stop_from_other_thread_cancels_recovery() {
        let config = PipelineConfig {
            recovery: RecoveryPolicy {
                max_attempts: None,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
            ..PipelineConfig::default()
        };
        let pipeline = Arc::new(Pipeline::new(MockBackend::new(), config).unwrap());
        let size = ContentSize::new(800, 600);
        pipeline
            .start_capture(MockItem::new("Notepad", size), true)
            .unwrap();
        let gpu = pipeline.backend().gpu();
        let pool = gpu.current_pool().unwrap();

        gpu.lose_images(1);
        gpu.fail_device_creations(u32::MAX);

        let worker = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.push_frame(size))
        };

        while pipeline.stats().notifications == 0 {
            std::thread::yield_now();
        }
        pipeline.stop_capture();
        worker.join().unwrap();

        assert_eq!(pipeline.state(), SessionState::Stopped);
        assert!(pool.is_closed());
    }

    #[test]
    fn test_interactive_start() {
        let pipeline = pipeline();
        let picker = MockPicker::with_items(vec![MockItem::new(
            "Notepad",
            ContentSize::new(800, 600),
        )]);
        let host = MockHost::default();

        let outcome = pipeline.start_capture_async(&picker, &MockAccess::allowed(), &host);

        assert!(matches!(outcome, StartOutcome::Started(ref name) if name == "Notepad"));
        assert_eq!(host.overlay_requests(), 1);
        assert!(pipeline
            .backend()
            .gpu()
            .events()
            .contains(&GpuEvent::SessionStarted {
                session: 1,
                cursor: false,
                border_required: false,
            }));
    }

    #[test]
    fn test_interactive_cancel_leaves_idle() {
        let pipeline = pipeline();
        let picker = MockPicker::with_items(Vec::new());
        let host = MockHost::default();

        let outcome = pipeline.start_capture_async(&picker, &MockAccess::allowed(), &host);

        assert!(matches!(outcome, StartOutcome::Cancelled));
        assert_eq!(host.overlay_requests(), 0);
        assert_eq!(pipeline.state(), SessionState::Uninitialized);
    }

    #[test]
    fn test_interactive_denied_access_keeps_border() {
        let pipeline = pipeline();
        let picker = MockPicker::with_items(vec![MockItem::new(
            "Notepad",
            ContentSize::new(800, 600),
        )]);

        let outcome =
            pipeline.start_capture_async(&picker, &MockAccess::denied(), &MockHost::default());

        assert!(outcome.is_started());
        assert!(pipeline
            .backend()
            .gpu()
            .events()
            .contains(&GpuEvent::SessionStarted {
                session: 1,
                cursor: false,
                border_required: true,
            }));
    }
}
