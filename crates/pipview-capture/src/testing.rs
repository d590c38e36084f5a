//! In-memory backend for exercising the pipeline without a GPU.
//!
//! Frames are delivered by calling [`MockFramePool::push_frame`] from a test;
//! the registered frame-arrived handlers run synchronously on the caller's
//! thread. Failures are injected through [`MockGpu`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use pipview_ipc::ContentSize;

use crate::backend::CaptureBackend;
use crate::error::CaptureError;
use crate::frame::{CaptureFrame, PixelFormat};
use crate::frame_pool::{FramePool, SignalHandler, SubscriptionToken};
use crate::session::SessionControl;
use crate::source::{CaptureAccess, CaptureItem, OverlayHost, SourcePicker};
use crate::surface::{Color, DrawingSurface, Placement};
use crate::CaptureResult;

type Handler = Arc<dyn Fn() + Send + Sync + 'static>;

/// Something the mock GPU did, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuEvent {
    DeviceCreated { device: u64 },
    DeviceCreationFailed,
    PoolCreated { pool: u64, device: u64, size: ContentSize },
    PoolRecreated { pool: u64, device: u64, size: ContentSize },
    PoolClosed { pool: u64 },
    FrameReleased { pool: u64 },
    ImageCreated { device: u64, size: ContentSize },
    SessionStarted { session: u64, cursor: bool, border_required: bool },
    SessionClosed { session: u64 },
}

#[derive(Default)]
struct GpuState {
    devices_created: u64,
    pools_created: u64,
    sessions_created: u64,
    fail_device_creations: u32,
    lose_images: u32,
    fail_images: u32,
    fail_frame_reads: u32,
    lose_pool_recreates: u32,
    image_hook: Option<Handler>,
    pools: Vec<Weak<PoolInner>>,
    events: Vec<GpuEvent>,
}

/// Shared handle to the mock GPU: failure injection and an event log.
#[derive(Clone, Default)]
pub struct MockGpu {
    state: Arc<Mutex<GpuState>>,
}

impl MockGpu {
    /// Fail the next `count` device creations.
    pub fn fail_device_creations(&self, count: u32) {
        self.state.lock().fail_device_creations = count;
    }

    /// Report device loss from the next `count` image conversions.
    pub fn lose_images(&self, count: u32) {
        self.state.lock().lose_images = count;
    }

    /// Fail the next `count` image conversions with a non-device error.
    pub fn fail_images(&self, count: u32) {
        self.state.lock().fail_images = count;
    }

    /// Fail the next `count` frame fetches after the frame left the queue,
    /// as when its content size cannot be read.
    pub fn fail_frame_reads(&self, count: u32) {
        self.state.lock().fail_frame_reads = count;
    }

    /// Report device loss from the next `count` pool rebuilds.
    pub fn lose_pool_recreates(&self, count: u32) {
        self.state.lock().lose_pool_recreates = count;
    }

    /// Run `hook` at the start of every image conversion.
    pub fn on_create_image(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.state.lock().image_hook = Some(Arc::new(hook));
    }

    pub fn events(&self) -> Vec<GpuEvent> {
        self.state.lock().events.clone()
    }

    pub fn devices_created(&self) -> u64 {
        self.state.lock().devices_created
    }

    /// Id of the most recently created device.
    pub fn latest_device_id(&self) -> u64 {
        self.state.lock().devices_created
    }

    /// The most recently created pool that is still open.
    pub fn current_pool(&self) -> Option<MockFramePool> {
        self.state
            .lock()
            .pools
            .iter()
            .rev()
            .filter_map(Weak::upgrade)
            .map(|inner| MockFramePool { inner })
            .find(|pool| !pool.is_closed())
    }

    pub fn open_pools(&self) -> usize {
        self.state
            .lock()
            .pools
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|inner| !inner.state.lock().closed)
            .count()
    }

    pub fn sessions_closed(&self) -> usize {
        self.state
            .lock()
            .events
            .iter()
            .filter(|e| matches!(e, GpuEvent::SessionClosed { .. }))
            .count()
    }

    fn log(&self, event: GpuEvent) {
        self.state.lock().events.push(event);
    }
}

/// Backend whose resources live in memory.
#[derive(Clone, Default)]
pub struct MockBackend {
    gpu: MockGpu,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gpu(&self) -> MockGpu {
        self.gpu.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDevice {
    pub id: u64,
}

impl CaptureBackend for MockBackend {
    type Device = MockDevice;
    type Item = MockItem;
    type Frame = MockFrame;
    type Session = MockSession;
    type Pool = MockFramePool;
    type Image = MockImage;
    type Surface = MockSurface;

    fn create_device(&self) -> CaptureResult<MockDevice> {
        let mut state = self.gpu.state.lock();
        if state.fail_device_creations > 0 {
            state.fail_device_creations -= 1;
            state.events.push(GpuEvent::DeviceCreationFailed);
            return Err(CaptureError::DeviceCreation(
                "mock adapter unavailable".into(),
            ));
        }
        state.devices_created += 1;
        let id = state.devices_created;
        state.events.push(GpuEvent::DeviceCreated { device: id });
        Ok(MockDevice { id })
    }

    fn create_frame_pool(
        &self,
        device: &MockDevice,
        format: PixelFormat,
        capacity: u32,
        size: ContentSize,
    ) -> CaptureResult<MockFramePool> {
        let mut state = self.gpu.state.lock();
        state.pools_created += 1;
        let id = state.pools_created;
        let inner = Arc::new(PoolInner {
            id,
            gpu: self.gpu.clone(),
            state: Mutex::new(PoolState {
                device: device.id,
                format,
                capacity,
                size,
                queue: VecDeque::new(),
                handlers: Vec::new(),
                retired: Vec::new(),
                next_token: 1,
                recreations: 0,
                closed: false,
            }),
        });
        state.pools.push(Arc::downgrade(&inner));
        state.events.push(GpuEvent::PoolCreated {
            pool: id,
            device: device.id,
            size,
        });
        Ok(MockFramePool { inner })
    }

    fn create_image(&self, device: &MockDevice, frame: &MockFrame) -> CaptureResult<MockImage> {
        let hook = self.gpu.state.lock().image_hook.clone();
        if let Some(hook) = hook {
            hook();
        }

        let mut state = self.gpu.state.lock();
        if state.lose_images > 0 {
            state.lose_images -= 1;
            return Err(CaptureError::DeviceLost);
        }
        if state.fail_images > 0 {
            state.fail_images -= 1;
            return Err(CaptureError::FrameConversion("mock conversion failure".into()));
        }
        if frame.device != device.id {
            return Err(CaptureError::DeviceLost);
        }
        state.events.push(GpuEvent::ImageCreated {
            device: device.id,
            size: frame.size,
        });
        Ok(MockImage {
            device: device.id,
            size: frame.size,
        })
    }

    fn create_surface(&self, device: &MockDevice, size: ContentSize) -> CaptureResult<MockSurface> {
        Ok(MockSurface {
            device: device.id,
            size,
            viewport: size,
            content: SurfaceContent::Empty,
            pending: None,
            presents: 0,
        })
    }

    fn attach_surface(&self, surface: &mut MockSurface, device: &MockDevice) -> CaptureResult<()> {
        surface.device = device.id;
        Ok(())
    }
}

struct PoolState {
    device: u64,
    format: PixelFormat,
    capacity: u32,
    size: ContentSize,
    queue: VecDeque<(ContentSize, u64)>,
    handlers: Vec<Handler>,
    retired: Vec<Handler>,
    next_token: i64,
    recreations: u32,
    closed: bool,
}

struct PoolInner {
    id: u64,
    gpu: MockGpu,
    state: Mutex<PoolState>,
}

/// Frame pool driven by the test.
#[derive(Clone)]
pub struct MockFramePool {
    inner: Arc<PoolInner>,
}

impl MockFramePool {
    /// Queue a frame without notifying subscribers.
    pub fn queue_frame(&self, size: ContentSize) -> bool {
        let mut state = self.inner.state.lock();
        if state.closed {
            return false;
        }
        if state.queue.len() >= state.capacity as usize {
            state.queue.pop_front();
        }
        let device = state.device;
        state.queue.push_back((size, device));
        true
    }

    /// Queue a frame and run the frame-arrived handlers on this thread.
    pub fn push_frame(&self, size: ContentSize) -> bool {
        if !self.queue_frame(size) {
            return false;
        }
        self.notify();
        true
    }

    /// Run the frame-arrived handlers without queueing anything.
    pub fn notify(&self) {
        let handlers = self.inner.state.lock().handlers.clone();
        for handler in handlers {
            handler();
        }
    }

    /// Run handlers that were registered before the pool was closed.
    pub fn fire_stale_handlers(&self) {
        let handlers = self.inner.state.lock().retired.clone();
        for handler in handlers {
            handler();
        }
    }

    pub fn capacity(&self) -> u32 {
        self.inner.state.lock().capacity
    }

    pub fn format(&self) -> PixelFormat {
        self.inner.state.lock().format
    }

    pub fn device_id(&self) -> u64 {
        self.inner.state.lock().device
    }

    pub fn recreations(&self) -> u32 {
        self.inner.state.lock().recreations
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

impl FramePool for MockFramePool {
    type Device = MockDevice;
    type Item = MockItem;
    type Frame = MockFrame;
    type Session = MockSession;

    fn recreate(
        &self,
        device: &MockDevice,
        format: PixelFormat,
        capacity: u32,
        size: ContentSize,
    ) -> CaptureResult<()> {
        {
            let mut gpu = self.inner.gpu.state.lock();
            if gpu.lose_pool_recreates > 0 {
                gpu.lose_pool_recreates -= 1;
                return Err(CaptureError::DeviceLost);
            }
        }

        let mut state = self.inner.state.lock();
        state.device = device.id;
        state.format = format;
        state.capacity = capacity;
        state.size = size;
        state.queue.clear();
        state.recreations += 1;
        drop(state);

        self.inner.gpu.log(GpuEvent::PoolRecreated {
            pool: self.inner.id,
            device: device.id,
            size,
        });
        Ok(())
    }

    fn try_get_next_frame(&self) -> CaptureResult<Option<MockFrame>> {
        let frame = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Ok(None);
            }
            state.queue.pop_front().map(|(size, device)| MockFrame {
                size,
                device,
                pool: self.inner.id,
                gpu: self.inner.gpu.clone(),
            })
        };

        let Some(frame) = frame else {
            return Ok(None);
        };

        let fail_read = {
            let mut gpu = self.inner.gpu.state.lock();
            let fail = gpu.fail_frame_reads > 0;
            if fail {
                gpu.fail_frame_reads -= 1;
            }
            fail
        };
        if fail_read {
            drop(frame);
            return Err(CaptureError::FrameConversion(
                "mock content size read failure".into(),
            ));
        }
        Ok(Some(frame))
    }

    fn on_frame_arrived(&self, handler: SignalHandler) -> CaptureResult<SubscriptionToken> {
        let mut state = self.inner.state.lock();
        state.handlers.push(Arc::from(handler));
        let token = state.next_token;
        state.next_token += 1;
        Ok(SubscriptionToken(token))
    }

    fn create_capture_session(&self, _item: &MockItem) -> CaptureResult<MockSession> {
        let mut gpu = self.inner.gpu.state.lock();
        gpu.sessions_created += 1;
        Ok(MockSession {
            id: gpu.sessions_created,
            gpu: self.inner.gpu.clone(),
            flags: Mutex::new(SessionFlags {
                cursor: true,
                border_required: true,
            }),
        })
    }

    fn size(&self) -> ContentSize {
        self.inner.state.lock().size
    }

    fn close(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.queue.clear();
        let handlers: Vec<Handler> = state.handlers.drain(..).collect();
        state.retired.extend(handlers);
        drop(state);

        self.inner.gpu.log(GpuEvent::PoolClosed {
            pool: self.inner.id,
        });
    }
}

/// Frame handed out by [`MockFramePool`]. Logs its release.
pub struct MockFrame {
    pub size: ContentSize,
    pub device: u64,
    pool: u64,
    gpu: MockGpu,
}

impl CaptureFrame for MockFrame {
    fn content_size(&self) -> ContentSize {
        self.size
    }
}

impl Drop for MockFrame {
    fn drop(&mut self) {
        self.gpu.log(GpuEvent::FrameReleased { pool: self.pool });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockImage {
    pub device: u64,
    pub size: ContentSize,
}

/// What a [`MockSurface`] currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceContent {
    Empty,
    Cleared,
    Image(MockImage),
}

pub struct MockSurface {
    device: u64,
    size: ContentSize,
    viewport: ContentSize,
    content: SurfaceContent,
    pending: Option<SurfaceContent>,
    presents: u64,
}

impl MockSurface {
    /// Content shown after the last presented draw.
    pub fn content(&self) -> &SurfaceContent {
        &self.content
    }

    pub fn presents(&self) -> u64 {
        self.presents
    }

    pub fn device_id(&self) -> u64 {
        self.device
    }

    pub fn viewport(&self) -> ContentSize {
        self.viewport
    }

    /// Placement the compositor would apply right now.
    pub fn placement(&self) -> Placement {
        Placement::fit(self.size, self.viewport)
    }
}

impl DrawingSurface for MockSurface {
    type Image = MockImage;

    fn size(&self) -> ContentSize {
        self.size
    }

    fn resize(&mut self, size: ContentSize) -> CaptureResult<()> {
        self.size = size;
        Ok(())
    }

    fn set_viewport(&mut self, viewport: ContentSize) -> CaptureResult<()> {
        self.viewport = viewport;
        Ok(())
    }

    fn begin_draw(&mut self) -> CaptureResult<()> {
        if self.pending.is_some() {
            return Err(CaptureError::InvalidState {
                expected: "idle surface",
                actual: "drawing",
            });
        }
        self.pending = Some(self.content.clone());
        Ok(())
    }

    fn clear(&mut self, _color: Color) -> CaptureResult<()> {
        self.pending = Some(SurfaceContent::Cleared);
        Ok(())
    }

    fn draw_image(&mut self, image: &MockImage) -> CaptureResult<()> {
        if image.device != self.device {
            return Err(CaptureError::DeviceLost);
        }
        self.pending = Some(SurfaceContent::Image(image.clone()));
        Ok(())
    }

    fn end_draw(&mut self) -> CaptureResult<()> {
        if let Some(content) = self.pending.take() {
            self.content = content;
            self.presents += 1;
        }
        Ok(())
    }
}

struct SessionFlags {
    cursor: bool,
    border_required: bool,
}

pub struct MockSession {
    id: u64,
    gpu: MockGpu,
    flags: Mutex<SessionFlags>,
}

impl SessionControl for MockSession {
    fn set_cursor_capture_enabled(&self, enabled: bool) -> CaptureResult<()> {
        self.flags.lock().cursor = enabled;
        Ok(())
    }

    fn set_border_required(&self, required: bool) -> CaptureResult<()> {
        self.flags.lock().border_required = required;
        Ok(())
    }

    fn start_capture(&self) -> CaptureResult<()> {
        let flags = self.flags.lock();
        self.gpu.log(GpuEvent::SessionStarted {
            session: self.id,
            cursor: flags.cursor,
            border_required: flags.border_required,
        });
        Ok(())
    }

    fn close(&self) {
        self.gpu.log(GpuEvent::SessionClosed { session: self.id });
    }
}

struct ItemState {
    size: ContentSize,
    handlers: Vec<(i64, Handler)>,
    next_token: i64,
    closed: bool,
}

struct ItemInner {
    name: String,
    state: Mutex<ItemState>,
}

/// Capture source the test can resize and close.
#[derive(Clone)]
pub struct MockItem {
    inner: Arc<ItemInner>,
}

impl MockItem {
    pub fn new(name: impl Into<String>, size: ContentSize) -> Self {
        Self {
            inner: Arc::new(ItemInner {
                name: name.into(),
                state: Mutex::new(ItemState {
                    size,
                    handlers: Vec::new(),
                    next_token: 1,
                    closed: false,
                }),
            }),
        }
    }

    pub fn resize(&self, size: ContentSize) {
        self.inner.state.lock().size = size;
    }

    /// Mark the source closed and run the closed handlers on this thread.
    pub fn close(&self) {
        let handlers: Vec<Handler> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.handlers.iter().map(|(_, h)| Arc::clone(h)).collect()
        };
        for handler in handlers {
            handler();
        }
    }

    /// Number of registered closed handlers.
    pub fn closed_handlers(&self) -> usize {
        self.inner.state.lock().handlers.len()
    }
}

impl CaptureItem for MockItem {
    fn display_name(&self) -> String {
        self.inner.name.clone()
    }

    fn size(&self) -> CaptureResult<ContentSize> {
        let state = self.inner.state.lock();
        if state.closed {
            return Err(CaptureError::SourceClosed);
        }
        Ok(state.size)
    }

    fn on_closed(&self, handler: SignalHandler) -> CaptureResult<SubscriptionToken> {
        let mut state = self.inner.state.lock();
        let token = state.next_token;
        state.next_token += 1;
        state.handlers.push((token, Arc::from(handler)));
        Ok(SubscriptionToken(token))
    }

    fn remove_closed(&self, token: SubscriptionToken) {
        self.inner
            .state
            .lock()
            .handlers
            .retain(|(id, _)| *id != token.0);
    }
}

/// Picker that hands out queued items, then reports cancellation.
#[derive(Default)]
pub struct MockPicker {
    items: Mutex<VecDeque<MockItem>>,
}

impl MockPicker {
    pub fn with_items(items: Vec<MockItem>) -> Self {
        Self {
            items: Mutex::new(items.into()),
        }
    }
}

impl SourcePicker for MockPicker {
    type Item = MockItem;

    fn pick(&self) -> CaptureResult<Option<MockItem>> {
        Ok(self.items.lock().pop_front())
    }
}

pub struct MockAccess {
    allowed: bool,
}

impl MockAccess {
    pub fn allowed() -> Self {
        Self { allowed: true }
    }

    pub fn denied() -> Self {
        Self { allowed: false }
    }
}

impl CaptureAccess for MockAccess {
    fn request_borderless(&self) -> CaptureResult<bool> {
        if self.allowed {
            Ok(true)
        } else {
            Err(CaptureError::PermissionDenied)
        }
    }
}

/// Overlay host that counts requests.
#[derive(Clone, Default)]
pub struct MockHost {
    requests: Arc<AtomicUsize>,
}

impl MockHost {
    pub fn overlay_requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl OverlayHost for MockHost {
    fn enter_overlay_mode(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}
