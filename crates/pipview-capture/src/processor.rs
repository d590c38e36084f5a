//! Per-frame handling: fetch, size check, paint and recovery.

use std::sync::atomic::AtomicBool;

use parking_lot::Mutex;
use pipview_ipc::ContentSize;
use tracing::{debug, trace, warn};

use crate::backend::CaptureBackend;
use crate::device::DeviceContext;
use crate::error::CaptureError;
use crate::frame::{CaptureFrame, PixelFormat};
use crate::frame_pool::FramePool;
use crate::recovery::{self, RecoveryPolicy, RecoveryReport};
use crate::stats::FrameCounters;
use crate::surface::{Color, DrawingSurface};
use crate::CaptureResult;

/// What handling one notification produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The pool had nothing queued.
    NoFrame,

    /// A frame was taken from the pool.
    Processed {
        /// Content size the pool is configured for afterwards.
        size: ContentSize,

        /// The content size differed from the previous frame.
        size_changed: bool,

        /// The frame reached the surface.
        painted: bool,

        /// Set when the pool was rebuilt.
        recovery: Option<RecoveryReport>,
    },
}

/// Borrowed pipeline resources for one notification.
pub struct FrameContext<'a, B: CaptureBackend> {
    pub backend: &'a B,
    pub devices: &'a mut DeviceContext<B>,
    pub pool: &'a B::Pool,
    pub surface: &'a Mutex<B::Surface>,
    pub counters: &'a FrameCounters,
    pub cancel: &'a AtomicBool,
}

/// Turns frame-arrived notifications into presented images.
pub struct FrameProcessor<B: CaptureBackend> {
    last_size: ContentSize,
    current_frame: Option<B::Image>,
    format: PixelFormat,
    policy: RecoveryPolicy,
}

impl<B: CaptureBackend> FrameProcessor<B> {
    pub fn new(format: PixelFormat, policy: RecoveryPolicy) -> Self {
        Self {
            last_size: ContentSize::default(),
            current_frame: None,
            format,
            policy,
        }
    }

    /// Prepare for a new capture whose pool was created at `size`.
    pub fn reset(&mut self, size: ContentSize) {
        self.last_size = size;
        self.current_frame = None;
    }

    /// Size the pool was last configured for.
    pub fn last_size(&self) -> ContentSize {
        self.last_size
    }

    /// Drop the retained image.
    pub fn clear_current_frame(&mut self) {
        self.current_frame = None;
    }

    /// Handle one frame-arrived notification.
    ///
    /// The frame is released before any pool rebuild. Errors other than device
    /// loss are returned after the rebuild the frame required has run.
    pub fn process(&mut self, ctx: FrameContext<'_, B>) -> CaptureResult<FrameOutcome> {
        let FrameContext {
            backend,
            devices,
            pool,
            surface,
            counters,
            cancel,
        } = ctx;

        counters.record_notification();

        let frame = match pool.try_get_next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                trace!("Frame notification with empty pool");
                counters.record_spurious_wakeup();
                return Ok(FrameOutcome::NoFrame);
            }
            Err(e) if e.is_device_lost() => {
                warn!("Device lost while fetching frame");
                let target = self.last_size;
                let report =
                    self.recover(backend, devices, pool, surface, counters, cancel, target, true)?;
                return Ok(FrameOutcome::Processed {
                    size: target,
                    size_changed: false,
                    painted: false,
                    recovery: Some(report),
                });
            }
            Err(e) => return Err(e),
        };

        let size = frame.content_size();
        let size_changed = size != self.last_size;
        let mut needs_reset = size_changed;
        let mut recreate_device = false;
        let mut deferred_error = None;

        if size_changed {
            debug!(from = %self.last_size, to = %size, "Content size changed");
            self.last_size = size;
            counters.record_size_change();
        }

        let painted = match self.paint(backend, devices, surface, &frame) {
            Ok(()) => {
                counters.record_presented();
                true
            }
            Err(e) if e.is_device_lost() => {
                warn!("Device lost while painting frame");
                counters.record_dropped();
                needs_reset = true;
                recreate_device = true;
                false
            }
            Err(e) => {
                counters.record_dropped();
                deferred_error = Some(e);
                false
            }
        };

        drop(frame);

        let recovery = if needs_reset {
            Some(self.recover(
                backend,
                devices,
                pool,
                surface,
                counters,
                cancel,
                size,
                recreate_device,
            )?)
        } else {
            None
        };

        if let Some(e) = deferred_error {
            return Err(e);
        }

        Ok(FrameOutcome::Processed {
            size,
            size_changed,
            painted,
            recovery,
        })
    }

    /// Convert `frame`, then clear the surface and draw it.
    fn paint(
        &mut self,
        backend: &B,
        devices: &DeviceContext<B>,
        surface: &Mutex<B::Surface>,
        frame: &B::Frame,
    ) -> CaptureResult<()> {
        let device = devices.device()?;
        let image = self.current_frame.insert(backend.create_image(device, frame)?);

        let mut surface = surface.lock();
        let size = frame.content_size();
        if surface.size() != size {
            surface.resize(size)?;
        }

        let mut draw = surface.draw()?;
        draw.clear(Color::TRANSPARENT)?;
        draw.draw_image(image)?;
        draw.finish()
    }

    #[allow(clippy::too_many_arguments)]
    fn recover(
        &mut self,
        backend: &B,
        devices: &mut DeviceContext<B>,
        pool: &B::Pool,
        surface: &Mutex<B::Surface>,
        counters: &FrameCounters,
        cancel: &AtomicBool,
        size: ContentSize,
        recreate_device: bool,
    ) -> CaptureResult<RecoveryReport> {
        let result = recovery::recover(
            backend,
            devices,
            pool,
            self.format,
            size,
            recreate_device,
            &self.policy,
            cancel,
        );

        match result {
            Ok(report) => {
                counters.record_recovery(&report);
                if report.device_recreated {
                    self.current_frame = None;
                    let device = devices.device()?;
                    if let Err(e) = backend.attach_surface(&mut surface.lock(), device) {
                        warn!("Failed to attach surface to new device: {}", e);
                    }
                }
                Ok(report)
            }
            Err(e) => {
                if let CaptureError::RecoveryExhausted { attempts, .. } = &e {
                    counters.record_recovery_failure(*attempts);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FRAME_POOL_CAPACITY;
    use crate::testing::{GpuEvent, MockBackend, SurfaceContent};

    struct Fixture {
        backend: MockBackend,
        devices: DeviceContext<MockBackend>,
        pool: <MockBackend as CaptureBackend>::Pool,
        surface: Mutex<<MockBackend as CaptureBackend>::Surface>,
        counters: FrameCounters,
        cancel: AtomicBool,
        processor: FrameProcessor<MockBackend>,
    }

    impl Fixture {
        fn new(size: ContentSize) -> Self {
            let backend = MockBackend::new();
            let devices = DeviceContext::create(&backend).unwrap();
            let device = devices.device().unwrap();
            let pool = backend
                .create_frame_pool(device, PixelFormat::Bgra8UNorm, FRAME_POOL_CAPACITY, size)
                .unwrap();
            let surface = backend
                .create_surface(device, ContentSize::new(400, 400))
                .unwrap();
            let mut processor =
                FrameProcessor::new(PixelFormat::Bgra8UNorm, RecoveryPolicy::unbounded());
            processor.reset(size);

            Self {
                backend,
                devices,
                pool,
                surface: Mutex::new(surface),
                counters: FrameCounters::default(),
                cancel: AtomicBool::new(false),
                processor,
            }
        }

        fn process(&mut self) -> CaptureResult<FrameOutcome> {
            self.processor.process(FrameContext {
                backend: &self.backend,
                devices: &mut self.devices,
                pool: &self.pool,
                surface: &self.surface,
                counters: &self.counters,
                cancel: &self.cancel,
            })
        }
    }

    #[test]
    fn test_empty_pool_is_noop() {
        let mut fx = Fixture::new(ContentSize::new(800, 600));

        assert_eq!(fx.process().unwrap(), FrameOutcome::NoFrame);
        assert_eq!(fx.surface.lock().presents(), 0);
        assert_eq!(fx.counters.snapshot().spurious_wakeups, 1);
    }

    #[test]
    fn test_steady_frame_painted() {
        let size = ContentSize::new(800, 600);
        let mut fx = Fixture::new(size);
        fx.pool.queue_frame(size);

        let outcome = fx.process().unwrap();

        assert_eq!(
            outcome,
            FrameOutcome::Processed {
                size,
                size_changed: false,
                painted: true,
                recovery: None,
            }
        );
        let surface = fx.surface.lock();
        assert_eq!(surface.size(), size);
        assert!(matches!(surface.content(), SurfaceContent::Image(img) if img.size == size));
    }

    #[test]
    fn test_resize_paints_then_rebuilds_pool() {
        let mut fx = Fixture::new(ContentSize::new(800, 600));
        let bigger = ContentSize::new(1024, 768);
        fx.pool.queue_frame(bigger);

        let outcome = fx.process().unwrap();

        let FrameOutcome::Processed {
            size_changed,
            painted,
            recovery,
            ..
        } = outcome
        else {
            panic!("expected a processed frame");
        };
        assert!(size_changed);
        assert!(painted);
        assert!(!recovery.unwrap().device_recreated);
        assert_eq!(fx.pool.size(), bigger);
        assert_eq!(fx.processor.last_size(), bigger);
        assert_eq!(fx.surface.lock().size(), bigger);
    }

    #[test]
    fn test_conversion_loss_leaves_surface_untouched() {
        let size = ContentSize::new(800, 600);
        let mut fx = Fixture::new(size);
        fx.backend.gpu().lose_images(1);
        fx.pool.queue_frame(size);

        let outcome = fx.process().unwrap();

        let FrameOutcome::Processed {
            painted, recovery, ..
        } = outcome
        else {
            panic!("expected a processed frame");
        };
        assert!(!painted);
        assert!(recovery.unwrap().device_recreated);
        assert_eq!(fx.surface.lock().presents(), 0);
        assert_eq!(*fx.surface.lock().content(), SurfaceContent::Empty);
        assert_eq!(fx.devices.generation(), 2);

        let device = fx.devices.device().unwrap().id;
        assert_eq!(fx.pool.device_id(), device);
        assert_eq!(fx.surface.lock().device_id(), device);
    }

    #[test]
    fn test_frame_released_before_rebuild() {
        let mut fx = Fixture::new(ContentSize::new(800, 600));
        fx.pool.queue_frame(ContentSize::new(640, 480));

        fx.process().unwrap();

        let events = fx.backend.gpu().events();
        let released = events
            .iter()
            .position(|e| matches!(e, GpuEvent::FrameReleased { .. }))
            .unwrap();
        let rebuilt = events
            .iter()
            .position(|e| matches!(e, GpuEvent::PoolRecreated { .. }))
            .unwrap();
        assert!(released < rebuilt);
    }

    #[test]
    fn test_conversion_error_propagates() {
        let size = ContentSize::new(800, 600);
        let mut fx = Fixture::new(size);
        fx.backend.gpu().fail_images(1);
        fx.pool.queue_frame(size);

        let err = fx.process().unwrap_err();

        assert!(matches!(err, CaptureError::FrameConversion(_)));
        assert_eq!(fx.surface.lock().presents(), 0);
        assert_eq!(fx.counters.snapshot().frames_dropped, 1);
    }

    #[test]
    fn test_unreadable_frame_keeps_pool() {
        let size = ContentSize::new(800, 600);
        let mut fx = Fixture::new(size);
        fx.backend.gpu().fail_frame_reads(1);
        fx.pool.queue_frame(ContentSize::new(1024, 768));

        let err = fx.process().unwrap_err();

        assert!(matches!(err, CaptureError::FrameConversion(_)));
        assert_eq!(fx.pool.recreations(), 0);
        assert_eq!(fx.processor.last_size(), size);
        assert_eq!(fx.counters.snapshot().size_changes, 0);
        assert!(fx
            .backend
            .gpu()
            .events()
            .iter()
            .any(|e| matches!(e, GpuEvent::FrameReleased { .. })));
    }
}
