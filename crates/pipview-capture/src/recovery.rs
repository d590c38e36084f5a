//! Rebuilding the device and frame pool after loss or resize.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use pipview_ipc::{ContentSize, RecoveryConfig};
use tracing::{debug, info, instrument, warn};

use crate::backend::CaptureBackend;
use crate::device::DeviceContext;
use crate::error::CaptureError;
use crate::frame::{PixelFormat, FRAME_POOL_CAPACITY};
use crate::frame_pool::FramePool;
use crate::CaptureResult;

/// Default attempts before the recovery loop gives up.
pub const MAX_RECOVERY_ATTEMPTS: u32 = 10;

/// Base delay between recovery attempts in milliseconds.
pub const BASE_RECOVERY_DELAY_MS: u64 = 5;

/// Retry policy for the recovery loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPolicy {
    /// Maximum number of attempts. `None` retries until a device is obtained.
    pub max_attempts: Option<u32>,

    /// Delay after the first failed attempt (exponential backoff applied).
    pub base_delay: Duration,

    /// Maximum delay between attempts.
    pub max_delay: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(MAX_RECOVERY_ATTEMPTS),
            base_delay: Duration::from_millis(BASE_RECOVERY_DELAY_MS),
            max_delay: Duration::from_millis(250),
        }
    }
}

impl From<&RecoveryConfig> for RecoveryPolicy {
    fn from(config: &RecoveryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RecoveryPolicy {
    /// Retry without delay until a device is obtained.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Retry without delay at most `max_attempts` times.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Calculate delay after a given failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(multiplier);
        delay.min(self.max_delay)
    }

    /// Check if more attempts are allowed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

/// Result of a successful recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Attempts made, including the successful one.
    pub attempts: u32,

    /// Whether at least one new device was created.
    pub device_recreated: bool,

    /// Size the pool was rebuilt at.
    pub size: ContentSize,
}

/// Rebind `pool` at `target_size`, recreating the device when needed.
///
/// Returns only with a live device bound to the pool. A device lost while
/// recreating the pool is dropped and replaced on the next attempt. Setting
/// `cancel` aborts with [`CaptureError::Cancelled`].
#[instrument(name = "recover", skip_all, fields(size = %target_size, recreate_device))]
pub fn recover<B: CaptureBackend>(
    backend: &B,
    devices: &mut DeviceContext<B>,
    pool: &B::Pool,
    format: PixelFormat,
    target_size: ContentSize,
    mut recreate_device: bool,
    policy: &RecoveryPolicy,
    cancel: &AtomicBool,
) -> CaptureResult<RecoveryReport> {
    let start_generation = devices.generation();
    let mut attempts = 0;

    if !devices.is_valid() {
        recreate_device = true;
    }

    loop {
        if cancel.load(Ordering::SeqCst) {
            debug!(attempts, "Recovery cancelled");
            return Err(CaptureError::Cancelled);
        }

        attempts += 1;

        let last_error = match rebuild(backend, devices, pool, format, target_size, recreate_device)
        {
            Ok(()) => {
                let report = RecoveryReport {
                    attempts,
                    device_recreated: devices.generation() != start_generation,
                    size: target_size,
                };
                info!(
                    attempts,
                    device_recreated = report.device_recreated,
                    "Frame pool rebuilt"
                );
                return Ok(report);
            }
            Err(e) if e.is_device_lost() => {
                warn!(attempt = attempts, "Device lost while rebuilding frame pool");
                devices.invalidate();
                recreate_device = true;
                e
            }
            Err(e @ CaptureError::DeviceCreation(_)) => {
                warn!(attempt = attempts, "Device creation failed: {}", e);
                recreate_device = true;
                e
            }
            Err(e) => return Err(e),
        };

        if !policy.should_retry(attempts) {
            return Err(CaptureError::RecoveryExhausted {
                attempts,
                last_error: last_error.to_string(),
            });
        }

        let delay = policy.delay_for_attempt(attempts);
        if !delay.is_zero() {
            debug!(?delay, "Retrying recovery");
            thread::sleep(delay);
        }
    }
}

fn rebuild<B: CaptureBackend>(
    backend: &B,
    devices: &mut DeviceContext<B>,
    pool: &B::Pool,
    format: PixelFormat,
    size: ContentSize,
    recreate_device: bool,
) -> CaptureResult<()> {
    let device = if recreate_device {
        devices.recreate(backend)?
    } else {
        devices.device()?
    };
    pool.recreate(device, format, FRAME_POOL_CAPACITY, size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CaptureBackend;
    use crate::testing::{GpuEvent, MockBackend};

    fn setup() -> (MockBackend, DeviceContext<MockBackend>, <MockBackend as CaptureBackend>::Pool) {
        let backend = MockBackend::new();
        let devices = DeviceContext::create(&backend).unwrap();
        let pool = backend
            .create_frame_pool(
                devices.device().unwrap(),
                PixelFormat::Bgra8UNorm,
                FRAME_POOL_CAPACITY,
                ContentSize::new(800, 600),
            )
            .unwrap();
        (backend, devices, pool)
    }

    #[test]
    fn test_policy_delays() {
        let policy = RecoveryPolicy {
            max_attempts: Some(5),
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(30),
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(30));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(30));
    }

    #[test]
    fn test_policy_should_retry() {
        let policy = RecoveryPolicy::immediate(3);
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(RecoveryPolicy::unbounded().should_retry(u32::MAX));
    }

    #[test]
    fn test_resize_keeps_device() {
        let (backend, mut devices, pool) = setup();
        let cancel = AtomicBool::new(false);

        let report = recover(
            &backend,
            &mut devices,
            &pool,
            PixelFormat::Bgra8UNorm,
            ContentSize::new(1024, 768),
            false,
            &RecoveryPolicy::immediate(3),
            &cancel,
        )
        .unwrap();

        assert_eq!(report.attempts, 1);
        assert!(!report.device_recreated);
        assert_eq!(devices.generation(), 1);
        assert_eq!(pool.size(), ContentSize::new(1024, 768));
    }

    #[test]
    fn test_converges_after_device_losses() {
        let (backend, mut devices, pool) = setup();
        let gpu = backend.gpu();
        gpu.lose_pool_recreates(3);
        let cancel = AtomicBool::new(false);

        let report = recover(
            &backend,
            &mut devices,
            &pool,
            PixelFormat::Bgra8UNorm,
            ContentSize::new(800, 600),
            true,
            &RecoveryPolicy::unbounded(),
            &cancel,
        )
        .unwrap();

        assert_eq!(report.attempts, 4);
        assert!(report.device_recreated);
        let device = devices.device().unwrap();
        assert_eq!(pool.device_id(), device.id);
        assert_eq!(gpu.devices_created(), 5);
    }

    #[test]
    fn test_device_creation_failures_retried() {
        let (backend, mut devices, pool) = setup();
        let gpu = backend.gpu();
        gpu.fail_device_creations(2);
        let cancel = AtomicBool::new(false);

        let report = recover(
            &backend,
            &mut devices,
            &pool,
            PixelFormat::Bgra8UNorm,
            ContentSize::new(800, 600),
            true,
            &RecoveryPolicy::immediate(5),
            &cancel,
        )
        .unwrap();

        assert_eq!(report.attempts, 3);
        assert!(devices.is_valid());
        assert!(gpu
            .events()
            .iter()
            .any(|e| matches!(e, GpuEvent::DeviceCreationFailed)));
    }

    #[test]
    fn test_bounded_policy_gives_up() {
        let (backend, mut devices, pool) = setup();
        backend.gpu().lose_pool_recreates(10);
        let cancel = AtomicBool::new(false);

        let err = recover(
            &backend,
            &mut devices,
            &pool,
            PixelFormat::Bgra8UNorm,
            ContentSize::new(800, 600),
            false,
            &RecoveryPolicy::immediate(3),
            &cancel,
        )
        .unwrap_err();

        assert!(matches!(err, CaptureError::RecoveryExhausted { attempts: 3, .. }));
        assert!(!devices.is_valid());
    }

    #[test]
    fn test_cancel_aborts() {
        let (backend, mut devices, pool) = setup();
        let cancel = AtomicBool::new(true);

        let err = recover(
            &backend,
            &mut devices,
            &pool,
            PixelFormat::Bgra8UNorm,
            ContentSize::new(800, 600),
            false,
            &RecoveryPolicy::unbounded(),
            &cancel,
        )
        .unwrap_err();

        assert!(matches!(err, CaptureError::Cancelled));
    }
}
