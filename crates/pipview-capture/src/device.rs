//! Ownership of the single live GPU device.

use tracing::{debug, info, instrument};

use crate::backend::CaptureBackend;
use crate::error::CaptureError;
use crate::CaptureResult;

/// Holds the pipeline's device. Empty only between a loss and the next
/// successful [`recreate`](Self::recreate).
pub struct DeviceContext<B: CaptureBackend> {
    device: Option<B::Device>,
    generation: u64,
}

impl<B: CaptureBackend> DeviceContext<B> {
    /// Create the first device.
    #[instrument(name = "device_create", skip_all)]
    pub fn create(backend: &B) -> CaptureResult<Self> {
        let device = backend.create_device()?;
        info!("Created GPU device");
        Ok(Self {
            device: Some(device),
            generation: 1,
        })
    }

    /// The live device, or `DeviceLost` when it was invalidated.
    pub fn device(&self) -> CaptureResult<&B::Device> {
        self.device.as_ref().ok_or(CaptureError::DeviceLost)
    }

    /// Returns true if a device is present.
    pub fn is_valid(&self) -> bool {
        self.device.is_some()
    }

    /// Drop the current device and create a new one.
    ///
    /// On failure the context stays empty.
    pub fn recreate(&mut self, backend: &B) -> CaptureResult<&B::Device> {
        self.device = None;
        let device = backend.create_device()?;
        self.generation += 1;
        debug!(generation = self.generation, "Recreated GPU device");
        Ok(self.device.insert(device))
    }

    /// Forget the current device after it was reported lost.
    pub fn invalidate(&mut self) {
        if self.device.take().is_some() {
            debug!(generation = self.generation, "Invalidated GPU device");
        }
    }

    /// Number of devices created so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
