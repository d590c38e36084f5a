//! Borderless capture permission.

use tracing::debug;
use windows::Graphics::Capture::{GraphicsCaptureAccess, GraphicsCaptureAccessKind};
use windows::Security::Authorization::AppCapabilityAccess::AppCapabilityAccessStatus;

use crate::error::CaptureError;
use crate::source::CaptureAccess;
use crate::CaptureResult;

/// Asks the system whether the capture border may be hidden.
#[derive(Debug, Default, Clone, Copy)]
pub struct BorderlessAccess;

impl CaptureAccess for BorderlessAccess {
    fn request_borderless(&self) -> CaptureResult<bool> {
        let status =
            GraphicsCaptureAccess::RequestAccessAsync(GraphicsCaptureAccessKind::Borderless)?
                .get()?;
        debug!(?status, "Borderless access status");
        match status {
            AppCapabilityAccessStatus::Allowed => Ok(true),
            AppCapabilityAccessStatus::DeniedByUser
            | AppCapabilityAccessStatus::DeniedBySystem => Err(CaptureError::PermissionDenied),
            _ => Ok(false),
        }
    }
}
