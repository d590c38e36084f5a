//! Viewer configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for [`ViewerConfig`].
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level viewer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Capture session options.
    pub capture: CaptureConfig,

    /// Device recovery policy.
    pub recovery: RecoveryConfig,

    /// Drawing surface setup.
    pub surface: SurfaceConfig,

    /// Interval between metrics reports in milliseconds.
    pub metrics_interval_ms: u64,
}

impl ViewerConfig {
    /// Parse a configuration from JSON. Missing fields use defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            recovery: RecoveryConfig::default(),
            surface: SurfaceConfig::default(),
            metrics_interval_ms: 1000,
        }
    }
}

/// Options applied to each capture session before it starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Draw the mouse cursor into captured frames.
    pub cursor_visible: bool,

    /// Suppress the capture border when the system grants it.
    pub hide_border: bool,

    /// Put the viewer window into always-on-top overlay mode.
    pub enter_overlay: bool,

    /// Window title (substring) the picker selects. `None` cancels picking.
    pub target_window: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            cursor_visible: false,
            hide_border: true,
            enter_overlay: true,
            target_window: None,
        }
    }
}

/// Retry policy for rebuilding the device and frame pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Attempts before giving up. `None` retries until a device is obtained.
    pub max_attempts: Option<u32>,

    /// Delay after the first failed attempt, doubled after each failure.
    pub base_delay_ms: u64,

    /// Upper bound for the delay between attempts.
    pub max_delay_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: Some(10),
            base_delay_ms: 5,
            max_delay_ms: 250,
        }
    }
}

/// Initial drawing surface geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Width before the first frame arrives.
    pub initial_width: i32,

    /// Height before the first frame arrives.
    pub initial_height: i32,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            initial_width: 400,
            initial_height: 400,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ViewerConfig::default();
        assert!(!config.capture.cursor_visible);
        assert!(config.capture.hide_border);
        assert_eq!(config.recovery.max_attempts, Some(10));
        assert_eq!(config.surface.initial_width, 400);
        assert_eq!(config.metrics_interval_ms, 1000);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ViewerConfig::from_json(
            r#"{ "capture": { "target_window": "Star Rail" }, "recovery": { "max_attempts": null } }"#,
        )
        .unwrap();

        assert_eq!(config.capture.target_window.as_deref(), Some("Star Rail"));
        assert!(config.capture.hide_border);
        assert_eq!(config.recovery.max_attempts, None);
        assert_eq!(config.recovery.max_delay_ms, 250);
        assert_eq!(config.metrics_interval_ms, 1000);
    }

    #[test]
    fn test_invalid_json_rejected() {
        let err = ViewerConfig::from_json("{ \"capture\": 5 }").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = ViewerConfig::load("/nonexistent/pipview.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
