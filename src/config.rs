//! TOML configuration.
//!
//! ```toml
//! [camera]
//! device_index = 0
//! width = 640
//! height = 480
//! facing = "front"
//! policy = "release_on_stop"
//!
//! [clock]
//! tick_ms = 1000
//!
//! [analysis]
//! step_percent = 10
//! cadence_ms = 200
//!
//! [session]
//! default_test = "situps"
//! auto_stop_at_duration = false
//! ```
//!
//! Every key is optional; missing keys take the defaults shown.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::TestId;
use crate::session::CameraPolicy;
use crate::traits::{Facing, StreamRequest};

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The TOML did not parse.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Camera settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// V4L2 device index (`/dev/videoN`).
    pub device_index: u32,
    /// Requested frame width.
    pub width: u32,
    /// Requested frame height.
    pub height: u32,
    /// Requested camera direction.
    pub facing: Facing,
    /// Whether the camera is kept through analysis.
    pub policy: CameraPolicy,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 640,
            height: 480,
            facing: Facing::Front,
            policy: CameraPolicy::default(),
        }
    }
}

impl CameraConfig {
    /// Video-only stream request for these settings.
    pub const fn stream_request(&self) -> StreamRequest {
        StreamRequest::video_only(self.facing, self.width, self.height)
    }
}

/// Recording clock settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Milliseconds per tick.
    pub tick_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self { tick_ms: 1000 }
    }
}

/// Simulated analysis settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Progress added per step.
    pub step_percent: u8,
    /// Milliseconds between steps.
    pub cadence_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            step_percent: 10,
            cadence_ms: 200,
        }
    }
}

/// Session behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Test selected when a session starts.
    pub default_test: TestId,
    /// Stop recording automatically at the test's expected duration.
    pub auto_stop_at_duration: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepcamConfig {
    /// Camera settings.
    pub camera: CameraConfig,
    /// Clock settings.
    pub clock: ClockConfig,
    /// Analysis settings.
    pub analysis: AnalysisConfig,
    /// Session behaviour.
    pub session: SessionSettings,
}

impl RepcamConfig {
    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the session cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clock.tick_ms == 0 {
            return Err(ConfigError::Invalid("clock.tick_ms must be positive".to_owned()));
        }
        if self.analysis.cadence_ms == 0 {
            return Err(ConfigError::Invalid("analysis.cadence_ms must be positive".to_owned()));
        }
        if !(1..=100).contains(&self.analysis.step_percent) {
            return Err(ConfigError::Invalid(format!(
                "analysis.step_percent must be within 1..=100, got {}",
                self.analysis.step_percent
            )));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "camera size must be non-zero, got {}x{}",
                self.camera.width, self.camera.height
            )));
        }
        Ok(())
    }

    /// Clock tick period.
    pub const fn tick_period(&self) -> Duration {
        Duration::from_millis(self.clock.tick_ms)
    }

    /// Simulated analysis cadence.
    pub const fn analysis_cadence(&self) -> Duration {
        Duration::from_millis(self.analysis.cadence_ms)
    }
}
