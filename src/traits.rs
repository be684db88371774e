//! Core traits and types for the camera and analysis seams.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::{AnalysisEvent, RecordingRef};

/// `EBUSY` on Linux; `ErrorKind::ResourceBusy` is too recent to rely on.
const EBUSY: i32 = 16;

/// Which way the requested camera faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    /// Towards the athlete (selfie camera).
    #[default]
    Front,
    /// Away from the athlete.
    Back,
}

/// Stream parameters handed to a [`CameraBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// Requested camera direction.
    pub facing: Facing,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Whether an audio track is wanted. Always `false` for fitness capture.
    pub audio: bool,
}

impl StreamRequest {
    /// A video-only request for the given camera direction and size.
    #[must_use]
    pub const fn video_only(facing: Facing, width: u32, height: u32) -> Self {
        Self {
            facing,
            width,
            height,
            audio: false,
        }
    }
}

impl Default for StreamRequest {
    fn default() -> Self {
        Self::video_only(Facing::Front, 640, 480)
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Metadata for a captured frame.
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
}

/// A live video frame, ready to be attached to a display surface.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw frame data (YUYV).
    pub data: Vec<u8>,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

/// Why a camera stream could not be acquired or used.
///
/// Always recoverable: the session moves to `CameraDenied` and offers a retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    /// The user or the OS refused camera access.
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    /// No camera, or the camera is held by someone else.
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    /// The device opened but a stream could not be configured.
    #[error("camera stream setup failed: {0}")]
    StreamSetupFailed(String),
}

impl From<std::io::Error> for CameraError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(err.to_string()),
            std::io::ErrorKind::NotFound => Self::DeviceUnavailable(err.to_string()),
            _ if err.raw_os_error() == Some(EBUSY) => Self::DeviceUnavailable(err.to_string()),
            _ => Self::StreamSetupFailed(err.to_string()),
        }
    }
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Something that can hand out live camera streams.
#[async_trait]
pub trait CameraBackend: Send + Sync {
    /// Open a stream matching `request`.
    ///
    /// Awaits OS permission and stream setup. Failures are returned, never raised.
    async fn open(&self, request: &StreamRequest) -> Result<Box<dyn CaptureStream>>;
}

/// An open camera stream.
pub trait CaptureStream: Send {
    /// Capabilities of the device backing this stream.
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Capture the next frame from the stream.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Stop streaming and give the device back. Calling it again does nothing.
    fn close(&mut self);
}

/// Turns a finished recording into progress events and one result.
///
/// Implementations must yield non-decreasing progress ending at 100, followed by
/// exactly one [`AnalysisEvent::Complete`]. Callers rely on nothing else, so timing
/// and step size are free.
pub trait AnalysisPipeline: Send + Sync {
    /// Start analysing `recording`. The returned stream is lazy.
    fn analyze(&self, recording: RecordingRef) -> BoxStream<'static, AnalysisEvent>;
}
