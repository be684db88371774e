//! Repcam: camera-recorded fitness test sessions
//!
//! This library runs one athlete's attempt at a fitness test: it acquires the
//! camera, times the recording, hands the recording to an analysis pipeline and
//! publishes the result. Camera access and analysis sit behind traits, so
//! sessions run the same against a real V4L2 device, the mock camera, or a
//! different analysis engine.

pub mod analysis;
pub mod capture;
pub mod catalog;
pub mod clock;
pub mod config;
#[cfg(feature = "v4l2")]
pub mod device;
pub mod driver;
pub mod error;
pub mod mock;
pub mod session;
pub mod traits;
pub mod validation;

pub use analysis::{AnalysisEvent, AnalysisProgress, RecordingRef, SimulatedPipeline};
pub use catalog::{Measurement, ResultRecord, TestDefinition, TestId};
pub use config::RepcamConfig;
#[cfg(feature = "v4l2")]
pub use device::V4L2Camera;
pub use driver::{SessionDriver, SessionHandle};
pub use error::{Rejection, SessionError};
pub use mock::MockCamera;
pub use session::{CameraPolicy, Command, SessionSnapshot, SessionState, TestSession};
pub use traits::{
    AnalysisPipeline, CameraBackend, CameraError, CaptureStream, DeviceCapabilities, Facing, Frame,
    FrameMetadata, StreamRequest,
};
