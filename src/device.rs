//! V4L2 camera backend using the v4l crate.

use async_trait::async_trait;
use tracing::{debug, info};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream as V4lCaptureStream;
use v4l::video::Capture;
use v4l::Device;

use crate::traits::{
    CameraBackend, CameraError, CaptureStream, DeviceCapabilities, Facing, Frame, FrameMetadata,
    Result, StreamRequest,
};
use std::time::Duration;

const BUFFER_COUNT: u32 = 4;

/// Camera backend for `/dev/videoN`.
#[derive(Debug, Clone, Copy)]
pub struct V4L2Camera {
    index: u32,
}

impl V4L2Camera {
    /// Backend for device `index` (e.g., 0 for /dev/video0).
    pub const fn new(index: u32) -> Self {
        Self { index }
    }
}

#[async_trait]
impl CameraBackend for V4L2Camera {
    async fn open(&self, request: &StreamRequest) -> Result<Box<dyn CaptureStream>> {
        let index = self.index;
        let request = request.clone();
        let stream = tokio::task::spawn_blocking(move || V4L2Stream::open(index, &request))
            .await
            .map_err(|err| CameraError::StreamSetupFailed(err.to_string()))??;
        Ok(Box::new(stream))
    }
}

/// V4L2 capture stream wrapping mmap-based streaming.
///
/// Field order matters: the stream is dropped before the device.
pub struct V4L2Stream {
    stream: Option<Stream<'static>>,
    device: Option<Device>,
    capabilities: DeviceCapabilities,
}

impl V4L2Stream {
    /// Open device `index`, set the requested format and start streaming.
    pub fn open(index: u32, request: &StreamRequest) -> Result<Self> {
        let device = Device::new(index as usize)?;
        let caps = device.query_caps()?;

        let capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        };
        if !capabilities.can_capture || !capabilities.can_stream {
            return Err(CameraError::DeviceUnavailable(format!(
                "{} cannot stream video",
                capabilities.card
            )));
        }
        if request.facing == Facing::Back {
            debug!(index, "V4L2 has no facing information; using the device as is");
        }

        let mut fmt = device
            .format()
            .map_err(|err| CameraError::StreamSetupFailed(err.to_string()))?;
        fmt.width = request.width;
        fmt.height = request.height;
        fmt.fourcc = v4l::FourCC::new(b"YUYV");
        let fmt = device
            .set_format(&fmt)
            .map_err(|err| CameraError::StreamSetupFailed(err.to_string()))?;

        let stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|err| CameraError::StreamSetupFailed(err.to_string()))?;

        info!(
            index,
            card = %capabilities.card,
            width = fmt.width,
            height = fmt.height,
            "V4L2 stream open"
        );
        Ok(Self {
            stream: Some(stream),
            device: Some(device),
            capabilities,
        })
    }
}

impl CaptureStream for V4L2Stream {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CameraError::DeviceUnavailable("stream closed".to_owned()))?;
        let (buf, meta) = stream
            .next()
            .map_err(|err| CameraError::StreamSetupFailed(err.to_string()))?;

        // Safe conversions: V4L2 timestamps are always non-negative in practice
        #[allow(clippy::cast_sign_loss)]
        let secs = meta.timestamp.sec.max(0) as u64;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let nanos = (meta.timestamp.usec.max(0) as u32).saturating_mul(1000);

        Ok(Frame {
            data: buf.to_vec(),
            metadata: FrameMetadata {
                sequence: meta.sequence,
                timestamp: Duration::new(secs, nanos),
                bytes_used: meta.bytesused,
            },
        })
    }

    fn close(&mut self) {
        // Streaming stops when the mmap stream drops; the fd closes with the device.
        drop(self.stream.take());
        if self.device.take().is_some() {
            debug!(card = %self.capabilities.card, "V4L2 device closed");
        }
    }
}
