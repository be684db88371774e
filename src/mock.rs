//! Mock camera backend for running sessions without hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::traits::{
    CameraBackend, CameraError, CaptureStream, DeviceCapabilities, Frame, FrameMetadata, Result,
    StreamRequest,
};

#[derive(Default)]
struct MockState {
    script: Mutex<VecDeque<CameraError>>,
    delay_ms: AtomicU64,
    opens: AtomicUsize,
    closes: AtomicUsize,
    live: AtomicUsize,
    last_request: Mutex<Option<StreamRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Camera that grants every request unless told to fail the next ones.
///
/// Clones share state, so a test can keep one clone for inspection while the
/// session owns another.
#[derive(Clone, Default)]
pub struct MockCamera {
    state: Arc<MockState>,
}

impl MockCamera {
    /// A camera that always grants, immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `open` by `delay`.
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        self.set_delay(delay);
        self
    }

    /// Change the open delay.
    pub fn set_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.state.delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Fail the next `open` with `error`. Calls queue up in order.
    pub fn deny_next(&self, error: CameraError) {
        lock(&self.state.script).push_back(error);
    }

    /// Number of `open` calls that reached the device.
    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Number of streams closed.
    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Streams currently open.
    pub fn live_streams(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    /// The most recent request.
    pub fn last_request(&self) -> Option<StreamRequest> {
        lock(&self.state.last_request).clone()
    }
}

#[async_trait]
impl CameraBackend for MockCamera {
    async fn open(&self, request: &StreamRequest) -> Result<Box<dyn CaptureStream>> {
        let delay = self.state.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.state.opens.fetch_add(1, Ordering::SeqCst);
        *lock(&self.state.last_request) = Some(request.clone());
        if let Some(error) = lock(&self.state.script).pop_front() {
            return Err(error);
        }

        self.state.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStream {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            width: request.width,
            height: request.height,
            frame_count: 0,
            closed: false,
            state: Arc::clone(&self.state),
        }))
    }
}

/// Stream handed out by [`MockCamera`]; produces color-bar frames.
pub struct MockStream {
    capabilities: DeviceCapabilities,
    width: u32,
    height: u32,
    frame_count: u32,
    closed: bool,
    state: Arc<MockState>,
}

impl CaptureStream for MockStream {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if self.closed {
            return Err(CameraError::DeviceUnavailable("stream closed".to_owned()));
        }
        let data = color_bars(self.width, self.height);
        let seq = self.frame_count;
        self.frame_count += 1;

        #[allow(clippy::cast_possible_truncation)]
        let bytes_used = data.len() as u32;
        Ok(Frame {
            data,
            metadata: FrameMetadata {
                sequence: seq,
                timestamp: Duration::from_millis(u64::from(seq) * 33), // ~30fps
                bytes_used,
            },
        })
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.closes.fetch_add(1, Ordering::SeqCst);
            self.state.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Bytes in a YUYV frame, or `None` if it does not fit in memory.
fn yuyv_len(width: u32, height: u32) -> Option<usize> {
    usize::try_from(width)
        .ok()?
        .checked_mul(usize::try_from(height).ok()?)?
        .checked_mul(2)
}

/// YUYV color bars: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black.
fn color_bars(width: u32, height: u32) -> Vec<u8> {
    const BARS: [(u8, u8, u8); 8] = [
        (235, 128, 128),
        (210, 16, 146),
        (170, 166, 16),
        (145, 54, 34),
        (106, 202, 222),
        (81, 90, 240),
        (41, 240, 110),
        (16, 128, 128),
    ];

    let bar_width = (width / 8).max(1);
    let mut data = Vec::with_capacity(yuyv_len(width, height).unwrap_or(0));
    for _ in 0..height {
        for x in (0..width).step_by(2) {
            let (y, u, v) = BARS[((x / bar_width).min(7)) as usize];
            data.extend_from_slice(&[y, u, y, v]);
        }
    }
    data
}
