//! Capture device manager: owns the one camera stream a session may hold.
//!
//! Acquisition is asynchronous and cancellable. A stream that arrives after its
//! acquisition was cancelled is closed on the spot, and [`CaptureHandle`] closes
//! its stream when dropped, so no exit path can leak the camera.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::traits::{CameraBackend, CaptureStream, DeviceCapabilities, Frame, Result, StreamRequest};

/// Ownership of an acquired camera stream.
pub struct CaptureHandle {
    id: u64,
    stream: Box<dyn CaptureStream>,
    closed: bool,
}

impl CaptureHandle {
    fn new(id: u64, stream: Box<dyn CaptureStream>) -> Self {
        Self {
            id,
            stream,
            closed: false,
        }
    }

    /// Capabilities of the underlying device.
    pub fn capabilities(&self) -> &DeviceCapabilities {
        self.stream.capabilities()
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stream.close();
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("id", &self.id)
            .field("card", &self.stream.capabilities().card)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Acquires and releases the session's camera stream.
pub struct CaptureDeviceManager {
    backend: Arc<dyn CameraBackend>,
    request: StreamRequest,
    handle: Option<CaptureHandle>,
    pending: Option<CancellationToken>,
    next_id: u64,
    releases: u64,
}

impl CaptureDeviceManager {
    /// Create a manager that opens streams from `backend` with `request`.
    pub fn new(backend: Arc<dyn CameraBackend>, request: StreamRequest) -> Self {
        Self {
            backend,
            request,
            handle: None,
            pending: None,
            next_id: 0,
            releases: 0,
        }
    }

    /// Start acquiring a stream.
    ///
    /// The returned future owns everything it needs, so it can be spawned. It yields
    /// `None` when the acquisition was cancelled through [`release`](Self::release)
    /// before the device answered. Any previous in-flight acquisition is cancelled.
    pub fn acquire(
        &mut self,
    ) -> impl Future<Output = Option<Result<CaptureHandle>>> + Send + 'static {
        if let Some(previous) = self.pending.take() {
            previous.cancel();
        }
        self.next_id += 1;
        let id = self.next_id;
        let token = CancellationToken::new();
        self.pending = Some(token.clone());

        let backend = Arc::clone(&self.backend);
        let request = self.request.clone();
        debug!(id, ?request.facing, request.width, request.height, "camera acquisition started");

        async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    debug!(id, "camera acquisition cancelled");
                    None
                }
                opened = backend.open(&request) => {
                    if token.is_cancelled() {
                        // Dropping the handle closes the late stream.
                        drop(opened.map(|stream| CaptureHandle::new(id, stream)));
                        debug!(id, "late camera stream closed");
                        return None;
                    }
                    Some(opened.map(|stream| CaptureHandle::new(id, stream)))
                }
            }
        }
    }

    /// Keep a handle produced by [`acquire`](Self::acquire). Replaces (and closes) any
    /// handle already held.
    pub fn attach(&mut self, handle: CaptureHandle) {
        self.pending = None;
        info!(id = handle.id, card = %handle.capabilities().card, "camera ready");
        if let Some(mut old) = self.handle.replace(handle) {
            old.close();
            self.releases += 1;
        }
    }

    /// Forget the in-flight acquisition after it reported a failure.
    pub fn acquisition_failed(&mut self) {
        self.pending = None;
    }

    /// Release the camera: cancel any in-flight acquisition and close the stream.
    ///
    /// Releasing when nothing is held is a no-op.
    pub fn release(&mut self) {
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
        if let Some(mut handle) = self.handle.take() {
            handle.close();
            self.releases += 1;
            info!(id = handle.id, "camera released");
        }
    }

    /// Whether a live stream is held.
    pub const fn camera_ready(&self) -> bool {
        self.handle.is_some()
    }

    /// Whether a stream is held or being acquired.
    pub const fn is_engaged(&self) -> bool {
        self.handle.is_some() || self.pending.is_some()
    }

    /// Pull the next frame for a display surface. `None` when no camera is held.
    pub fn next_frame(&mut self) -> Option<Result<Frame>> {
        self.handle.as_mut().map(|handle| handle.stream.next_frame())
    }

    /// Capabilities of the held device, if any.
    pub fn capabilities(&self) -> Option<&DeviceCapabilities> {
        self.handle.as_ref().map(CaptureHandle::capabilities)
    }

    /// How many held streams have been closed by this manager.
    pub const fn release_count(&self) -> u64 {
        self.releases
    }
}

impl Drop for CaptureDeviceManager {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCamera;
    use crate::traits::CameraError;
    use std::time::Duration;

    fn manager(camera: &MockCamera) -> CaptureDeviceManager {
        CaptureDeviceManager::new(Arc::new(camera.clone()), StreamRequest::default())
    }

    #[tokio::test]
    async fn test_acquire_and_attach() {
        let camera = MockCamera::new();
        let mut manager = manager(&camera);

        let handle = manager
            .acquire()
            .await
            .expect("not cancelled")
            .expect("acquire should succeed");
        assert!(manager.is_engaged());
        assert!(!manager.camera_ready());

        manager.attach(handle);
        assert!(manager.camera_ready());
        assert_eq!(camera.live_streams(), 1);
        let caps = manager.capabilities().expect("camera held");
        assert_eq!(caps.driver, "mock");
        assert!(caps.can_capture && caps.can_stream);

        let frame = manager.next_frame().expect("camera held").expect("frame");
        assert!(!frame.data.is_empty());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let camera = MockCamera::new();
        let mut manager = manager(&camera);
        let handle = manager.acquire().await.expect("not cancelled").expect("ok");
        manager.attach(handle);

        manager.release();
        manager.release();
        assert_eq!(camera.closes(), 1);
        assert_eq!(manager.release_count(), 1);
        assert!(!manager.is_engaged());
    }

    #[test]
    fn test_release_without_acquire_is_noop() {
        let camera = MockCamera::new();
        let mut manager = manager(&camera);
        manager.release();
        assert_eq!(camera.closes(), 0);
        assert_eq!(manager.release_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_reported_not_raised() {
        let camera = MockCamera::new();
        camera.deny_next(CameraError::PermissionDenied("user said no".to_owned()));
        let mut manager = manager(&camera);

        let outcome = manager.acquire().await.expect("not cancelled");
        assert!(matches!(outcome, Err(CameraError::PermissionDenied(_))));
        manager.acquisition_failed();
        assert!(!manager.is_engaged());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_cancels_pending_acquisition() {
        let camera = MockCamera::new().with_delay(Duration::from_secs(1));
        let mut manager = manager(&camera);

        let pending = tokio::spawn(manager.acquire());
        tokio::task::yield_now().await;
        manager.release();

        let outcome = pending.await.expect("task");
        assert!(outcome.is_none());
        assert_eq!(camera.live_streams(), 0);
    }

    #[tokio::test]
    async fn test_dropping_handle_closes_stream() {
        let camera = MockCamera::new();
        let mut manager = manager(&camera);
        let handle = manager.acquire().await.expect("not cancelled").expect("ok");
        assert_eq!(camera.live_streams(), 1);
        drop(handle);
        assert_eq!(camera.live_streams(), 0);
        assert_eq!(camera.closes(), 1);
    }
}
