//! Integration tests using the vivid virtual camera.
//!
//! These tests require:
//! - The `integration` feature flag: `cargo test --features integration`
//! - The vivid kernel module loaded (`modprobe vivid`)
//! - Access to /dev/video* devices (may require video group membership)
//!
//! Tests fail, rather than skip, when vivid is missing.

#![cfg(feature = "integration")]

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use repcam::capture::CaptureDeviceManager;
use repcam::{
    CameraBackend, Command, Facing, RepcamConfig, SessionDriver, SessionState, SimulatedPipeline,
    StreamRequest, TestId, V4L2Camera,
};
use serial_test::serial;

/// Indices of vivid devices, found through sysfs so real cameras are never opened.
fn find_vivid_devices() -> Vec<u32> {
    let video4linux = Path::new("/sys/class/video4linux");
    if !video4linux.exists() {
        return Vec::new();
    }

    (0..10)
        .filter(|index| {
            let name_path = video4linux.join(format!("video{index}")).join("name");
            fs::read_to_string(name_path)
                .map(|name| name.to_lowercase().contains("vivid"))
                .unwrap_or(false)
        })
        .collect()
}

macro_rules! require_vivid {
    () => {
        match find_vivid_devices().first().copied() {
            Some(idx) => idx,
            None => panic!(
                "vivid virtual camera not available.\n\
                 Load vivid with: sudo modprobe vivid\n\
                 Or run unit tests only: cargo test --lib"
            ),
        }
    };
}

fn vga() -> StreamRequest {
    StreamRequest::video_only(Facing::Front, 640, 480)
}

#[tokio::test]
#[serial]
async fn test_vivid_backend_opens_stream() {
    let index = require_vivid!();

    let mut stream = V4L2Camera::new(index)
        .open(&vga())
        .await
        .expect("open vivid");
    let caps = stream.capabilities().clone();
    assert!(caps.driver.contains("vivid"), "expected vivid driver");
    assert!(caps.can_capture);
    assert!(caps.can_stream);

    let frame = stream.next_frame().expect("frame");
    assert!(
        frame.data.len() >= 640 * 480 * 2,
        "frame too small: {}",
        frame.data.len()
    );
    assert!(frame.metadata.bytes_used > 0);

    stream.close();
    assert!(stream.next_frame().is_err(), "closed stream yields no frames");
}

#[tokio::test]
#[serial]
async fn test_vivid_frame_sequence_advances() {
    let index = require_vivid!();

    let mut stream = V4L2Camera::new(index)
        .open(&vga())
        .await
        .expect("open vivid");

    let mut previous = None;
    for _ in 0..10 {
        let frame = stream.next_frame().expect("frame");
        if let Some(prev) = previous {
            assert!(
                frame.metadata.sequence > prev,
                "sequence went from {prev} to {}",
                frame.metadata.sequence
            );
        }
        previous = Some(frame.metadata.sequence);
    }
}

#[tokio::test]
#[serial]
async fn test_vivid_release_allows_reacquire() {
    let index = require_vivid!();
    let mut manager = CaptureDeviceManager::new(Arc::new(V4L2Camera::new(index)), vga());

    for _ in 0..2 {
        let handle = manager
            .acquire()
            .await
            .expect("not cancelled")
            .expect("acquire vivid");
        manager.attach(handle);
        assert!(manager.camera_ready());
        assert!(manager
            .capabilities()
            .is_some_and(|caps| caps.driver.contains("vivid")));
        assert!(manager.next_frame().expect("held").is_ok());

        manager.release();
        assert!(!manager.camera_ready());
        assert!(manager.next_frame().is_none());
    }
    assert_eq!(manager.release_count(), 2);
}

#[tokio::test]
#[serial]
async fn test_vivid_session_records_and_analyses() {
    let index = require_vivid!();

    let mut config = RepcamConfig::default();
    config.clock.tick_ms = 100;
    config.analysis.cadence_ms = 10;
    let pipeline = Arc::new(SimulatedPipeline::new(25, config.analysis_cadence()));
    let mut session = SessionDriver::spawn(&config, Arc::new(V4L2Camera::new(index)), pipeline);

    session
        .send(Command::SelectTest(TestId::ShuttleRun))
        .await
        .expect("select");
    session.send(Command::RequestCamera).await.expect("request");
    let ready = tokio::time::timeout(
        Duration::from_secs(5),
        session.wait_for_state(SessionState::Ready),
    )
    .await
    .expect("camera within 5s")
    .expect("driver alive");
    assert!(ready.camera_live);

    session.send(Command::Start).await.expect("start");
    session
        .wait_for(|s| s.elapsed_seconds >= Some(3))
        .await
        .expect("ticks");
    session.send(Command::Stop).await.expect("stop");
    assert!(!session.snapshot().camera_live, "camera released on stop");

    let record = tokio::time::timeout(Duration::from_secs(5), session.next_result())
        .await
        .expect("result within 5s")
        .expect("result");
    assert_eq!(record.test_id(), TestId::ShuttleRun);
    assert!(record.recorded_seconds() >= 3);

    session.shutdown().await;
}
