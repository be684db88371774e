//! Test session state machine.
//!
//! [`TestSession`] owns the capture manager, the clock and the analysis run.
//! Commands from the presentation layer go through [`TestSession::handle`];
//! background work (camera acquisition, clock ticks, analysis events) reports
//! back as [`Notification`]s tagged with the attempt, generation or run that
//! produced them, and [`TestSession::handle_notification`] drops any that are
//! stale. One caller feeds both, one event at a time.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::analysis::{AnalysisEvent, AnalysisProgress, AnalysisRun, RecordingRef};
use crate::capture::{CaptureDeviceManager, CaptureHandle};
use crate::catalog::{format_elapsed, ResultRecord, TestId};
use crate::clock::SessionClock;
use crate::config::RepcamConfig;
use crate::error::{AbortReason, AnalysisAborted, Rejection, SessionError};
use crate::traits::{AnalysisPipeline, CameraBackend, CameraError, Frame};
use crate::validation::ProgressMonitor;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Nothing held, nothing running.
    Idle,
    /// Camera acquisition in flight.
    AwaitingCamera,
    /// The last acquisition failed; retry is possible.
    CameraDenied,
    /// Camera live, ready to record.
    Ready,
    /// Recording; the clock is running.
    Recording,
    /// Recording finished; analysis in progress.
    Analyzing,
    /// A result is available.
    Results,
}

impl SessionState {
    /// Whether the camera is held (or being acquired) in this state under `policy`.
    pub const fn holds_camera(self, policy: CameraPolicy) -> bool {
        match self {
            Self::AwaitingCamera | Self::Ready | Self::Recording => true,
            Self::Analyzing | Self::Results => matches!(policy, CameraPolicy::Retain),
            Self::Idle | Self::CameraDenied => false,
        }
    }
}

/// What happens to the camera when recording stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraPolicy {
    /// Release on stop; "record again" re-acquires.
    #[default]
    ReleaseOnStop,
    /// Keep the stream through analysis and results; "record again" goes straight to `Ready`.
    Retain,
}

/// Inbound events from the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Choose the test to record.
    SelectTest(TestId),
    /// Ask for the camera (first time or retry).
    RequestCamera,
    /// Start recording.
    Start,
    /// Stop recording and analyse.
    Stop,
    /// Dismiss the result and go again.
    RecordAgain,
    /// Leave the session; everything is released.
    NavigateAway,
}

/// Completions posted by background tasks.
#[derive(Debug)]
pub enum Notification {
    /// A camera acquisition finished.
    CameraAcquired {
        /// Which acquisition.
        attempt: u64,
        /// The handle or why there is none.
        outcome: Result<CaptureHandle, CameraError>,
    },
    /// The recording clock ticked.
    ClockTick {
        /// Clock generation that produced the tick.
        generation: u64,
    },
    /// The analysis pipeline produced something; `None` means it ended without a result.
    Analysis {
        /// Recording run being analysed.
        run: u64,
        /// The event.
        event: Option<AnalysisEvent>,
    },
}

/// Everything the presentation layer may observe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Current state.
    pub state: SessionState,
    /// Selected test.
    pub test: TestId,
    /// Whether live frames are available.
    pub camera_live: bool,
    /// Seconds recorded, while recording.
    pub elapsed_seconds: Option<u32>,
    /// Seconds left of the test's expected duration, while recording.
    pub remaining_seconds: Option<u32>,
    /// Analysis progress, while analysing.
    pub progress_percent: Option<u8>,
    /// The result, once available.
    pub result: Option<ResultRecord>,
    /// Why the camera was denied, in `CameraDenied`.
    pub camera_error: Option<String>,
}

impl SessionSnapshot {
    /// `m:ss` recording badge, while recording.
    pub fn recording_badge(&self) -> Option<String> {
        self.elapsed_seconds.map(format_elapsed)
    }
}

enum Stage {
    Idle,
    AwaitingCamera { attempt: u64 },
    CameraDenied { error: CameraError },
    Ready,
    Recording { run: u64 },
    Analyzing { analysis: AnalysisRun, monitor: ProgressMonitor },
    Results { record: ResultRecord },
}

/// One athlete's test session.
pub struct TestSession {
    stage: Stage,
    test: TestId,
    camera: CaptureDeviceManager,
    clock: SessionClock,
    pipeline: Arc<dyn AnalysisPipeline>,
    policy: CameraPolicy,
    auto_stop: bool,
    notify: mpsc::UnboundedSender<Notification>,
    attempts: u64,
    runs: u64,
}

impl TestSession {
    /// Build an idle session. Background tasks report through `notify`.
    pub fn new(
        config: &RepcamConfig,
        backend: Arc<dyn CameraBackend>,
        pipeline: Arc<dyn AnalysisPipeline>,
        notify: mpsc::UnboundedSender<Notification>,
    ) -> Self {
        Self {
            stage: Stage::Idle,
            test: config.session.default_test,
            camera: CaptureDeviceManager::new(backend, config.camera.stream_request()),
            clock: SessionClock::new(config.tick_period()),
            pipeline,
            policy: config.camera.policy,
            auto_stop: config.session.auto_stop_at_duration,
            notify,
            attempts: 0,
            runs: 0,
        }
    }

    /// Apply a presentation-layer command.
    ///
    /// Returns the resulting state, or the reason the command was refused; a
    /// refused command leaves the session untouched.
    pub fn handle(&mut self, command: Command) -> Result<SessionState, SessionError> {
        let from = self.state();
        let outcome = match command {
            Command::SelectTest(test) => self.select_test(test),
            Command::RequestCamera => self.request_camera(),
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::RecordAgain => self.record_again(),
            Command::NavigateAway => {
                self.teardown(AbortReason::NavigatedAway);
                Ok(())
            }
        };

        match outcome {
            Ok(()) => {
                let to = self.state();
                if to != from {
                    info!(?command, ?from, ?to, test = %self.test, "session transition");
                }
                Ok(to)
            }
            Err(reason) => {
                let err = SessionError::InvalidTransition {
                    state: from,
                    command,
                    reason,
                };
                warn!(%err, "command rejected");
                Err(err)
            }
        }
    }

    /// Apply a background completion. Stale notifications are dropped.
    pub fn handle_notification(&mut self, notification: Notification) -> SessionState {
        let from = self.state();
        match notification {
            Notification::CameraAcquired { attempt, outcome } => self.on_camera(attempt, outcome),
            Notification::ClockTick { generation } => self.on_tick(generation),
            Notification::Analysis { run, event } => self.on_analysis(run, event),
        }
        let to = self.state();
        if to != from {
            info!(?from, ?to, test = %self.test, "session transition");
        }
        to
    }

    fn select_test(&mut self, test: TestId) -> Result<(), Rejection> {
        match self.state() {
            SessionState::Recording | SessionState::Analyzing | SessionState::Results => {
                Err(Rejection::TestLocked)
            }
            _ => {
                self.test = test;
                debug!(%test, "test selected");
                Ok(())
            }
        }
    }

    fn request_camera(&mut self) -> Result<(), Rejection> {
        match self.stage {
            Stage::Idle | Stage::CameraDenied { .. } => {
                self.begin_acquire();
                Ok(())
            }
            Stage::AwaitingCamera { .. } => Err(Rejection::AlreadyAcquiring),
            _ => Err(Rejection::NotInState),
        }
    }

    fn start(&mut self) -> Result<(), Rejection> {
        match self.stage {
            Stage::Ready if self.camera.camera_ready() => {
                self.begin_recording();
                Ok(())
            }
            _ if !self.camera.camera_ready() => Err(Rejection::CameraUnavailable),
            _ => Err(Rejection::NotInState),
        }
    }

    fn stop(&mut self) -> Result<(), Rejection> {
        match self.stage {
            Stage::Recording { run } => {
                self.finish_recording(run);
                Ok(())
            }
            _ => Err(Rejection::NotRecording),
        }
    }

    fn record_again(&mut self) -> Result<(), Rejection> {
        match self.stage {
            Stage::Results { .. } => {
                if self.camera.camera_ready() {
                    self.stage = Stage::Ready;
                } else {
                    self.begin_acquire();
                }
                Ok(())
            }
            _ => Err(Rejection::NoResults),
        }
    }

    fn begin_acquire(&mut self) {
        self.attempts += 1;
        let attempt = self.attempts;
        let acquisition = self.camera.acquire();
        let notify = self.notify.clone();
        tokio::spawn(async move {
            if let Some(outcome) = acquisition.await {
                if notify
                    .send(Notification::CameraAcquired { attempt, outcome })
                    .is_err()
                {
                    debug!(attempt, "session gone; camera outcome dropped");
                }
            }
        });
        self.stage = Stage::AwaitingCamera { attempt };
    }

    fn begin_recording(&mut self) {
        self.runs += 1;
        let run = self.runs;
        let notify = self.notify.clone();
        let generation = self
            .clock
            .start(move |generation| notify.send(Notification::ClockTick { generation }).is_ok());
        info!(run, generation, test = %self.test, "recording started");
        self.stage = Stage::Recording { run };
    }

    fn finish_recording(&mut self, run: u64) {
        self.clock.stop();
        let recording = RecordingRef {
            run,
            test: self.test,
            duration_seconds: self.clock.elapsed_seconds(),
        };
        if self.policy == CameraPolicy::ReleaseOnStop {
            self.camera.release();
        }
        info!(run, duration = recording.duration_seconds, "recording stopped, analysing");

        let notify = self.notify.clone();
        let analysis = AnalysisRun::start(&self.pipeline, recording, move |event| {
            notify.send(Notification::Analysis { run, event }).is_ok()
        });
        self.stage = Stage::Analyzing {
            analysis,
            monitor: ProgressMonitor::new(),
        };
    }

    fn teardown(&mut self, reason: AbortReason) {
        self.clock.stop();
        self.camera.release();
        let previous = std::mem::replace(&mut self.stage, Stage::Idle);
        if let Stage::Analyzing { analysis, .. } = previous {
            analysis.cancel();
            let aborted = AnalysisAborted {
                run: analysis.run(),
                reason,
            };
            info!(%aborted, "analysis abandoned");
        }
    }

    fn on_camera(&mut self, attempt: u64, outcome: Result<CaptureHandle, CameraError>) {
        let current = matches!(self.stage, Stage::AwaitingCamera { attempt: a } if a == attempt);
        if !current {
            // Dropping the outcome closes a late stream.
            debug!(attempt, ok = outcome.is_ok(), "stale camera outcome discarded");
            return;
        }
        match outcome {
            Ok(handle) => {
                self.camera.attach(handle);
                self.stage = Stage::Ready;
            }
            Err(error) => {
                self.camera.acquisition_failed();
                warn!(attempt, %error, "camera acquisition failed");
                self.stage = Stage::CameraDenied { error };
            }
        }
    }

    fn on_tick(&mut self, generation: u64) {
        let Stage::Recording { run } = self.stage else {
            debug!(generation, "tick outside recording dropped");
            return;
        };
        let Some(elapsed) = self.clock.tick(generation) else {
            debug!(generation, "stale tick dropped");
            return;
        };
        debug!(run, elapsed, "tick");

        if self.auto_stop && elapsed >= self.test.definition().expected_duration_seconds {
            info!(run, elapsed, "expected duration reached");
            self.finish_recording(run);
        }
    }

    fn on_analysis(&mut self, run: u64, event: Option<AnalysisEvent>) {
        let Stage::Analyzing { analysis, monitor } = &mut self.stage else {
            debug!(run, "analysis event outside analysing dropped");
            return;
        };
        if analysis.run() != run {
            debug!(run, "stale analysis event dropped");
            return;
        }

        match event {
            Some(AnalysisEvent::Progress(progress)) => {
                if let Err(violation) = monitor.observe_progress(progress.percent()) {
                    warn!(run, %violation, "progress event dropped");
                }
            }
            Some(AnalysisEvent::Complete(record)) => {
                if let Err(violation) = monitor.observe_result() {
                    warn!(run, %violation, "pipeline contract violated");
                }
                info!(
                    run,
                    test = %record.test_id(),
                    result = %record.reps_or_metric(),
                    score = record.form_score_percent(),
                    "analysis complete"
                );
                self.stage = Stage::Results { record };
            }
            None => {
                warn!(run, "analysis ended without a result");
                self.teardown(AbortReason::PipelineEnded);
            }
        }
    }

    /// Current state.
    pub const fn state(&self) -> SessionState {
        match self.stage {
            Stage::Idle => SessionState::Idle,
            Stage::AwaitingCamera { .. } => SessionState::AwaitingCamera,
            Stage::CameraDenied { .. } => SessionState::CameraDenied,
            Stage::Ready => SessionState::Ready,
            Stage::Recording { .. } => SessionState::Recording,
            Stage::Analyzing { .. } => SessionState::Analyzing,
            Stage::Results { .. } => SessionState::Results,
        }
    }

    /// Selected test.
    pub const fn selected_test(&self) -> TestId {
        self.test
    }

    /// Camera policy in force.
    pub const fn policy(&self) -> CameraPolicy {
        self.policy
    }

    /// Whether live frames are available.
    pub const fn camera_ready(&self) -> bool {
        self.camera.camera_ready()
    }

    /// Whether the camera is held or being acquired.
    pub const fn camera_engaged(&self) -> bool {
        self.camera.is_engaged()
    }

    /// How many held streams have been closed.
    pub const fn camera_releases(&self) -> u64 {
        self.camera.release_count()
    }

    /// Whether the recording clock is running.
    pub const fn clock_running(&self) -> bool {
        self.clock.is_running()
    }

    /// Seconds recorded, while recording.
    pub const fn elapsed_seconds(&self) -> Option<u32> {
        match self.stage {
            Stage::Recording { .. } => Some(self.clock.elapsed_seconds()),
            _ => None,
        }
    }

    /// Analysis progress, while analysing.
    pub fn progress(&self) -> Option<AnalysisProgress> {
        match &self.stage {
            Stage::Analyzing { monitor, .. } => Some(monitor.progress()),
            _ => None,
        }
    }

    /// The result, in `Results`.
    pub const fn result(&self) -> Option<&ResultRecord> {
        match &self.stage {
            Stage::Results { record } => Some(record),
            _ => None,
        }
    }

    /// The acquisition error, in `CameraDenied`.
    pub const fn camera_error(&self) -> Option<&CameraError> {
        match &self.stage {
            Stage::CameraDenied { error } => Some(error),
            _ => None,
        }
    }

    /// Pull a preview frame. `None` when no camera is held.
    pub fn next_frame(&mut self) -> Option<Result<Frame, CameraError>> {
        self.camera.next_frame()
    }

    /// Observable state for the presentation layer.
    pub fn snapshot(&self) -> SessionSnapshot {
        let elapsed_seconds = self.elapsed_seconds();
        let expected = self.test.definition().expected_duration_seconds;
        SessionSnapshot {
            state: self.state(),
            test: self.test,
            camera_live: self.camera_ready(),
            elapsed_seconds,
            remaining_seconds: elapsed_seconds.map(|elapsed| expected.saturating_sub(elapsed)),
            progress_percent: self.progress().map(AnalysisProgress::percent),
            result: self.result().cloned(),
            camera_error: self.camera_error().map(ToString::to_string),
        }
    }
}

impl Drop for TestSession {
    fn drop(&mut self) {
        if !matches!(self.stage, Stage::Idle) {
            self.teardown(AbortReason::NavigatedAway);
        }
    }
}
