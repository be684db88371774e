//! Randomised command sequences against a [`TestSession`], checking the
//! resource invariants after every command and every notification.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use repcam::session::Notification;
use repcam::{
    CameraError, CameraPolicy, Command, MockCamera, RepcamConfig, SessionState, SimulatedPipeline,
    TestId, TestSession,
};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
enum Step {
    Send(Command),
    Wait(u64),
}

fn command() -> impl Strategy<Value = Command> {
    prop_oneof![
        prop::sample::select(TestId::ALL.to_vec()).prop_map(Command::SelectTest),
        Just(Command::RequestCamera),
        Just(Command::Start),
        Just(Command::Stop),
        Just(Command::RecordAgain),
        Just(Command::NavigateAway),
    ]
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => command().prop_map(Step::Send),
        2 => (0u64..2500).prop_map(Step::Wait),
    ]
}

#[derive(Default)]
struct Tally {
    recordings: usize,
    results: usize,
}

fn check(session: &TestSession, camera: &MockCamera) -> Result<(), TestCaseError> {
    let state = session.state();
    prop_assert_eq!(
        session.camera_engaged(),
        state.holds_camera(session.policy()),
        "camera engagement in {:?}",
        state
    );
    prop_assert_eq!(session.clock_running(), state == SessionState::Recording);
    prop_assert_eq!(session.progress().is_some(), state == SessionState::Analyzing);
    prop_assert_eq!(session.result().is_some(), state == SessionState::Results);
    prop_assert!(camera.live_streams() <= 2, "at most one held and one in flight");
    Ok(())
}

fn observe(
    before: SessionState,
    session: &TestSession,
    camera: &MockCamera,
    tally: &mut Tally,
) -> Result<(), TestCaseError> {
    let after = session.state();
    if before != SessionState::Recording && after == SessionState::Recording {
        tally.recordings += 1;
    }
    if before != SessionState::Results && after == SessionState::Results {
        tally.results += 1;
    }
    prop_assert!(
        tally.results <= tally.recordings,
        "{} results for {} recordings",
        tally.results,
        tally.recordings
    );
    check(session, camera)
}

async fn settle(
    session: &mut TestSession,
    rx: &mut mpsc::UnboundedReceiver<Notification>,
    camera: &MockCamera,
    tally: &mut Tally,
) -> Result<(), TestCaseError> {
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    while let Ok(notification) = rx.try_recv() {
        let before = session.state();
        session.handle_notification(notification);
        observe(before, session, camera, tally)?;
    }
    Ok(())
}

fn run_sequence(
    steps: Vec<Step>,
    policy: CameraPolicy,
    auto_stop: bool,
    camera_delay_ms: u64,
    denials: usize,
) -> Result<(), TestCaseError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .map_err(|err| TestCaseError::fail(err.to_string()))?;

    runtime.block_on(async move {
        let mut config = RepcamConfig::default();
        config.camera.policy = policy;
        config.session.auto_stop_at_duration = auto_stop;
        config.session.default_test = TestId::VerticalJump;

        let camera = MockCamera::new().with_delay(Duration::from_millis(camera_delay_ms));
        for _ in 0..denials {
            camera.deny_next(CameraError::PermissionDenied("refused".to_owned()));
        }
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = TestSession::new(
            &config,
            Arc::new(camera.clone()),
            Arc::new(SimulatedPipeline::new(20, Duration::from_millis(300))),
            tx,
        );
        let mut tally = Tally::default();

        for step in steps {
            match step {
                Step::Send(command) => {
                    let before = session.state();
                    let outcome = session.handle(command);
                    if outcome.is_err() {
                        prop_assert_eq!(
                            session.state(),
                            before,
                            "rejected {:?} changed state",
                            command
                        );
                    }
                    observe(before, &session, &camera, &mut tally)?;
                }
                Step::Wait(millis) => {
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                }
            }
            settle(&mut session, &mut rx, &camera, &mut tally).await?;
        }

        session
            .handle(Command::NavigateAway)
            .map_err(|err| TestCaseError::fail(err.to_string()))?;
        tokio::time::sleep(Duration::from_secs(5)).await;
        settle(&mut session, &mut rx, &camera, &mut tally).await?;

        prop_assert_eq!(session.state(), SessionState::Idle);
        prop_assert!(!session.camera_engaged());
        prop_assert!(!session.clock_running());
        prop_assert_eq!(camera.live_streams(), 0, "every opened stream closed");
        Ok(())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn session_invariants_hold_for_any_command_sequence(
        steps in prop::collection::vec(step(), 1..40),
        retain in any::<bool>(),
        auto_stop in any::<bool>(),
        camera_delay_ms in 0u64..400,
        denials in 0usize..3,
    ) {
        let policy = if retain { CameraPolicy::Retain } else { CameraPolicy::ReleaseOnStop };
        run_sequence(steps, policy, auto_stop, camera_delay_ms, denials)?;
    }
}
