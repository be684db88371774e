//! Async driver: the single task that feeds a [`TestSession`].
//!
//! Commands from the presentation layer and notifications from background tasks
//! are processed one at a time on the driver task. After each event the driver
//! publishes a fresh [`SessionSnapshot`] and, on entering `Results`, hands the
//! [`ResultRecord`] to whoever listens on [`SessionHandle::next_result`].

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::catalog::ResultRecord;
use crate::config::RepcamConfig;
use crate::error::SessionError;
use crate::session::{Command, Notification, SessionSnapshot, SessionState, TestSession};
use crate::traits::{AnalysisPipeline, CameraBackend};

const COMMAND_QUEUE: usize = 32;

struct Request {
    command: Command,
    reply: oneshot::Sender<Result<SessionState, SessionError>>,
}

/// Spawns session drivers.
pub struct SessionDriver;

impl SessionDriver {
    /// Start a driver task for a new idle session.
    pub fn spawn(
        config: &RepcamConfig,
        backend: Arc<dyn CameraBackend>,
        pipeline: Arc<dyn AnalysisPipeline>,
    ) -> SessionHandle {
        let (notify, notifications) = mpsc::unbounded_channel();
        let session = TestSession::new(config, backend, pipeline, notify);
        let (snapshot_tx, snapshots) = watch::channel(session.snapshot());
        let (requests_tx, requests) = mpsc::channel(COMMAND_QUEUE);
        let (results_tx, results) = mpsc::unbounded_channel();

        let task = tokio::spawn(run(session, requests, notifications, snapshot_tx, results_tx));

        SessionHandle {
            requests: requests_tx,
            snapshots,
            results,
            task,
        }
    }
}

async fn run(
    mut session: TestSession,
    mut requests: mpsc::Receiver<Request>,
    mut notifications: mpsc::UnboundedReceiver<Notification>,
    snapshots: watch::Sender<SessionSnapshot>,
    results: mpsc::UnboundedSender<ResultRecord>,
) {
    info!(test = %session.selected_test(), "session driver started");
    loop {
        let before = session.state();
        let answered = tokio::select! {
            request = requests.recv() => {
                let Some(Request { command, reply }) = request else {
                    break;
                };
                let outcome = session.handle(command);
                Some((command, reply, outcome))
            }
            Some(notification) = notifications.recv() => {
                session.handle_notification(notification);
                None
            }
        };

        if before != SessionState::Results && session.state() == SessionState::Results {
            if let Some(record) = session.result() {
                if results.send(record.clone()).is_err() {
                    debug!("no result listener");
                }
            }
        }
        // Publish before replying so a caller never sees a snapshot older than its answer.
        snapshots.send_replace(session.snapshot());

        if let Some((command, reply, outcome)) = answered {
            if reply.send(outcome).is_err() {
                debug!(?command, "caller stopped waiting for reply");
            }
        }
    }

    // Every handle is gone: tear down whatever is still held.
    if let Err(err) = session.handle(Command::NavigateAway) {
        debug!(%err, "final teardown");
    }
    snapshots.send_replace(session.snapshot());
    info!("session driver stopped");
}

/// Presentation-layer side of a running session.
pub struct SessionHandle {
    requests: mpsc::Sender<Request>,
    snapshots: watch::Receiver<SessionSnapshot>,
    results: mpsc::UnboundedReceiver<ResultRecord>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Send a command and wait for the session's answer.
    pub async fn send(&self, command: Command) -> Result<SessionState, SessionError> {
        let (reply, answer) = oneshot::channel();
        self.requests
            .send(Request { command, reply })
            .await
            .map_err(|_| SessionError::DriverStopped)?;
        answer.await.map_err(|_| SessionError::DriverStopped)?
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// A receiver that sees every published snapshot from now on.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Wait until a published snapshot satisfies `predicate`.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<SessionSnapshot, SessionError>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .map_err(|_| SessionError::DriverStopped)?;
        Ok(snapshot.clone())
    }

    /// Wait until the session is in `state`.
    pub async fn wait_for_state(
        &self,
        state: SessionState,
    ) -> Result<SessionSnapshot, SessionError> {
        self.wait_for(|snapshot| snapshot.state == state).await
    }

    /// Next result handed off for the dashboard.
    pub async fn next_result(&mut self) -> Option<ResultRecord> {
        self.results.recv().await
    }

    /// Leave the session and stop the driver.
    pub async fn shutdown(self) {
        let Self {
            requests,
            snapshots,
            results,
            task,
        } = self;
        drop((requests, snapshots, results));
        if let Err(err) = task.await {
            debug!(%err, "session driver task ended abnormally");
        }
    }
}
