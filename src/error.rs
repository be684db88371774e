//! Session-level errors.

use std::fmt;

use thiserror::Error;

use crate::session::{Command, SessionState};

/// Why a command was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Recording needs a live camera and there is none.
    CameraUnavailable,
    /// The test cannot change while recording, analysing or showing results.
    TestLocked,
    /// Stop was pressed while not recording.
    NotRecording,
    /// Record-again was pressed with no result on screen.
    NoResults,
    /// The camera is already being acquired.
    AlreadyAcquiring,
    /// The command has no meaning in the current state.
    NotInState,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CameraUnavailable => "camera unavailable",
            Self::TestLocked => "test selection is locked",
            Self::NotRecording => "not recording",
            Self::NoResults => "no results to dismiss",
            Self::AlreadyAcquiring => "camera acquisition already in progress",
            Self::NotInState => "not allowed in this state",
        })
    }
}

/// Errors surfaced to the presentation layer. The session state is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The command is not legal in the current state.
    #[error("{command:?} rejected in {state:?}: {reason}")]
    InvalidTransition {
        /// State at the time of the command.
        state: SessionState,
        /// The refused command.
        command: Command,
        /// Why.
        reason: Rejection,
    },
    /// The session driver has shut down.
    #[error("session driver stopped")]
    DriverStopped,
}

impl SessionError {
    /// The rejection reason, if this is an invalid transition.
    pub const fn rejection(&self) -> Option<Rejection> {
        match self {
            Self::InvalidTransition { reason, .. } => Some(*reason),
            Self::DriverStopped => None,
        }
    }

    /// Whether the command was refused for lack of a live camera.
    pub const fn is_camera_unavailable(&self) -> bool {
        matches!(self.rejection(), Some(Rejection::CameraUnavailable))
    }
}

/// Why an analysis run ended without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The athlete left the session.
    NavigatedAway,
    /// The pipeline's sequence ended without delivering a result.
    PipelineEnded,
}

/// An analysis run that was abandoned. Logged and absorbed, never returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("analysis run {run} aborted ({reason:?})")]
pub struct AnalysisAborted {
    /// Recording run id.
    pub run: u64,
    /// Why.
    pub reason: AbortReason,
}
