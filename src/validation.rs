//! Contract checks for clock ticks and analysis pipeline output.
//!
//! [`ProgressMonitor`] is applied at runtime to whatever pipeline is plugged in;
//! the `validate_*` functions check recorded sequences in tests.

use thiserror::Error;

use crate::analysis::{AnalysisEvent, AnalysisProgress};

/// A broken pipeline or clock contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    /// Progress went backwards.
    #[error("progress regressed from {previous}% to {current}%")]
    ProgressRegressed {
        /// Last accepted value.
        previous: u8,
        /// Offending value.
        current: u8,
    },
    /// A result arrived before progress reached 100.
    #[error("result delivered at {last}% instead of 100%")]
    ResultBeforeComplete {
        /// Last accepted progress.
        last: u8,
    },
    /// More than one result in a run.
    #[error("result delivered more than once")]
    DuplicateResult,
    /// Events after the result.
    #[error("event received after the result")]
    EventAfterResult,
    /// The sequence ended without a result.
    #[error("sequence ended without a result")]
    MissingResult,
    /// Nothing to check.
    #[error("cannot validate an empty sequence")]
    Empty,
    /// Clock ticks skipped or repeated a value.
    #[error("tick gap at index {index}: expected {expected}, got {got}")]
    TickGap {
        /// Position in the sequence.
        index: usize,
        /// Expected elapsed value.
        expected: u32,
        /// Observed elapsed value.
        got: u32,
    },
}

/// Tracks one analysis run and rejects events that break the contract.
#[derive(Debug, Clone, Default)]
pub struct ProgressMonitor {
    last: Option<AnalysisProgress>,
    delivered: bool,
}

impl ProgressMonitor {
    /// A monitor for a fresh run.
    pub const fn new() -> Self {
        Self {
            last: None,
            delivered: false,
        }
    }

    /// Accept a progress value if it does not go backwards.
    pub fn observe_progress(&mut self, percent: u8) -> Result<u8, ContractViolation> {
        if self.delivered {
            return Err(ContractViolation::EventAfterResult);
        }
        let progress = AnalysisProgress::new(percent);
        if let Some(previous) = self.last {
            if progress < previous {
                return Err(ContractViolation::ProgressRegressed {
                    previous: previous.percent(),
                    current: progress.percent(),
                });
            }
        }
        self.last = Some(progress);
        Ok(progress.percent())
    }

    /// Record the result.
    ///
    /// A result before 100% is still recorded (progress snaps to 100) but reported.
    pub fn observe_result(&mut self) -> Result<(), ContractViolation> {
        if self.delivered {
            return Err(ContractViolation::DuplicateResult);
        }
        self.delivered = true;
        let last = self.progress();
        self.last = Some(AnalysisProgress::COMPLETE);
        if !last.is_complete() {
            return Err(ContractViolation::ResultBeforeComplete {
                last: last.percent(),
            });
        }
        Ok(())
    }

    /// Last accepted progress, 0 before the first event.
    pub fn progress(&self) -> AnalysisProgress {
        self.last.unwrap_or_default()
    }

    /// Whether the result has been seen.
    pub const fn delivered(&self) -> bool {
        self.delivered
    }
}

/// Check a complete pipeline output: non-decreasing progress reaching 100,
/// then exactly one result as the final item.
pub fn validate_progress_sequence(events: &[AnalysisEvent]) -> Result<(), ContractViolation> {
    if events.is_empty() {
        return Err(ContractViolation::Empty);
    }

    let mut monitor = ProgressMonitor::new();
    for event in events {
        match event {
            AnalysisEvent::Progress(progress) => {
                monitor.observe_progress(progress.percent())?;
            }
            AnalysisEvent::Complete(_) => monitor.observe_result()?,
        }
    }

    if monitor.delivered() {
        Ok(())
    } else {
        Err(ContractViolation::MissingResult)
    }
}

/// Check elapsed values reported after each tick of one recording: 1, 2, 3, ...
pub fn validate_tick_sequence(elapsed: &[u32]) -> Result<(), ContractViolation> {
    if elapsed.is_empty() {
        return Err(ContractViolation::Empty);
    }
    for (index, &got) in elapsed.iter().enumerate() {
        let expected = u32::try_from(index).map_or(u32::MAX, |i| i.saturating_add(1));
        if got != expected {
            return Err(ContractViolation::TickGap {
                index,
                expected,
                got,
            });
        }
    }
    Ok(())
}
