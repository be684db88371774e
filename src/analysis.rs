//! Analysis pipeline contract, the simulated pipeline, and cancellable runs.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::catalog::{Measurement, ResultRecord, TestId};
use crate::traits::AnalysisPipeline;

/// Reference to a finished recording handed to a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingRef {
    /// Session-local id of the recording run.
    pub run: u64,
    /// Which test was recorded.
    pub test: TestId,
    /// Seconds on the clock when recording stopped.
    pub duration_seconds: u32,
}

/// Completion of an analysis run, 0..=100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct AnalysisProgress {
    percent_complete: u8,
}

impl AnalysisProgress {
    /// Fully analysed.
    pub const COMPLETE: Self = Self {
        percent_complete: 100,
    };

    /// Progress at `percent`, clamped to 100.
    #[must_use]
    pub fn new(percent: u8) -> Self {
        Self {
            percent_complete: percent.min(100),
        }
    }

    /// Percent complete.
    pub const fn percent(self) -> u8 {
        self.percent_complete
    }

    /// Whether the run has reached 100.
    pub const fn is_complete(self) -> bool {
        self.percent_complete >= 100
    }
}

/// One item of a pipeline's output sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisEvent {
    /// Progress so far.
    Progress(AnalysisProgress),
    /// The single, final result.
    Complete(ResultRecord),
}

/// Stand-in pipeline: fixed steps on a fixed cadence and a fabricated result.
///
/// The recording content is never inspected.
#[derive(Debug, Clone)]
pub struct SimulatedPipeline {
    step_percent: u8,
    cadence: Duration,
}

impl SimulatedPipeline {
    /// Advance `step_percent` every `cadence`. A zero step is treated as 1.
    pub fn new(step_percent: u8, cadence: Duration) -> Self {
        Self {
            step_percent: step_percent.clamp(1, 100),
            cadence,
        }
    }

    /// Canned result for `recording`.
    pub fn fabricate(recording: &RecordingRef) -> ResultRecord {
        let (measurement, score) = match recording.test {
            TestId::Situps => (Measurement::Reps(24), 95),
            TestId::VerticalJump => (Measurement::Metric("28 cm".to_owned()), 88),
            TestId::ShuttleRun => (Measurement::Metric("4.2 s".to_owned()), 82),
        };
        ResultRecord::new(recording.test, measurement, score, recording.duration_seconds)
    }
}

impl Default for SimulatedPipeline {
    fn default() -> Self {
        Self::new(10, Duration::from_millis(200))
    }
}

enum Step {
    Emit { percent: u8, record: ResultRecord },
    Finish(ResultRecord),
    Done,
}

impl AnalysisPipeline for SimulatedPipeline {
    fn analyze(&self, recording: RecordingRef) -> BoxStream<'static, AnalysisEvent> {
        let step_percent = self.step_percent;
        let cadence = self.cadence;
        let record = Self::fabricate(&recording);

        stream::unfold(Step::Emit { percent: 0, record }, move |step| async move {
            match step {
                Step::Emit { percent, record } => {
                    if percent > 0 {
                        tokio::time::sleep(cadence).await;
                    }
                    let progress = AnalysisProgress::new(percent);
                    let next = if progress.is_complete() {
                        Step::Finish(record)
                    } else {
                        Step::Emit {
                            percent: percent.saturating_add(step_percent).min(100),
                            record,
                        }
                    };
                    Some((AnalysisEvent::Progress(progress), next))
                }
                Step::Finish(record) => Some((AnalysisEvent::Complete(record), Step::Done)),
                Step::Done => None,
            }
        })
        .boxed()
    }
}

/// A pipeline run forwarded on a background task until it completes or is cancelled.
#[derive(Debug)]
pub struct AnalysisRun {
    run: u64,
    token: CancellationToken,
}

impl AnalysisRun {
    /// Drive `pipeline` over `recording`, handing each event to `on_event`.
    ///
    /// `on_event(None)` means the sequence ended without a result. Forwarding stops
    /// after the result, after `on_event` returns `false`, or on [`cancel`](Self::cancel);
    /// nothing is forwarded once cancelled.
    pub fn start<F>(
        pipeline: &Arc<dyn AnalysisPipeline>,
        recording: RecordingRef,
        mut on_event: F,
    ) -> Self
    where
        F: FnMut(Option<AnalysisEvent>) -> bool + Send + 'static,
    {
        let run = recording.run;
        let token = CancellationToken::new();
        let cancel = token.clone();
        let mut events = pipeline.analyze(recording);

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        debug!(run, "analysis forwarding cancelled");
                        return;
                    }
                    next = events.next() => next,
                };
                let finished = !matches!(next, Some(AnalysisEvent::Progress(_)));
                if !on_event(next) || finished {
                    return;
                }
            }
        });

        Self { run, token }
    }

    /// Recording run this analysis belongs to.
    pub const fn run(&self) -> u64 {
        self.run
    }

    /// Stop forwarding. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for AnalysisRun {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn recording(test: TestId) -> RecordingRef {
        RecordingRef {
            run: 7,
            test,
            duration_seconds: 5,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_sequence() {
        let pipeline = SimulatedPipeline::default();
        let events: Vec<_> = pipeline.analyze(recording(TestId::Situps)).collect().await;

        let percents: Vec<u8> = events
            .iter()
            .filter_map(|event| match event {
                AnalysisEvent::Progress(p) => Some(p.percent()),
                AnalysisEvent::Complete(_) => None,
            })
            .collect();
        assert_eq!(percents, vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);

        match events.last() {
            Some(AnalysisEvent::Complete(record)) => {
                assert_eq!(record.test_id(), TestId::Situps);
                assert_eq!(record.reps_or_metric(), &Measurement::Reps(24));
                assert_eq!(record.form_score_percent(), 95);
                assert_eq!(record.rating_label(), "Excellent");
                assert_eq!(record.recorded_seconds(), 5);
            }
            other => panic!("expected a final result, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_uneven_step_still_ends_at_100() {
        let pipeline = SimulatedPipeline::new(30, Duration::from_millis(50));
        let events: Vec<_> = pipeline.analyze(recording(TestId::ShuttleRun)).collect().await;
        let percents: Vec<u8> = events
            .iter()
            .filter_map(|event| match event {
                AnalysisEvent::Progress(p) => Some(p.percent()),
                AnalysisEvent::Complete(_) => None,
            })
            .collect();
        assert_eq!(percents, vec![0, 30, 60, 90, 100]);
        assert_eq!(
            events.iter().filter(|e| matches!(e, AnalysisEvent::Complete(_))).count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_forwards_until_result() {
        let pipeline: Arc<dyn AnalysisPipeline> = Arc::new(SimulatedPipeline::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _run = AnalysisRun::start(&pipeline, recording(TestId::VerticalJump), move |event| {
            tx.send(event).is_ok()
        });

        let mut results = 0;
        while let Some(event) = rx.recv().await {
            if let Some(AnalysisEvent::Complete(record)) = event {
                assert_eq!(record.reps_or_metric(), &Measurement::Metric("28 cm".to_owned()));
                results += 1;
            }
        }
        assert_eq!(results, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_run_delivers_nothing_more() {
        let pipeline: Arc<dyn AnalysisPipeline> = Arc::new(SimulatedPipeline::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let run = AnalysisRun::start(&pipeline, recording(TestId::Situps), move |event| {
            tx.send(event).is_ok()
        });

        let first = rx.recv().await.expect("first progress");
        assert_eq!(first, Some(AnalysisEvent::Progress(AnalysisProgress::new(0))));
        run.cancel();
        assert!(run.is_cancelled());

        while let Some(event) = rx.recv().await {
            assert!(
                !matches!(event, Some(AnalysisEvent::Complete(_))),
                "no result after cancel"
            );
        }
    }
}
