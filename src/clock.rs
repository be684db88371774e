//! Recording clock.
//!
//! A background ticker posts one tick per period; the owner feeds each tick back
//! through [`SessionClock::tick`], which is where `elapsed_seconds` moves. Every
//! `start` opens a new generation, so ticks from an earlier run are ignored.

use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Elapsed-seconds counter driven by a cancellable ticker task.
#[derive(Debug)]
pub struct SessionClock {
    period: Duration,
    elapsed: u32,
    generation: u64,
    running: Option<CancellationToken>,
}

impl SessionClock {
    /// A stopped clock ticking every `period` once started. A zero period ticks every 1 ms.
    pub const fn new(period: Duration) -> Self {
        Self {
            period: if period.is_zero() { MIN_PERIOD } else { period },
            elapsed: 0,
            generation: 0,
            running: None,
        }
    }

    /// Reset to zero and start ticking.
    ///
    /// `on_tick` runs on the ticker task with this run's generation; returning
    /// `false` ends the ticker. Returns the generation to pass back to `tick`.
    pub fn start<F>(&mut self, mut on_tick: F) -> u64
    where
        F: FnMut(u64) -> bool + Send + 'static,
    {
        self.stop();
        self.elapsed = 0;
        self.generation += 1;
        let generation = self.generation;

        let token = CancellationToken::new();
        let cancel = token.clone();
        let period = self.period;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if !on_tick(generation) {
                            break;
                        }
                    }
                }
            }
            trace!(generation, "clock ticker exited");
        });

        self.running = Some(token);
        generation
    }

    /// Freeze the current value. No-op when already stopped.
    pub fn stop(&mut self) {
        if let Some(token) = self.running.take() {
            token.cancel();
        }
    }

    /// Count one tick from `generation`.
    ///
    /// Returns the new elapsed value, or `None` if the clock is stopped or the tick
    /// belongs to an earlier run.
    pub fn tick(&mut self, generation: u64) -> Option<u32> {
        if self.running.is_none() || generation != self.generation {
            return None;
        }
        self.elapsed = self.elapsed.saturating_add(1);
        Some(self.elapsed)
    }

    /// Seconds counted since the last `start`.
    pub const fn elapsed_seconds(&self) -> u32 {
        self.elapsed
    }

    /// Whether the ticker is running.
    pub const fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for SessionClock {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_once_per_period_from_zero() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut clock = SessionClock::new(Duration::from_secs(1));
        let generation = clock.start(move |g| tx.send(g).is_ok());
        assert_eq!(clock.elapsed_seconds(), 0);

        for expected in 1..=5 {
            let g = rx.recv().await.expect("tick");
            assert_eq!(clock.tick(g), Some(expected));
        }
        assert_eq!(generation, 1);
        assert_eq!(clock.elapsed_seconds(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_still_ticks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut clock = SessionClock::new(Duration::ZERO);
        clock.start(move |g| tx.send(g).is_ok());

        for expected in 1..=3 {
            let g = rx.recv().await.expect("tick");
            assert_eq!(clock.tick(g), Some(expected));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_freezes_and_start_resets() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut clock = SessionClock::new(Duration::from_secs(1));
        let tx2 = tx.clone();
        clock.start(move |g| tx.send(g).is_ok());

        let g = rx.recv().await.expect("tick");
        clock.tick(g);
        clock.stop();
        assert!(!clock.is_running());
        assert_eq!(clock.elapsed_seconds(), 1);
        assert_eq!(clock.tick(g), None);

        clock.stop();
        assert_eq!(clock.elapsed_seconds(), 1);

        let second = clock.start(move |g| tx2.send(g).is_ok());
        assert_eq!(clock.elapsed_seconds(), 0);
        assert_eq!(clock.tick(g), None, "tick from the first run is ignored");
        let g = rx.recv().await.expect("tick");
        assert_eq!(g, second);
        assert_eq!(clock.tick(g), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ticks_after_stop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut clock = SessionClock::new(Duration::from_secs(1));
        clock.start(move |g| tx.send(g).is_ok());
        clock.stop();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }
}
