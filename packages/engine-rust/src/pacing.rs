//! Pacing for pollers and supervisors: fixed-period or cron-style steps.
//!
//! [`StepPacer`] guarantees approximately-periodic execution without drift
//! accumulation: the first `wait` returns immediately, later waits sleep
//! only for the remainder of the period, and a loop body that overruns its
//! period runs back-to-back instead of oversleeping.

use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::Utc;
use cron::Schedule;

use datalink_core::Error;

/// How a paced loop spaces its iterations.
#[derive(Debug, Clone)]
pub enum Pacing {
    /// A fixed period between iterations.
    Period(Duration),
    /// Sleep until the next event of a cron schedule.
    ///
    /// Expressions use the seconds-resolution cron syntax
    /// (`sec min hour day-of-month month day-of-week [year]`).
    Cron(Schedule),
}

impl Pacing {
    /// Fixed-period pacing from fractional seconds.
    #[must_use]
    pub fn from_secs_f64(secs: f64) -> Self {
        Pacing::Period(Duration::from_secs_f64(secs.max(0.0)))
    }

    /// Cron pacing from a schedule expression.
    ///
    /// # Errors
    ///
    /// Fails when the expression does not parse as a cron schedule.
    pub fn cron(expression: &str) -> Result<Self, Error> {
        let schedule = Schedule::from_str(expression)
            .map_err(|e| Error::Other(anyhow::anyhow!("invalid cron expression '{expression}': {e}")))?;
        Ok(Pacing::Cron(schedule))
    }
}

impl Default for Pacing {
    /// Ten seconds, the engine's default `time_step`.
    fn default() -> Self {
        Pacing::Period(Duration::from_secs(10))
    }
}

/// One pacing state machine: call `wait`/`wait_async` once per loop
/// iteration.
#[derive(Debug)]
pub struct StepPacer {
    pacing: Pacing,
    first: bool,
    reference: Instant,
}

impl StepPacer {
    /// Creates a pacer; the first wait returns immediately.
    #[must_use]
    pub fn new(pacing: Pacing) -> Self {
        Self {
            pacing,
            first: true,
            reference: Instant::now(),
        }
    }

    /// Blocking wait until the next step boundary.
    pub fn wait(&mut self) {
        if let Some(delay) = self.next_delay() {
            std::thread::sleep(delay);
        }
        self.reference = Instant::now();
    }

    /// Cooperative wait until the next step boundary; yields to the
    /// scheduler instead of blocking the worker.
    pub async fn wait_async(&mut self) {
        if let Some(delay) = self.next_delay() {
            tokio::time::sleep(delay).await;
        }
        self.reference = Instant::now();
    }

    /// Time to sleep before the next step, or `None` to run immediately.
    fn next_delay(&mut self) -> Option<Duration> {
        if self.first {
            self.first = false;
            return None;
        }

        match &self.pacing {
            Pacing::Period(period) => {
                // Saturates to None when the body already overran the
                // period: run again immediately, with a fresh reference.
                period.checked_sub(self.reference.elapsed())
            }
            Pacing::Cron(schedule) => {
                let next = schedule.upcoming(Utc).next()?;
                (next - Utc::now()).to_std().ok()
            }
        }
    }
}
