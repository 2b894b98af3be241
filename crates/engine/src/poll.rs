//! Poll-loop driver shared by the watcher, the monitor and teardown.
//!
//! Each loop is written as a step function returning [`PollStep`]. [`drive`] runs
//! the step, sleeps between iterations through the injected [`Sleeper`], grows the
//! interval toward its ceiling, and enforces the optional deadline against the
//! injected [`Clock`].

use std::time::Duration;

use pipewatch_util::{Clock, Sleeper};
use tracing::{debug, warn};

use crate::EngineError;

/// Outcome of one loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep<T> {
    Pending,
    Ready(T),
}

/// Sleep interval, growth ceiling and deadline of a poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: Duration,
    /// Upper bound for the interval; equal to `interval` for fixed-rate loops.
    pub max_interval: Duration,
    /// Give up once this much time has elapsed since the loop started.
    pub deadline: Option<Duration>,
}

impl PollSchedule {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_interval: interval,
            deadline: None,
        }
    }

    /// Interval that doubles after every pending iteration up to `max_interval`.
    pub fn growing(interval: Duration, max_interval: Duration) -> Self {
        Self {
            interval,
            max_interval: max_interval.max(interval),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    fn next_interval(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_interval)
    }
}

/// Run `step` until it reports [`PollStep::Ready`] or the deadline passes.
///
/// `step` receives the 1-based attempt number. Errors returned by the step end the
/// loop immediately.
pub fn drive<T, F>(operation: &'static str, schedule: &PollSchedule, clock: &dyn Clock, sleeper: &dyn Sleeper, mut step: F) -> Result<T, EngineError>
where
    F: FnMut(u32) -> Result<PollStep<T>, EngineError>,
{
    let started_at = clock.now();
    let mut interval = schedule.interval;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        if let PollStep::Ready(value) = step(attempts)? {
            debug!(operation, attempts, "poll loop finished");
            return Ok(value);
        }

        let elapsed = clock.now().signed_duration_since(started_at).to_std().unwrap_or_default();
        if let Some(deadline) = schedule.deadline
            && elapsed + interval > deadline
        {
            warn!(operation, attempts, elapsed_secs = elapsed.as_secs(), "poll loop deadline exceeded");
            return Err(EngineError::TimeoutExceeded { operation, elapsed });
        }

        sleeper.sleep(interval);
        interval = schedule.next_interval(interval);
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use pipewatch_util::ManualClock;

    use super::*;

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn interval_grows_to_ceiling() {
        let clock = clock();
        let schedule = PollSchedule::growing(Duration::from_secs(5), Duration::from_secs(20));

        let attempts = drive("test", &schedule, &clock, &clock, |attempt| {
            Ok(if attempt == 5 { PollStep::Ready(attempt) } else { PollStep::Pending })
        })
        .expect("loop finishes");

        assert_eq!(attempts, 5);
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(20),
                Duration::from_secs(20)
            ]
        );
    }

    #[test]
    fn ready_on_first_attempt_never_sleeps() {
        let clock = clock();
        let value = drive("test", &PollSchedule::fixed(Duration::from_secs(5)), &clock, &clock, |_| {
            Ok(PollStep::Ready("done"))
        })
        .expect("ready");
        assert_eq!(value, "done");
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn deadline_raises_timeout() {
        let clock = clock();
        let schedule = PollSchedule::fixed(Duration::from_secs(5)).with_deadline(Some(Duration::from_secs(12)));

        let result: Result<(), EngineError> = drive("watch stacks", &schedule, &clock, &clock, |_| Ok(PollStep::Pending));

        match result {
            Err(EngineError::TimeoutExceeded { operation, elapsed }) => {
                assert_eq!(operation, "watch stacks");
                assert_eq!(elapsed, Duration::from_secs(10));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn step_errors_stop_the_loop() {
        let clock = clock();
        let result: Result<(), EngineError> = drive("test", &PollSchedule::fixed(Duration::from_secs(1)), &clock, &clock, |_| {
            Err(EngineError::Service(pipewatch_api::ServiceError::Transport("down".into())))
        });
        assert!(matches!(result, Err(EngineError::Service(_))));
    }
}
