//! Time sources and sleepers used by the polling loops.
//!
//! Poll loops never call `Utc::now()` or `thread::sleep` directly. They receive a
//! [`Clock`] and a [`Sleeper`], which lets tests swap in [`ManualClock`] and run
//! multi-minute scenarios instantly.

use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use chrono::{DateTime, Utc};

/// Source of wall-clock time.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    /// Current time in epoch milliseconds.
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// Blocks the current thread between poll iterations.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Real time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Real sleeping via `thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Shared, manually advanced clock. Sleeping advances time instead of blocking.
///
/// Clones share the same instant, so a provider fake and the engine observe the
/// same timeline.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
    slept: Arc<Mutex<Vec<Duration>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
            slept: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let delta = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock().expect("manual clock lock poisoned");
        *now = now.checked_add_signed(delta).unwrap_or(*now);
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().expect("manual clock lock poisoned") = instant;
    }

    /// Every duration passed to [`Sleeper::sleep`], in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.slept.lock().expect("manual clock lock poisoned").clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("manual clock lock poisoned")
    }
}

impl Sleeper for ManualClock {
    fn sleep(&self, duration: Duration) {
        self.slept.lock().expect("manual clock lock poisoned").push(duration);
        self.advance(duration);
    }
}
