//! Time sources.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Datelike as _, Local, TimeDelta};

/// Source of wall-clock time for the engine.
pub trait Clock: Send + Sync {
    /// Current local time.
    fn now(&self) -> DateTime<Local>;
}

/// The host's wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Wall time anchored at construction and advanced by tokio's monotonic clock.
///
/// Follows `tokio::time::pause` and `advance`, so engine tests run on virtual time.
#[derive(Debug, Clone)]
pub struct TokioClock {
    wall: DateTime<Local>,
    origin: tokio::time::Instant,
}

impl TokioClock {
    /// Anchor at the current wall time.
    pub fn new() -> Self {
        Self::starting_at(Local::now())
    }

    /// Anchor at a fixed wall time.
    pub fn starting_at(wall: DateTime<Local>) -> Self {
        Self {
            wall,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Local> {
        TimeDelta::from_std(self.origin.elapsed())
            .ok()
            .and_then(|elapsed| self.wall.checked_add_signed(elapsed))
            .unwrap_or(self.wall)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Local>>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: std::time::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(next) = TimeDelta::from_std(by)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
        {
            *now = next;
        }
    }

    /// Jump to an arbitrary time.
    pub fn set(&self, at: DateTime<Local>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Calendar-day key for daily rollover. Distinct across year boundaries.
pub fn day_key(at: &DateTime<Local>) -> i32 {
    at.date_naive().num_days_from_ce()
}
