//! Usage accumulation.
//!
//! Continuous mode counts the current uninterrupted screen-on stretch.
//! CumulativeDaily mode sums every screen-on segment of the calendar day.

use chrono::{DateTime, Local};

use crate::clock::day_key;
use crate::config::TrackingMode;
use crate::screen::{ScreenEdge, ScreenEvent};

/// Usage bookkeeping. Only [`UsageAccumulator`] writes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageState {
    /// Closed segments of the current cycle (CumulativeDaily only).
    pub accumulated_ms: u64,
    pub screen_on: bool,
    pub last_screen_on_at: DateTime<Local>,
    /// Start of the uninterrupted stretch (Continuous only).
    pub last_reset_at: DateTime<Local>,
    pub current_day_key: i32,
}

#[derive(Debug, Clone)]
pub struct UsageAccumulator {
    mode: TrackingMode,
    state: UsageState,
    /// Bumped every time usage is zeroed.
    cycle: u64,
}

impl UsageAccumulator {
    pub fn new(mode: TrackingMode, screen_on: bool, now: DateTime<Local>) -> Self {
        Self {
            mode,
            state: UsageState {
                accumulated_ms: 0,
                screen_on,
                last_screen_on_at: now,
                last_reset_at: now,
                current_day_key: day_key(&now),
            },
            cycle: 0,
        }
    }

    pub fn mode(&self) -> TrackingMode {
        self.mode
    }

    pub fn state(&self) -> &UsageState {
        &self.state
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Resume a Continuous cycle from the break persisted before a restart.
    ///
    /// Only applies when the screen is on and the break happened earlier today.
    pub fn resume_from(&mut self, last_break: DateTime<Local>, now: DateTime<Local>) -> bool {
        if self.mode != TrackingMode::Continuous
            || !self.state.screen_on
            || last_break > now
            || day_key(&last_break) != day_key(&now)
        {
            return false;
        }
        self.state.last_reset_at = last_break;
        true
    }

    pub fn apply(&mut self, event: ScreenEvent) {
        self.roll_day(event.at);
        match event.edge {
            ScreenEdge::On => self.screen_on(event.at),
            ScreenEdge::Off => self.screen_off(event.at),
        }
    }

    fn screen_on(&mut self, now: DateTime<Local>) {
        if self.state.screen_on {
            return;
        }
        self.state.screen_on = true;
        self.state.last_screen_on_at = now;
        if self.mode == TrackingMode::Continuous {
            self.state.last_reset_at = now;
        }
    }

    fn screen_off(&mut self, now: DateTime<Local>) {
        if !self.state.screen_on {
            return;
        }
        match self.mode {
            TrackingMode::Continuous => self.state.last_reset_at = now,
            TrackingMode::CumulativeDaily => {
                let segment = elapsed_ms(self.state.last_screen_on_at, now);
                self.state.accumulated_ms = self.state.accumulated_ms.saturating_add(segment);
            }
        }
        self.state.screen_on = false;
    }

    /// Usage counted toward the threshold so far.
    pub fn current_usage_ms(&self, now: DateTime<Local>) -> u64 {
        match self.mode {
            TrackingMode::Continuous => {
                if self.state.screen_on {
                    elapsed_ms(self.state.last_reset_at, now)
                } else {
                    0
                }
            }
            TrackingMode::CumulativeDaily => {
                let open = if self.state.screen_on {
                    elapsed_ms(self.state.last_screen_on_at, now)
                } else {
                    0
                };
                self.state.accumulated_ms.saturating_add(open)
            }
        }
    }

    /// Start a new cycle after a completed break.
    pub fn reset_cycle(&mut self, now: DateTime<Local>) {
        self.state.accumulated_ms = 0;
        self.state.last_reset_at = now;
        self.state.last_screen_on_at = now;
        self.cycle += 1;
    }

    /// Switch tracking mode. A real change resets the cycle.
    pub fn set_mode(&mut self, mode: TrackingMode, now: DateTime<Local>) -> bool {
        if self.mode == mode {
            return false;
        }
        self.mode = mode;
        self.reset_cycle(now);
        true
    }

    /// Handle a calendar-day change. Returns true when a new day began.
    ///
    /// In CumulativeDaily mode the day's total is cleared and an open segment is
    /// clipped to local midnight.
    pub fn roll_day(&mut self, now: DateTime<Local>) -> bool {
        let today = day_key(&now);
        if today == self.state.current_day_key {
            return false;
        }
        self.state.current_day_key = today;

        if self.mode == TrackingMode::CumulativeDaily {
            self.state.accumulated_ms = 0;
            self.cycle += 1;
            if self.state.screen_on {
                let midnight = start_of_day(&now).unwrap_or(now);
                self.state.last_screen_on_at = self.state.last_screen_on_at.max(midnight);
            }
        }
        true
    }
}

fn start_of_day(now: &DateTime<Local>) -> Option<DateTime<Local>> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)?
        .and_local_timezone(Local)
        .earliest()
}

fn elapsed_ms(from: DateTime<Local>, to: DateTime<Local>) -> u64 {
    u64::try_from((to - from).num_milliseconds()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::ScreenStateTracker;
    use chrono::{TimeDelta, TimeZone as _};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2025, 6, 14, h, m, s)
            .single()
            .expect("unambiguous local time")
    }

    fn secs(n: i64) -> TimeDelta {
        TimeDelta::seconds(n)
    }

    fn drive(acc: &mut UsageAccumulator, tracker: &mut ScreenStateTracker, on: bool, now: DateTime<Local>) {
        let event = if on {
            tracker.on_screen_on(now)
        } else {
            tracker.on_screen_off(now)
        };
        if let Some(event) = event {
            acc.apply(event);
        }
    }

    #[test]
    fn test_continuous_restarts_after_screen_off() {
        let start = at(9, 0, 0);
        let mut tracker = ScreenStateTracker::new(true);
        let mut acc = UsageAccumulator::new(TrackingMode::Continuous, true, start);

        let t = start + secs(200);
        assert_eq!(acc.current_usage_ms(t), 200_000);

        drive(&mut acc, &mut tracker, false, t);
        assert_eq!(acc.current_usage_ms(t + secs(30)), 0);

        let back_on = t + secs(60);
        drive(&mut acc, &mut tracker, true, back_on);
        assert_eq!(acc.current_usage_ms(back_on), 0);
        assert_eq!(acc.current_usage_ms(back_on + secs(10)), 10_000);
    }

    #[test]
    fn test_cumulative_sums_segments() {
        let start = at(9, 0, 0);
        let mut tracker = ScreenStateTracker::new(true);
        let mut acc = UsageAccumulator::new(TrackingMode::CumulativeDaily, true, start);

        drive(&mut acc, &mut tracker, false, start + secs(120));
        drive(&mut acc, &mut tracker, true, start + secs(600));
        drive(&mut acc, &mut tracker, false, start + secs(690));

        assert_eq!(acc.current_usage_ms(start + secs(1000)), 210_000);
        assert_eq!(acc.state().accumulated_ms, 210_000);
    }

    #[test]
    fn test_cumulative_counts_open_segment() {
        let start = at(9, 0, 0);
        let mut tracker = ScreenStateTracker::new(true);
        let mut acc = UsageAccumulator::new(TrackingMode::CumulativeDaily, true, start);

        drive(&mut acc, &mut tracker, false, start + secs(120));
        drive(&mut acc, &mut tracker, true, start + secs(300));
        assert_eq!(acc.current_usage_ms(start + secs(345)), 165_000);
    }

    #[test]
    fn test_cumulative_resets_at_midnight() {
        let evening = at(23, 0, 0);
        let mut tracker = ScreenStateTracker::new(true);
        let mut acc = UsageAccumulator::new(TrackingMode::CumulativeDaily, true, evening);

        drive(&mut acc, &mut tracker, false, evening + secs(120));
        assert_eq!(acc.state().accumulated_ms, 120_000);

        let next_morning = evening + TimeDelta::hours(9);
        assert!(acc.roll_day(next_morning));
        assert_eq!(acc.current_usage_ms(next_morning), 0);

        drive(&mut acc, &mut tracker, true, next_morning);
        assert_eq!(acc.current_usage_ms(next_morning + secs(90)), 90_000);
    }

    #[test]
    fn test_open_segment_is_clipped_to_midnight() {
        let late = at(23, 58, 0);
        let mut acc = UsageAccumulator::new(TrackingMode::CumulativeDaily, true, late);

        let after_midnight = late + secs(5 * 60);
        assert!(acc.roll_day(after_midnight));
        assert_eq!(acc.current_usage_ms(after_midnight), 3 * 60 * 1000);
        assert!(!acc.roll_day(after_midnight + secs(1)));
    }

    #[test]
    fn test_screen_off_after_midnight_rolls_first() {
        let late = at(23, 50, 0);
        let mut tracker = ScreenStateTracker::new(true);
        let mut acc = UsageAccumulator::new(TrackingMode::CumulativeDaily, true, late);

        // off at 00:10 without any poll in between
        drive(&mut acc, &mut tracker, false, late + secs(20 * 60));
        assert_eq!(acc.state().accumulated_ms, 10 * 60 * 1000);
    }

    #[test]
    fn test_reset_cycle_zeroes_usage() {
        let start = at(9, 0, 0);
        let mut acc = UsageAccumulator::new(TrackingMode::CumulativeDaily, true, start);
        let t = start + secs(400);
        assert_eq!(acc.cycle(), 0);
        acc.reset_cycle(t);
        assert_eq!(acc.cycle(), 1);
        assert_eq!(acc.current_usage_ms(t), 0);
        assert_eq!(acc.current_usage_ms(t + secs(3)), 3_000);
    }

    #[test]
    fn test_mode_switch_resets_cycle() {
        let start = at(9, 0, 0);
        let mut tracker = ScreenStateTracker::new(true);
        let mut acc = UsageAccumulator::new(TrackingMode::CumulativeDaily, true, start);
        drive(&mut acc, &mut tracker, false, start + secs(100));
        drive(&mut acc, &mut tracker, true, start + secs(200));

        let t = start + secs(250);
        assert!(!acc.set_mode(TrackingMode::CumulativeDaily, t));
        assert_eq!(acc.current_usage_ms(t), 150_000);

        assert!(acc.set_mode(TrackingMode::Continuous, t));
        assert_eq!(acc.current_usage_ms(t), 0);
        assert_eq!(acc.current_usage_ms(t + secs(7)), 7_000);
    }

    #[test]
    fn test_usage_never_decreases_between_resets() {
        let start = at(9, 0, 0);
        let mut tracker = ScreenStateTracker::new(true);
        let mut acc = UsageAccumulator::new(TrackingMode::CumulativeDaily, true, start);

        let mut last = 0;
        for step in 1..=20 {
            let now = start + secs(step * 15);
            drive(&mut acc, &mut tracker, step % 3 != 0, now);
            let usage = acc.current_usage_ms(now);
            assert!(usage >= last, "usage went from {last} to {usage}");
            last = usage;
        }
    }

    #[test]
    fn test_resume_from_last_break() {
        let start = at(9, 0, 0);
        let mut acc = UsageAccumulator::new(TrackingMode::Continuous, true, start);
        assert!(acc.resume_from(start - secs(120), start));
        assert_eq!(acc.current_usage_ms(start), 120_000);

        let mut acc = UsageAccumulator::new(TrackingMode::Continuous, false, start);
        assert!(!acc.resume_from(start - secs(120), start));

        let mut acc = UsageAccumulator::new(TrackingMode::Continuous, true, start);
        assert!(!acc.resume_from(start - TimeDelta::days(1), start));
        assert_eq!(acc.current_usage_ms(start), 0);
    }

    #[test]
    fn test_clock_going_backwards_reads_as_zero() {
        let start = at(9, 0, 0);
        let acc = UsageAccumulator::new(TrackingMode::Continuous, true, start);
        assert_eq!(acc.current_usage_ms(start - secs(30)), 0);
    }
}
