//! Screen power-state tracking.

use chrono::{DateTime, Local};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenEdge {
    On,
    Off,
}

/// A screen power transition and when it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenEvent {
    pub edge: ScreenEdge,
    pub at: DateTime<Local>,
}

/// Turns raw power signals into timestamped edges.
///
/// The host may deliver the same signal twice (or start up without knowing the
/// state); repeated signals produce no event.
#[derive(Debug, Clone)]
pub struct ScreenStateTracker {
    screen_on: bool,
}

impl ScreenStateTracker {
    pub fn new(screen_on: bool) -> Self {
        Self { screen_on }
    }

    pub fn is_on(&self) -> bool {
        self.screen_on
    }

    pub fn on_screen_on(&mut self, now: DateTime<Local>) -> Option<ScreenEvent> {
        self.transition(true, now)
    }

    pub fn on_screen_off(&mut self, now: DateTime<Local>) -> Option<ScreenEvent> {
        self.transition(false, now)
    }

    fn transition(&mut self, screen_on: bool, now: DateTime<Local>) -> Option<ScreenEvent> {
        if self.screen_on == screen_on {
            return None;
        }
        self.screen_on = screen_on;
        Some(ScreenEvent {
            edge: if screen_on {
                ScreenEdge::On
            } else {
                ScreenEdge::Off
            },
            at: now,
        })
    }
}
