//! Block session state machine.
//!
//! ```text
//! Starting -> Active <-> Paused
//!               |
//!               v
//!           Completed
//! ```
//!
//! The session advances on per-second ticks driven by its owner. It never
//! talks to the surface itself.

use std::fmt;

use chrono::{DateTime, Local};

/// Identifies one enforcement request so late surface callbacks can be matched
/// (or ignored) against the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextToken(pub u64);

impl fmt::Display for ContextToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the break is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Full-screen blocking overlay.
    Overlay,
    /// High-priority notification. Degraded enforcement.
    Notification,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Overlay => f.write_str("overlay"),
            Channel::Notification => f.write_str("notification"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Waiting for the surface to confirm display.
    Starting,
    Active,
    /// Screen is off; the countdown is frozen.
    Paused,
    Completed,
}

/// Result of one countdown tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Countdown {
    /// Still unconfirmed after this many ticks.
    Waiting { ticks: u32 },
    Running { remaining: u32 },
    Frozen { remaining: u32 },
    /// Reached zero on this tick.
    Completed,
}

#[derive(Debug, Clone)]
pub struct BlockSession {
    token: ContextToken,
    channel: Channel,
    phase: SessionPhase,
    remaining_seconds: u32,
    started_at: DateTime<Local>,
    screen_on: bool,
    unconfirmed_ticks: u32,
}

impl BlockSession {
    /// Create a session. Notification sessions have nothing to confirm and
    /// start counting immediately.
    pub fn new(
        token: ContextToken,
        channel: Channel,
        duration_seconds: u32,
        screen_on: bool,
        now: DateTime<Local>,
    ) -> Self {
        let phase = match (channel, screen_on) {
            (Channel::Overlay, _) => SessionPhase::Starting,
            (Channel::Notification, true) => SessionPhase::Active,
            (Channel::Notification, false) => SessionPhase::Paused,
        };
        Self {
            token,
            channel,
            phase,
            remaining_seconds: duration_seconds,
            started_at: now,
            screen_on,
            unconfirmed_ticks: 0,
        }
    }

    pub fn token(&self) -> ContextToken {
        self.token
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn is_paused(&self) -> bool {
        self.phase == SessionPhase::Paused
    }

    /// The surface reported it is on screen. Returns true on the first confirmation.
    pub fn confirm_displayed(&mut self) -> bool {
        if self.phase != SessionPhase::Starting {
            return false;
        }
        self.phase = if self.screen_on {
            SessionPhase::Active
        } else {
            SessionPhase::Paused
        };
        true
    }

    /// Switch an unconfirmed overlay session to the notification channel.
    pub fn degrade_to_notification(&mut self) -> bool {
        if self.channel != Channel::Overlay || self.phase != SessionPhase::Starting {
            return false;
        }
        self.channel = Channel::Notification;
        self.confirm_displayed()
    }

    pub fn screen_off(&mut self) {
        self.screen_on = false;
        if self.phase == SessionPhase::Active {
            self.phase = SessionPhase::Paused;
        }
    }

    /// Returns true when this resumes a paused countdown.
    pub fn screen_on(&mut self) -> bool {
        self.screen_on = true;
        if self.phase != SessionPhase::Paused {
            return false;
        }
        self.phase = SessionPhase::Active;
        true
    }

    /// Advance by one second.
    pub fn tick(&mut self) -> Countdown {
        match self.phase {
            SessionPhase::Starting => {
                if self.screen_on {
                    self.unconfirmed_ticks += 1;
                }
                Countdown::Waiting {
                    ticks: self.unconfirmed_ticks,
                }
            }
            SessionPhase::Active => {
                self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
                if self.remaining_seconds == 0 {
                    self.phase = SessionPhase::Completed;
                    Countdown::Completed
                } else {
                    Countdown::Running {
                        remaining: self.remaining_seconds,
                    }
                }
            }
            SessionPhase::Paused | SessionPhase::Completed => Countdown::Frozen {
                remaining: self.remaining_seconds,
            },
        }
    }
}
