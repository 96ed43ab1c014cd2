//! Enforcement arbitration.
//!
//! The controller is the only place that creates or destroys a
//! [`BlockSession`] and the only place that produces surface requests. It does
//! not perform them: callers execute the returned [`SurfaceRequest`]s.

use chrono::{DateTime, Local};

use crate::config::BreakConfig;
use crate::screen::ScreenEdge;
use crate::session::{BlockSession, Channel, ContextToken, Countdown, SessionPhase};
use crate::usage::UsageAccumulator;

/// Countdown ticks a session may wait in `Starting` before it is abandoned.
pub const CONFIRM_TIMEOUT_TICKS: u32 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnforcementState {
    pub triggered_this_cycle: bool,
    pub session_active: bool,
}

/// Work for the host surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceRequest {
    Show {
        duration_seconds: u32,
        token: ContextToken,
    },
    Notify {
        duration_seconds: u32,
        token: ContextToken,
    },
    Hide {
        token: ContextToken,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Completed,
    SurfaceLost,
    Unconfirmed,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEnd {
    pub token: ContextToken,
    pub channel: Channel,
    pub reason: EndReason,
}

impl SessionEnd {
    /// Surface teardown owed for this ending, if any.
    pub fn teardown(&self) -> Option<SurfaceRequest> {
        match (self.channel, self.reason) {
            (Channel::Overlay, EndReason::SurfaceLost) | (Channel::Notification, _) => None,
            (Channel::Overlay, _) => Some(SurfaceRequest::Hide { token: self.token }),
        }
    }
}

#[derive(Debug, Default)]
pub struct EnforcementController {
    state: EnforcementState,
    session: Option<BlockSession>,
    next_token: u64,
    surface_in_front: bool,
    reassert_pending: bool,
}

impl EnforcementController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> EnforcementState {
        self.state
    }

    pub fn session(&self) -> Option<&BlockSession> {
        self.session.as_ref()
    }

    /// Accept at most one trigger per threshold crossing.
    pub fn try_trigger(
        &mut self,
        config: &BreakConfig,
        overlay_available: bool,
        screen_on: bool,
        now: DateTime<Local>,
    ) -> Option<SurfaceRequest> {
        if self.state.triggered_this_cycle || self.state.session_active {
            tracing::debug!(state = ?self.state, "trigger rejected");
            return None;
        }

        self.next_token += 1;
        let token = ContextToken(self.next_token);
        let channel = if overlay_available {
            Channel::Overlay
        } else {
            Channel::Notification
        };
        let duration_seconds = config.block_duration_seconds;

        self.session = Some(BlockSession::new(token, channel, duration_seconds, screen_on, now));
        self.state = EnforcementState {
            triggered_this_cycle: true,
            session_active: true,
        };
        self.surface_in_front = false;
        self.reassert_pending = true;

        tracing::info!(token = %token, channel = %channel, duration_seconds, "break triggered");

        Some(match channel {
            Channel::Overlay => SurfaceRequest::Show {
                duration_seconds,
                token,
            },
            Channel::Notification => SurfaceRequest::Notify {
                duration_seconds,
                token,
            },
        })
    }

    /// The overlay could not be shown; keep the break going as a notification.
    pub fn fall_back_to_notification(&mut self, token: ContextToken) -> Option<SurfaceRequest> {
        let session = self.current_mut(token)?;
        if !session.degrade_to_notification() {
            return None;
        }
        tracing::warn!(token = %token, "overlay unavailable, falling back to notification");
        Some(SurfaceRequest::Notify {
            duration_seconds: session.remaining_seconds(),
            token,
        })
    }

    /// Returns true when this confirmation starts the countdown.
    pub fn on_surface_shown(&mut self, token: ContextToken) -> bool {
        let Some(session) = self.current_mut(token) else {
            tracing::debug!(token = %token, "ignoring confirmation for stale token");
            return false;
        };
        let first = session.confirm_displayed();
        if first {
            tracing::info!(token = %token, phase = ?session.phase(), "block screen displayed");
        }
        self.surface_in_front = true;
        self.reassert_pending = false;
        first
    }

    /// The surface is alive but no longer in front.
    pub fn on_surface_hidden(&mut self, token: ContextToken) {
        if self.current_mut(token).is_some() {
            self.surface_in_front = false;
            self.reassert_pending = false;
        }
    }

    pub fn on_surface_lost(&mut self, token: ContextToken) -> Option<SessionEnd> {
        self.current_mut(token)?;
        self.on_session_aborted(EndReason::SurfaceLost)
    }

    /// Foreground feed says the surface is (or is not) the frontmost app.
    pub fn set_surface_in_front(&mut self, in_front: bool) {
        if self.session.is_none() {
            return;
        }
        if in_front {
            self.reassert_pending = false;
        }
        self.surface_in_front = in_front;
    }

    /// The host could not show the overlay for `token`.
    ///
    /// An unconfirmed session degrades to a notification. A failed re-assert
    /// clears the pending flag so a later foreground change may try again.
    pub fn on_show_failed(&mut self, token: ContextToken) -> Option<SurfaceRequest> {
        let phase = self.current_mut(token)?.phase();
        if phase == SessionPhase::Starting {
            return self.fall_back_to_notification(token);
        }
        self.reassert_pending = false;
        None
    }

    /// Ask for the overlay again if it lost the foreground.
    ///
    /// Idempotent: at most one request until the surface reports back.
    pub fn reassert(&mut self) -> Option<SurfaceRequest> {
        let session = self.session.as_ref()?;
        if session.channel() != Channel::Overlay
            || session.phase() == SessionPhase::Completed
            || self.surface_in_front
            || self.reassert_pending
        {
            return None;
        }
        self.reassert_pending = true;
        tracing::info!(token = %session.token(), "re-asserting block screen");
        Some(SurfaceRequest::Show {
            duration_seconds: session.remaining_seconds(),
            token: session.token(),
        })
    }

    /// Returns true when the edge resumed a paused countdown. The caller must
    /// restart its one-second tick from this instant.
    pub fn on_screen_edge(&mut self, edge: ScreenEdge) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        let resumed = match edge {
            ScreenEdge::On => session.screen_on(),
            ScreenEdge::Off => {
                session.screen_off();
                false
            }
        };
        tracing::debug!(token = %session.token(), phase = ?session.phase(), resumed, "session screen edge");
        resumed
    }

    /// Advance the countdown by one second.
    pub fn tick(&mut self, usage: &mut UsageAccumulator, now: DateTime<Local>) -> Option<SessionEnd> {
        let session = self.session.as_mut()?;
        match session.tick() {
            Countdown::Completed => self.on_session_complete(usage, now),
            Countdown::Waiting { ticks } if ticks >= CONFIRM_TIMEOUT_TICKS => {
                tracing::warn!(token = %session.token(), ticks, "block screen never confirmed");
                self.on_session_aborted(EndReason::Unconfirmed)
            }
            _ => None,
        }
    }

    /// Finish the break: clear the guard and start a new usage cycle.
    pub fn on_session_complete(
        &mut self,
        usage: &mut UsageAccumulator,
        now: DateTime<Local>,
    ) -> Option<SessionEnd> {
        let end = self.end_session(EndReason::Completed)?;
        usage.reset_cycle(now);
        Some(end)
    }

    /// Drop the session without touching usage, so the next poll re-evaluates.
    pub fn on_session_aborted(&mut self, reason: EndReason) -> Option<SessionEnd> {
        self.end_session(reason)
    }

    fn end_session(&mut self, reason: EndReason) -> Option<SessionEnd> {
        let session = self.session.take()?;
        self.state = EnforcementState::default();
        self.surface_in_front = false;
        self.reassert_pending = false;

        let end = SessionEnd {
            token: session.token(),
            channel: session.channel(),
            reason,
        };
        match reason {
            EndReason::Completed => {
                tracing::info!(token = %end.token, "break completed");
            }
            _ => {
                tracing::warn!(
                    token = %end.token,
                    reason = ?reason,
                    remaining_seconds = session.remaining_seconds(),
                    "break aborted"
                );
            }
        }
        Some(end)
    }

    fn current_mut(&mut self, token: ContextToken) -> Option<&mut BlockSession> {
        self.session.as_mut().filter(|session| session.token() == token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingMode;
    use chrono::TimeDelta;

    fn config(duration: u32) -> BreakConfig {
        BreakConfig {
            usage_threshold_seconds: 5,
            block_duration_seconds: duration,
            ..Default::default()
        }
    }

    fn token_of(request: Option<SurfaceRequest>) -> ContextToken {
        match request {
            Some(SurfaceRequest::Show { token, .. } | SurfaceRequest::Notify { token, .. }) => token,
            other => panic!("expected a show request, got {other:?}"),
        }
    }

    #[test]
    fn test_at_most_one_trigger_per_crossing() {
        let now = Local::now();
        let mut controller = EnforcementController::new();
        let mut usage = UsageAccumulator::new(TrackingMode::Continuous, true, now);

        let token = token_of(controller.try_trigger(&config(1), true, true, now));
        assert!(controller.try_trigger(&config(1), true, true, now).is_none());
        assert!(controller.state().session_active);

        assert!(controller.on_surface_shown(token));
        let end = controller.tick(&mut usage, now).expect("completes");
        assert_eq!(end.reason, EndReason::Completed);
        assert_eq!(end.teardown(), Some(SurfaceRequest::Hide { token }));
        assert_eq!(controller.state(), EnforcementState::default());

        let next = token_of(controller.try_trigger(&config(1), true, true, now));
        assert_ne!(next, token);
    }

    #[test]
    fn test_completion_resets_usage_but_abort_does_not() {
        let start = Local::now();
        let later = start + TimeDelta::seconds(60);
        let mut controller = EnforcementController::new();
        let mut usage = UsageAccumulator::new(TrackingMode::Continuous, true, start);

        let token = token_of(controller.try_trigger(&config(3), true, true, later));
        let end = controller.on_surface_lost(token).expect("aborted");
        assert_eq!(end.reason, EndReason::SurfaceLost);
        assert_eq!(end.teardown(), None);
        assert_eq!(usage.current_usage_ms(later), 60_000);
        assert!(!controller.state().triggered_this_cycle);

        controller.try_trigger(&config(3), false, true, later);
        controller.on_session_complete(&mut usage, later);
        assert_eq!(usage.current_usage_ms(later), 0);
    }

    #[test]
    fn test_stale_tokens_are_ignored() {
        let now = Local::now();
        let mut controller = EnforcementController::new();
        let token = token_of(controller.try_trigger(&config(3), true, true, now));
        let stale = ContextToken(token.0 + 100);

        assert!(!controller.on_surface_shown(stale));
        assert!(controller.on_surface_lost(stale).is_none());
        assert!(controller.state().session_active);
    }

    #[test]
    fn test_notification_when_overlay_unavailable() {
        let now = Local::now();
        let mut controller = EnforcementController::new();
        let request = controller.try_trigger(&config(3), false, true, now);
        assert!(matches!(request, Some(SurfaceRequest::Notify { duration_seconds: 3, .. })));
        let session = controller.session().expect("session");
        assert_eq!(session.phase(), SessionPhase::Active);
        assert!(controller.reassert().is_none());
    }

    #[test]
    fn test_fall_back_after_show_failure() {
        let now = Local::now();
        let mut controller = EnforcementController::new();
        let token = token_of(controller.try_trigger(&config(4), true, true, now));
        assert_eq!(
            controller.fall_back_to_notification(token),
            Some(SurfaceRequest::Notify {
                duration_seconds: 4,
                token
            })
        );
        assert!(controller.fall_back_to_notification(token).is_none());
        assert_eq!(controller.session().map(BlockSession::channel), Some(Channel::Notification));
    }

    #[test]
    fn test_unconfirmed_session_times_out() {
        let now = Local::now();
        let mut controller = EnforcementController::new();
        let mut usage = UsageAccumulator::new(TrackingMode::Continuous, true, now);
        controller.try_trigger(&config(30), true, true, now);

        for _ in 1..CONFIRM_TIMEOUT_TICKS {
            assert!(controller.tick(&mut usage, now).is_none());
        }
        let end = controller.tick(&mut usage, now).expect("timed out");
        assert_eq!(end.reason, EndReason::Unconfirmed);
        assert!(matches!(end.teardown(), Some(SurfaceRequest::Hide { .. })));
    }

    #[test]
    fn test_reassert_once_per_hidden_period() {
        let now = Local::now();
        let mut controller = EnforcementController::new();
        let token = token_of(controller.try_trigger(&config(30), true, true, now));

        // show already in flight
        assert!(controller.reassert().is_none());
        controller.on_surface_shown(token);
        assert!(controller.reassert().is_none());

        controller.on_surface_hidden(token);
        assert!(controller.reassert().is_some());
        assert!(controller.reassert().is_none());

        controller.on_surface_shown(token);
        controller.set_surface_in_front(false);
        assert!(controller.reassert().is_some());
    }

    #[test]
    fn test_failed_reassert_allows_retry() {
        let now = Local::now();
        let mut controller = EnforcementController::new();
        let token = token_of(controller.try_trigger(&config(30), true, true, now));
        controller.on_surface_shown(token);

        controller.set_surface_in_front(false);
        assert!(controller.reassert().is_some());
        assert!(controller.reassert().is_none());

        assert!(controller.on_show_failed(token).is_none());
        assert_eq!(controller.session().map(BlockSession::channel), Some(Channel::Overlay));
        assert!(controller.reassert().is_some());
    }

    #[test]
    fn test_failed_first_show_degrades() {
        let now = Local::now();
        let mut controller = EnforcementController::new();
        let token = token_of(controller.try_trigger(&config(6), true, true, now));

        assert!(matches!(
            controller.on_show_failed(token),
            Some(SurfaceRequest::Notify { duration_seconds: 6, .. })
        ));
        assert!(controller.on_show_failed(ContextToken(token.0 + 1)).is_none());
    }

    #[test]
    fn test_screen_on_reports_resume() {
        let now = Local::now();
        let mut controller = EnforcementController::new();
        assert!(!controller.on_screen_edge(ScreenEdge::On));

        let token = token_of(controller.try_trigger(&config(30), true, true, now));
        assert!(!controller.on_screen_edge(ScreenEdge::Off));
        assert!(!controller.on_screen_edge(ScreenEdge::On));

        controller.on_surface_shown(token);
        assert!(!controller.on_screen_edge(ScreenEdge::Off));
        assert!(controller.on_screen_edge(ScreenEdge::On));
    }
}
