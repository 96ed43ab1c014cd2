//! Foreground watchdog for active breaks.

use serde::{Deserialize, Serialize};

use crate::controller::{EnforcementController, SurfaceRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogStrategy {
    /// Bring the block screen back when another app takes the foreground.
    #[default]
    Reassert,
    /// Ignore the foreground feed.
    Disabled,
}

/// Watches foreground-app changes while a session is active.
///
/// Never starts a session. Without a foreground feed it simply never fires.
#[derive(Debug, Clone)]
pub struct AccessibilityWatchdog {
    strategy: WatchdogStrategy,
    surface_app_id: String,
    last_foreground: Option<String>,
}

impl AccessibilityWatchdog {
    pub fn new(strategy: WatchdogStrategy, surface_app_id: impl Into<String>) -> Self {
        Self {
            strategy,
            surface_app_id: surface_app_id.into(),
            last_foreground: None,
        }
    }

    pub fn last_foreground(&self) -> Option<&str> {
        self.last_foreground.as_deref()
    }

    pub fn on_foreground_change(
        &mut self,
        app_id: &str,
        controller: &mut EnforcementController,
    ) -> Option<SurfaceRequest> {
        self.last_foreground = Some(app_id.to_string());

        if self.strategy == WatchdogStrategy::Disabled || !controller.state().session_active {
            return None;
        }

        let in_front = app_id == self.surface_app_id;
        controller.set_surface_in_front(in_front);
        if in_front {
            return None;
        }
        tracing::debug!(app_id = %app_id, "foreground left the block screen");
        controller.reassert()
    }

    /// The surface reported it went to the background.
    pub fn on_surface_hidden(&self, controller: &mut EnforcementController) -> Option<SurfaceRequest> {
        if self.strategy == WatchdogStrategy::Disabled {
            return None;
        }
        controller.reassert()
    }
}
