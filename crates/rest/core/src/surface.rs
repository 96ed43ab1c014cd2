//! Host-side outputs: enforcement surface, notifications and the break log.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::session::ContextToken;

/// Full-screen blocking surface.
///
/// Requests are fire-and-forget. The host reports back through the engine
/// handle (`surface_shown`, `surface_hidden`, `surface_lost`) with the token it
/// was given.
pub trait EnforcementSurface: Send + Sync {
    /// Whether the host may draw over other apps right now.
    fn overlay_available(&self) -> bool;

    /// Display the block screen. Repeated calls for the same token bring it back
    /// to the front.
    fn show(&self, duration_seconds: u32, token: ContextToken) -> color_eyre::eyre::Result<()>;

    /// Tear the block screen down.
    fn hide(&self, token: ContextToken) -> color_eyre::eyre::Result<()>;
}

/// User-visible notifications.
pub trait Notifier: Send + Sync {
    /// Fallback when no overlay is available.
    fn show_break_notification(&self, duration_seconds: u32) -> color_eyre::eyre::Result<()>;

    /// Ongoing usage summary.
    fn update_status_notification(&self, used: Duration, remaining: Duration);
}

/// Persisted timestamp of the last completed break.
pub trait BreakLog: Send + Sync {
    fn last_break(&self) -> Option<DateTime<Utc>>;

    /// Fire-and-forget. Implementations log their own failures.
    fn record_break(&self, at: DateTime<Utc>);
}

/// Break log that remembers nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBreakLog;

impl BreakLog for NoBreakLog {
    fn last_break(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn record_break(&self, _at: DateTime<Utc>) {}
}
