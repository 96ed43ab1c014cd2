//! Process-backed host collaborators.
//!
//! The block screen is an external program. It is expected to report back
//! through the control socket (`screenrest shown <token>` once visible,
//! `hidden`/`lost` as appropriate). A program that exits on its own is
//! reported as lost by [`CommandSurface::exited`].

use chrono::Utc;
use color_eyre::eyre::{WrapErr as _, eyre};
use rest_core::{
    Clock, ContextToken, Coordinates, EnforcementSurface, LocationFix, LocationProvider, Notifier,
};
use std::collections::HashMap;
use std::process::{Child, Command};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Substitute `{duration}` and `{token}` in each argument.
pub fn expand(args: &[String], duration_seconds: u32, token: Option<ContextToken>) -> Vec<String> {
    let duration = duration_seconds.to_string();
    let token = token.map(|t| t.to_string()).unwrap_or_default();
    args.iter()
        .map(|arg| arg.replace("{duration}", &duration).replace("{token}", &token))
        .collect()
}

fn spawn(argv: &[String]) -> color_eyre::eyre::Result<Child> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| eyre!("empty command"))?;
    Command::new(program)
        .args(args)
        .spawn()
        .wrap_err_with(|| format!("failed to launch {program}"))
}

/// Runs the configured overlay program, one process per break.
pub struct CommandSurface {
    command: Option<Vec<String>>,
    running: Mutex<HashMap<ContextToken, Child>>,
}

impl CommandSurface {
    pub fn new(command: Option<Vec<String>>) -> Self {
        Self {
            command: command.filter(|argv| !argv.is_empty()),
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Tokens whose overlay process has exited since the last call.
    pub fn exited(&self) -> Vec<ContextToken> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        let mut gone = Vec::new();
        running.retain(|token, child| match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                info!(token = %token, %status, "overlay process exited");
                gone.push(*token);
                false
            }
            Err(e) => {
                warn!(token = %token, error = %e, "failed to poll overlay process");
                true
            }
        });
        gone
    }

    fn stop(token: ContextToken, mut child: Child) -> color_eyre::eyre::Result<()> {
        if child.try_wait()?.is_none() {
            child
                .kill()
                .wrap_err_with(|| format!("failed to stop overlay for break {token}"))?;
        }
        child.wait()?;
        Ok(())
    }
}

impl EnforcementSurface for CommandSurface {
    fn overlay_available(&self) -> bool {
        self.command.is_some()
    }

    fn show(&self, duration_seconds: u32, token: ContextToken) -> color_eyre::eyre::Result<()> {
        let template = self
            .command
            .as_deref()
            .ok_or_else(|| eyre!("no overlay command configured"))?;
        let argv = expand(template, duration_seconds, Some(token));

        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        // relaunch brings it back to the front
        if let Some(previous) = running.remove(&token) {
            Self::stop(token, previous)?;
        }
        let child = spawn(&argv)?;
        info!(token = %token, pid = child.id(), duration_seconds, "overlay launched");
        running.insert(token, child);
        Ok(())
    }

    fn hide(&self, token: ContextToken) -> color_eyre::eyre::Result<()> {
        let child = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&token);
        match child {
            Some(child) => {
                Self::stop(token, child)?;
                info!(token = %token, "overlay closed");
            }
            None => debug!(token = %token, "overlay already gone"),
        }
        Ok(())
    }
}

/// Posts break notifications through an optional command and logs status.
pub struct CommandNotifier {
    command: Option<Vec<String>>,
}

impl CommandNotifier {
    pub fn new(command: Option<Vec<String>>) -> Self {
        Self {
            command: command.filter(|argv| !argv.is_empty()),
        }
    }
}

impl Notifier for CommandNotifier {
    fn show_break_notification(&self, duration_seconds: u32) -> color_eyre::eyre::Result<()> {
        let Some(template) = self.command.as_deref() else {
            info!(duration_seconds, "time for a break");
            return Ok(());
        };
        let mut child = spawn(&expand(template, duration_seconds, None))?;
        // reap in the background
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(())
    }

    fn update_status_notification(&self, used: Duration, remaining: Duration) {
        debug!(
            used_secs = used.as_secs(),
            remaining_secs = remaining.as_secs(),
            "usage"
        );
    }
}

/// Location provider backed by a fixed position from the config file.
pub struct StaticLocation {
    fix: Option<Coordinates>,
    clock: Arc<dyn Clock>,
}

impl StaticLocation {
    pub fn new(fix: Option<Coordinates>, clock: Arc<dyn Clock>) -> Self {
        Self { fix, clock }
    }
}

impl LocationProvider for StaticLocation {
    fn permission_granted(&self) -> bool {
        self.fix.is_some()
    }

    async fn last_fix(&self) -> Option<LocationFix> {
        self.fix.map(|coordinates| LocationFix {
            coordinates,
            at: self.clock.now().with_timezone(&Utc),
        })
    }
}
