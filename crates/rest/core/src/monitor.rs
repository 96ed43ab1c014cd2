//! Periodic threshold monitor and published status.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::WrapErr as _;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::BreakConfig;
use crate::engine::EngineHandle;
use crate::location::{LocationGate, LocationProvider};
use crate::surface::Notifier;

/// Published engine status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub used_ms: u64,
    pub remaining_ms: u64,
    pub threshold_ms: u64,
    pub session_active: bool,
    /// A break is due but the device is outside the target location.
    pub deferred_by_location: bool,
    pub block_remaining_seconds: Option<u32>,
    /// Usage cycle the usage fields belong to.
    pub usage_cycle: u64,
}

impl Status {
    pub fn new(config: &BreakConfig) -> Self {
        Self {
            remaining_ms: config.threshold_ms(),
            threshold_ms: config.threshold_ms(),
            ..Default::default()
        }
    }

    /// Publish usage from `snapshot`. Returns false and leaves the status alone
    /// when a newer cycle has already been published.
    pub fn record_usage(&mut self, snapshot: &UsageSnapshot, deferred_by_location: bool) -> bool {
        if snapshot.usage_cycle < self.usage_cycle {
            return false;
        }
        self.usage_cycle = snapshot.usage_cycle;
        self.threshold_ms = snapshot.config.threshold_ms();
        self.used_ms = snapshot.usage_ms;
        self.remaining_ms = self.threshold_ms.saturating_sub(snapshot.usage_ms);
        self.deferred_by_location = deferred_by_location;
        true
    }

    /// Usage was zeroed by a completed break.
    pub fn start_cycle(&mut self, usage_cycle: u64) {
        self.usage_cycle = usage_cycle;
        self.used_ms = 0;
        self.remaining_ms = self.threshold_ms;
        self.deferred_by_location = false;
    }

    /// One-line human readable summary.
    pub fn summary(&self) -> String {
        if self.session_active {
            return match self.block_remaining_seconds {
                Some(seconds) => format!("on a break, {seconds}s left"),
                None => "on a break".to_string(),
            };
        }
        let mut line = format!(
            "used {} of {}, {} until the next break",
            human(self.used_ms),
            human(self.threshold_ms),
            human(self.remaining_ms)
        );
        if self.deferred_by_location {
            line.push_str(" (outside target location, break deferred)");
        }
        line
    }
}

fn human(ms: u64) -> String {
    let secs = ms / 1000;
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m {:02}s", secs / 60, secs % 60),
        _ => format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60),
    }
}

/// Point-in-time view of the engine state read by the monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageSnapshot {
    pub config: BreakConfig,
    pub usage_ms: u64,
    pub session_active: bool,
    pub block_remaining_seconds: Option<u32>,
    pub screen_on: bool,
    pub usage_cycle: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    /// A session is running; nothing to evaluate.
    Blocked,
    Tracking,
    /// Threshold reached while the screen is on.
    Due,
}

pub fn decide_tick(snapshot: &UsageSnapshot) -> TickDecision {
    if snapshot.session_active {
        TickDecision::Blocked
    } else if snapshot.screen_on && snapshot.usage_ms >= snapshot.config.threshold_ms() {
        TickDecision::Due
    } else {
        TickDecision::Tracking
    }
}

/// Polls usage on a fixed interval and requests enforcement when due.
pub struct ThresholdMonitor<P> {
    handle: EngineHandle,
    gate: Arc<LocationGate<P>>,
    notifier: Arc<dyn Notifier>,
    status_tx: Arc<watch::Sender<Status>>,
    poll_interval: Duration,
}

impl<P> Clone for ThresholdMonitor<P> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            gate: Arc::clone(&self.gate),
            notifier: Arc::clone(&self.notifier),
            status_tx: Arc::clone(&self.status_tx),
            poll_interval: self.poll_interval,
        }
    }
}

impl<P: LocationProvider + 'static> ThresholdMonitor<P> {
    pub fn new(
        handle: EngineHandle,
        gate: Arc<LocationGate<P>>,
        notifier: Arc<dyn Notifier>,
        status_tx: Arc<watch::Sender<Status>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            handle,
            gate,
            notifier,
            status_tx,
            poll_interval,
        }
    }

    /// Run until cancelled. A failing or panicking tick is logged and the
    /// loop carries on at the next interval.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(poll_interval = ?self.poll_interval, "threshold monitor started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let monitor = self.clone();
            let mut tick = tokio::spawn(async move { monitor.tick().await });
            let outcome = tokio::select! {
                () = cancel.cancelled() => {
                    tick.abort();
                    break;
                }
                outcome = &mut tick => outcome,
            };

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(error = ?err, "monitor tick failed"),
                Err(err) => tracing::error!(error = %err, "monitor tick panicked"),
            }
        }

        tracing::info!("threshold monitor stopped");
    }

    /// One evaluation: read, gate, maybe trigger, publish.
    pub async fn tick(&self) -> color_eyre::eyre::Result<()> {
        let snapshot = self
            .handle
            .snapshot()
            .await
            .wrap_err("failed to read usage snapshot")?;

        let decision = decide_tick(&snapshot);
        let mut deferred = false;

        if decision == TickDecision::Due {
            let gate = self.gate.evaluate(&snapshot.config).await;
            if self.gate.decision_permits(gate) {
                let accepted = self
                    .handle
                    .trigger_if_due()
                    .await
                    .wrap_err("failed to request enforcement")?;
                tracing::debug!(accepted, usage_ms = snapshot.usage_ms, ?gate, "break due");
            } else {
                deferred = true;
                tracing::info!(?gate, usage_ms = snapshot.usage_ms, "break deferred by location");
            }
        }

        let published = self
            .status_tx
            .send_if_modified(|status| status.record_usage(&snapshot, deferred));
        if !published {
            tracing::debug!(usage_cycle = snapshot.usage_cycle, "dropping usage from a finished cycle");
            return Ok(());
        }

        if decision != TickDecision::Blocked {
            let (used, remaining) = {
                let status = self.status_tx.borrow();
                (
                    Duration::from_millis(status.used_ms),
                    Duration::from_millis(status.remaining_ms),
                )
            };
            let notifier = Arc::clone(&self.notifier);
            tokio::task::spawn_blocking(move || notifier.update_status_notification(used, remaining))
                .await
                .wrap_err("status notification task failed")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(usage_ms: u64, session_active: bool, screen_on: bool) -> UsageSnapshot {
        UsageSnapshot {
            config: BreakConfig {
                usage_threshold_seconds: 5,
                ..Default::default()
            },
            usage_ms,
            session_active,
            block_remaining_seconds: None,
            screen_on,
            usage_cycle: 0,
        }
    }

    #[test]
    fn test_decide_tick() {
        assert_eq!(decide_tick(&snapshot(4_999, false, true)), TickDecision::Tracking);
        assert_eq!(decide_tick(&snapshot(5_000, false, true)), TickDecision::Due);
        assert_eq!(decide_tick(&snapshot(9_000, true, true)), TickDecision::Blocked);
        assert_eq!(decide_tick(&snapshot(9_000, false, false)), TickDecision::Tracking);
    }

    #[test]
    fn test_status_summary() {
        let mut status = Status::new(&BreakConfig::default());
        status.record_usage(
            &UsageSnapshot {
                config: BreakConfig::default(),
                usage_ms: 200_000,
                session_active: false,
                block_remaining_seconds: None,
                screen_on: true,
                usage_cycle: 0,
            },
            false,
        );
        assert_eq!(status.remaining_ms, 100_000);
        assert_eq!(
            status.summary(),
            "used 3m 20s of 5m 00s, 1m 40s until the next break"
        );

        status.deferred_by_location = true;
        assert!(status.summary().ends_with("(outside target location, break deferred)"));

        status.session_active = true;
        status.block_remaining_seconds = Some(12);
        assert_eq!(status.summary(), "on a break, 12s left");
    }

    #[test]
    fn test_remaining_saturates_past_threshold() {
        let mut status = Status::default();
        status.record_usage(&snapshot(7_000, false, true), false);
        assert_eq!(status.remaining_ms, 0);
        assert_eq!(human(3_725_000), "1h 02m");
    }

    #[test]
    fn test_stale_snapshot_does_not_undo_reset() {
        let mut status = Status::new(&BreakConfig {
            usage_threshold_seconds: 5,
            ..Default::default()
        });
        assert!(status.record_usage(&snapshot(5_200, false, true), false));
        assert_eq!(status.used_ms, 5_200);

        status.start_cycle(1);
        assert!(!status.record_usage(&snapshot(5_400, false, true), false));
        assert_eq!(status.used_ms, 0);
        assert_eq!(status.remaining_ms, 5_000);

        let fresh = UsageSnapshot {
            usage_cycle: 1,
            ..snapshot(300, false, true)
        };
        assert!(status.record_usage(&fresh, false));
        assert_eq!(status.used_ms, 300);
    }
}
