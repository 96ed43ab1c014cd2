//! Engine wiring: the state actor, its handle and the monitor task.
//!
//! All mutable state (screen tracker, usage, enforcement controller, watchdog
//! and the current config) lives in one actor task. Everything else talks to
//! it through [`EngineHandle`]. Host calls that may block (surface, notifier,
//! break log) run on a separate worker so the actor never waits on them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::BreakConfig;
use crate::controller::{EndReason, EnforcementController, SessionEnd, SurfaceRequest};
use crate::location::{GateOptions, LocationGate, LocationProvider};
use crate::monitor::{Status, ThresholdMonitor, UsageSnapshot};
use crate::screen::ScreenStateTracker;
use crate::session::{BlockSession, ContextToken};
use crate::surface::{BreakLog, EnforcementSurface, Notifier};
use crate::usage::UsageAccumulator;
use crate::watchdog::{AccessibilityWatchdog, WatchdogStrategy};

const COUNTDOWN_PERIOD: Duration = Duration::from_secs(1);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine is not running")]
    Stopped,
}

/// Host collaborators.
pub struct Host<P> {
    pub clock: Arc<dyn Clock>,
    pub location: P,
    pub surface: Arc<dyn EnforcementSurface>,
    pub notifier: Arc<dyn Notifier>,
    pub break_log: Arc<dyn BreakLog>,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub poll_interval: Duration,
    pub watchdog: WatchdogStrategy,
    /// App id the foreground feed reports for the block screen.
    pub surface_app_id: String,
    pub gate: GateOptions,
    pub initial_screen_on: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            watchdog: WatchdogStrategy::Reassert,
            surface_app_id: "screenrest-overlay".to_string(),
            gate: GateOptions::default(),
            initial_screen_on: true,
        }
    }
}

enum Command {
    ScreenOn,
    ScreenOff,
    SurfaceShown(ContextToken),
    SurfaceHidden(ContextToken),
    SurfaceLost(ContextToken),
    /// The host worker could not show the overlay.
    ShowFailed(ContextToken),
    Foreground(String),
    Snapshot(oneshot::Sender<UsageSnapshot>),
    Trigger {
        recheck_threshold: bool,
        reply: oneshot::Sender<bool>,
    },
}

/// Cheap, cloneable entry point into a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<Status>,
}

impl EngineHandle {
    fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commands.send(command).map_err(|_| EngineError::Stopped)
    }

    pub fn screen_on(&self) -> Result<(), EngineError> {
        self.send(Command::ScreenOn)
    }

    pub fn screen_off(&self) -> Result<(), EngineError> {
        self.send(Command::ScreenOff)
    }

    /// The block screen for `token` is on screen.
    pub fn surface_shown(&self, token: ContextToken) -> Result<(), EngineError> {
        self.send(Command::SurfaceShown(token))
    }

    /// The block screen is alive but went to the background.
    pub fn surface_hidden(&self, token: ContextToken) -> Result<(), EngineError> {
        self.send(Command::SurfaceHidden(token))
    }

    /// The block screen went away before the break finished.
    pub fn surface_lost(&self, token: ContextToken) -> Result<(), EngineError> {
        self.send(Command::SurfaceLost(token))
    }

    pub fn foreground_changed(&self, app_id: impl Into<String>) -> Result<(), EngineError> {
        self.send(Command::Foreground(app_id.into()))
    }

    pub async fn snapshot(&self) -> Result<UsageSnapshot, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply))?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    /// Start a break now, regardless of usage. Still at most one per cycle.
    pub async fn try_trigger(&self) -> Result<bool, EngineError> {
        self.trigger(false).await
    }

    /// Start a break if usage is still at or above the threshold.
    pub(crate) async fn trigger_if_due(&self) -> Result<bool, EngineError> {
        self.trigger(true).await
    }

    async fn trigger(&self, recheck_threshold: bool) -> Result<bool, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Trigger {
            recheck_threshold,
            reply,
        })?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    pub fn status(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }
}

/// A running engine. Dropping it without [`Engine::stop`] leaves the tasks running.
pub struct Engine {
    handle: EngineHandle,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Spawn the state actor, the host worker and the threshold monitor on the
    /// current runtime.
    pub fn start<P: LocationProvider + 'static>(
        host: Host<P>,
        options: EngineOptions,
        config_rx: watch::Receiver<BreakConfig>,
    ) -> Engine {
        let config = {
            let initial = config_rx.borrow().clone();
            match initial.validate() {
                Ok(()) => initial,
                Err(err) => {
                    tracing::warn!(error = %err, "initial config rejected, using defaults");
                    BreakConfig::default()
                }
            }
        };

        let now = host.clock.now();
        let mut usage = UsageAccumulator::new(config.tracking_mode, options.initial_screen_on, now);
        if let Some(last_break) = host.break_log.last_break() {
            if usage.resume_from(last_break.with_timezone(&Local), now) {
                tracing::info!(%last_break, "resuming usage cycle from last break");
            }
        }

        let (status_tx, status_rx) = watch::channel(Status::new(&config));
        let status_tx = Arc::new(status_tx);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (outputs_tx, outputs_rx) = mpsc::unbounded_channel();
        let worker = HostWorker {
            surface: Arc::clone(&host.surface),
            notifier: Arc::clone(&host.notifier),
            break_log: host.break_log,
            commands: commands_tx.clone(),
        };
        let handle = EngineHandle {
            commands: commands_tx,
            status: status_rx,
        };
        let cancel = CancellationToken::new();

        let actor = Actor {
            clock: Arc::clone(&host.clock),
            surface: host.surface,
            outputs: outputs_tx,
            status_tx: Arc::clone(&status_tx),
            screen: ScreenStateTracker::new(options.initial_screen_on),
            usage,
            controller: EnforcementController::new(),
            watchdog: AccessibilityWatchdog::new(options.watchdog, options.surface_app_id.clone()),
            config,
            config_open: true,
            countdown: None,
        };

        let gate = LocationGate::new(host.location, options.gate, host.clock);
        let monitor = ThresholdMonitor::new(
            handle.clone(),
            Arc::new(gate),
            host.notifier,
            status_tx,
            options.poll_interval,
        );

        let tasks = vec![
            tokio::spawn(actor.run(commands_rx, config_rx, cancel.clone())),
            tokio::spawn(monitor.run(cancel.clone())),
            tokio::spawn(worker.run(outputs_rx)),
        ];

        tracing::info!(
            poll_interval = ?options.poll_interval,
            watchdog = ?options.watchdog,
            "engine started"
        );

        Engine {
            handle,
            cancel,
            tasks,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Cancel the monitor and countdown, abort any session and wait until the
    /// host worker has flushed the teardown.
    pub async fn stop(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "engine task failed");
            }
        }
        tracing::info!("engine stopped");
    }
}

enum Event {
    Command(Command),
    ConfigChanged,
    ConfigClosed,
    Countdown,
}

/// Side effects the actor hands to the host worker, in order.
#[derive(Debug)]
enum Output {
    Surface(SurfaceRequest),
    RecordBreak(DateTime<Utc>),
}

/// Performs host calls off the actor, one at a time.
struct HostWorker {
    surface: Arc<dyn EnforcementSurface>,
    notifier: Arc<dyn Notifier>,
    break_log: Arc<dyn BreakLog>,
    commands: mpsc::UnboundedSender<Command>,
}

impl HostWorker {
    /// Drains `outputs` until the actor drops its sender.
    async fn run(self, mut outputs: mpsc::UnboundedReceiver<Output>) {
        while let Some(output) = outputs.recv().await {
            let surface = Arc::clone(&self.surface);
            let notifier = Arc::clone(&self.notifier);
            let break_log = Arc::clone(&self.break_log);
            let outcome =
                tokio::task::spawn_blocking(move || host_call(&*surface, &*notifier, &*break_log, output))
                    .await;
            match outcome {
                Ok(Some(token)) => {
                    // actor gone during shutdown
                    let _ = self.commands.send(Command::ShowFailed(token));
                }
                Ok(None) => {}
                Err(err) => tracing::error!(error = %err, "host call panicked"),
            }
        }
    }
}

/// Run one host call. Returns the token of an overlay that failed to show.
fn host_call(
    surface: &dyn EnforcementSurface,
    notifier: &dyn Notifier,
    break_log: &dyn BreakLog,
    output: Output,
) -> Option<ContextToken> {
    match output {
        Output::Surface(SurfaceRequest::Show {
            duration_seconds,
            token,
        }) => {
            if let Err(err) = surface.show(duration_seconds, token) {
                tracing::error!(token = %token, error = ?err, "failed to show block screen");
                return Some(token);
            }
        }
        Output::Surface(SurfaceRequest::Notify {
            duration_seconds,
            token,
        }) => {
            if let Err(err) = notifier.show_break_notification(duration_seconds) {
                tracing::warn!(token = %token, error = ?err, "failed to post break notification");
            }
        }
        Output::Surface(SurfaceRequest::Hide { token }) => {
            if let Err(err) = surface.hide(token) {
                tracing::warn!(token = %token, error = ?err, "failed to hide block screen");
            }
        }
        Output::RecordBreak(at) => break_log.record_break(at),
    }
    None
}

struct Actor {
    clock: Arc<dyn Clock>,
    /// Only queried for availability; calls go through `outputs`.
    surface: Arc<dyn EnforcementSurface>,
    outputs: mpsc::UnboundedSender<Output>,
    status_tx: Arc<watch::Sender<Status>>,
    screen: ScreenStateTracker,
    usage: UsageAccumulator,
    controller: EnforcementController,
    watchdog: AccessibilityWatchdog,
    config: BreakConfig,
    config_open: bool,
    countdown: Option<Interval>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut config_rx: watch::Receiver<BreakConfig>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => Event::Command(command),
                    None => break,
                },
                changed = config_rx.changed(), if self.config_open => match changed {
                    Ok(()) => Event::ConfigChanged,
                    Err(_) => Event::ConfigClosed,
                },
                () = next_countdown(&mut self.countdown) => Event::Countdown,
            };

            match event {
                Event::Command(command) => self.handle(command),
                Event::ConfigChanged => {
                    let config = config_rx.borrow_and_update().clone();
                    self.apply_config(config);
                }
                Event::ConfigClosed => {
                    tracing::debug!("config stream closed, keeping last config");
                    self.config_open = false;
                }
                Event::Countdown => self.on_countdown_tick(),
            }
        }

        if let Some(end) = self.controller.on_session_aborted(EndReason::Stopped) {
            self.finish_session(end);
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::ScreenOn => {
                let now = self.clock.now();
                if let Some(event) = self.screen.on_screen_on(now) {
                    tracing::debug!("screen on");
                    self.usage.apply(event);
                    // a resumed countdown gets a full second before its next tick
                    if self.controller.on_screen_edge(event.edge) && self.countdown.is_some() {
                        self.arm_countdown();
                    }
                }
            }
            Command::ScreenOff => {
                let now = self.clock.now();
                if let Some(event) = self.screen.on_screen_off(now) {
                    tracing::debug!(usage_ms = self.usage.current_usage_ms(now), "screen off");
                    self.usage.apply(event);
                    self.controller.on_screen_edge(event.edge);
                }
            }
            Command::SurfaceShown(token) => {
                if self.controller.on_surface_shown(token) {
                    self.arm_countdown();
                    self.publish_session();
                }
            }
            Command::SurfaceHidden(token) => {
                self.controller.on_surface_hidden(token);
                if let Some(request) = self.watchdog.on_surface_hidden(&mut self.controller) {
                    self.perform(request);
                }
            }
            Command::SurfaceLost(token) => {
                if let Some(end) = self.controller.on_surface_lost(token) {
                    self.finish_session(end);
                }
            }
            Command::ShowFailed(token) => {
                if let Some(fallback) = self.controller.on_show_failed(token) {
                    self.perform(fallback);
                    self.publish_session();
                }
            }
            Command::Foreground(app_id) => {
                if let Some(request) = self
                    .watchdog
                    .on_foreground_change(&app_id, &mut self.controller)
                {
                    self.perform(request);
                }
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Trigger {
                recheck_threshold,
                reply,
            } => {
                let accepted = self.trigger(recheck_threshold);
                let _ = reply.send(accepted);
            }
        }
    }

    fn snapshot(&mut self) -> UsageSnapshot {
        let now = self.clock.now();
        if self.usage.roll_day(now) {
            tracing::info!(mode = ?self.usage.mode(), "new day");
        }
        let session = self.controller.session();
        UsageSnapshot {
            config: self.config.clone(),
            usage_ms: self.usage.current_usage_ms(now),
            session_active: self.controller.state().session_active,
            block_remaining_seconds: session.map(BlockSession::remaining_seconds),
            screen_on: self.screen.is_on(),
            usage_cycle: self.usage.cycle(),
        }
    }

    fn trigger(&mut self, recheck_threshold: bool) -> bool {
        let now = self.clock.now();
        if recheck_threshold {
            self.usage.roll_day(now);
            let usage_ms = self.usage.current_usage_ms(now);
            if !self.screen.is_on() || usage_ms < self.config.threshold_ms() {
                tracing::debug!(usage_ms, "threshold no longer reached");
                return false;
            }
        }

        let Some(request) = self.controller.try_trigger(
            &self.config,
            self.surface.overlay_available(),
            self.screen.is_on(),
            now,
        ) else {
            return false;
        };
        self.arm_countdown();
        self.perform(request);
        self.publish_session();
        true
    }

    fn apply_config(&mut self, config: BreakConfig) {
        if config == self.config {
            return;
        }
        if let Err(err) = config.validate() {
            tracing::warn!(error = %err, "ignoring invalid config");
            return;
        }
        if self.usage.set_mode(config.tracking_mode, self.clock.now()) {
            tracing::info!(mode = ?config.tracking_mode, "tracking mode changed, usage reset");
        }
        tracing::info!(
            threshold_seconds = config.usage_threshold_seconds,
            block_seconds = config.block_duration_seconds,
            location_enabled = config.location_enabled,
            "config updated"
        );
        self.config = config;
    }

    fn on_countdown_tick(&mut self) {
        let now = self.clock.now();
        match self.controller.tick(&mut self.usage, now) {
            Some(end) => self.finish_session(end),
            None if self.controller.session().is_none() => self.countdown = None,
            None => self.publish_session(),
        }
    }

    fn finish_session(&mut self, end: SessionEnd) {
        self.countdown = None;
        if let Some(request) = end.teardown() {
            self.perform(request);
        }
        if end.reason == EndReason::Completed {
            self.send(Output::RecordBreak(self.clock.now().with_timezone(&Utc)));
            let usage_cycle = self.usage.cycle();
            self.status_tx.send_modify(|status| status.start_cycle(usage_cycle));
        }
        self.publish_session();
    }

    fn perform(&self, request: SurfaceRequest) {
        self.send(Output::Surface(request));
    }

    fn send(&self, output: Output) {
        if let Err(err) = self.outputs.send(output) {
            tracing::error!(output = ?err.0, "host worker is gone");
        }
    }

    fn arm_countdown(&mut self) {
        let mut interval = tokio::time::interval_at(Instant::now() + COUNTDOWN_PERIOD, COUNTDOWN_PERIOD);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.countdown = Some(interval);
    }

    fn publish_session(&self) {
        let session_active = self.controller.state().session_active;
        let remaining = self.controller.session().map(BlockSession::remaining_seconds);
        self.status_tx.send_modify(|status| {
            status.session_active = session_active;
            status.block_remaining_seconds = remaining;
        });
    }
}

async fn next_countdown(countdown: &mut Option<Interval>) {
    match countdown {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
