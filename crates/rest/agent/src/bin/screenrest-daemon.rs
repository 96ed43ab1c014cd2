use color_eyre::eyre::WrapErr as _;
use rest_agent::config::{AgentConfig, ConfigError, spawn_config_watch};
use rest_agent::host::{CommandNotifier, CommandSurface, StaticLocation};
use rest_agent::ipc::IpcServer;
use rest_agent::store::FileBreakLog;
use rest_core::{Clock, EnforcementSurface as _, Engine, EngineHandle, Host, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;

    rest_agent::logging::init();

    info!("screenrest daemon starting");

    let config_path = AgentConfig::config_path();
    let config = match AgentConfig::load_from(&config_path) {
        Ok(c) => {
            info!(path = %config_path.display(), "configuration loaded");
            c
        }
        Err(ConfigError::NotFound(path)) => {
            info!(path = %path.display(), "no config file, using defaults");
            AgentConfig::default()
        }
        Err(e) => {
            warn!(error = %e, "failed to load config, using defaults");
            AgentConfig::default()
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let surface = Arc::new(CommandSurface::new(config.surface.overlay_command.clone()));
    if !surface.overlay_available() {
        warn!("no overlay command configured, breaks will only be notified");
    }
    let host = Host {
        clock: Arc::clone(&clock),
        location: StaticLocation::new(config.location.fix(), clock),
        surface: surface.clone(),
        notifier: Arc::new(CommandNotifier::new(config.surface.notify_command.clone())),
        break_log: Arc::new(FileBreakLog::new(AgentConfig::data_dir().join("last_break"))),
    };

    let (config_tx, config_rx) = watch::channel(config.break_config.clone());
    let engine = Engine::start(host, config.engine_options(), config_rx);
    let shutdown = CancellationToken::new();

    let server = IpcServer::bind(&config.ipc.socket_path).wrap_err("failed to start IPC server")?;

    let tasks = vec![
        spawn_config_watch(
            config_path,
            config_tx,
            Duration::from_secs(config.monitor.reload_interval_secs.max(1)),
            shutdown.clone(),
        ),
        tokio::spawn(server.serve(engine.handle(), shutdown.clone())),
        tokio::spawn(watch_overlay(surface, engine.handle(), shutdown.clone())),
    ];

    let mut sigterm = signal(SignalKind::terminate()).wrap_err("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).wrap_err("failed to install SIGINT handler")?;

    info!("screenrest daemon running");

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
        () = shutdown.cancelled() => {}
    }

    info!("screenrest daemon shutting down");
    shutdown.cancel();
    engine.stop().await;
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "background task failed");
        }
    }
    Ok(())
}

/// Report overlay processes that died on their own as lost surfaces.
async fn watch_overlay(surface: Arc<CommandSurface>, handle: EngineHandle, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        for token in surface.exited() {
            if handle.surface_lost(token).is_err() {
                return;
            }
        }
    }
}
