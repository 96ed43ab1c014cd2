use rest_core::{BreakConfig, Coordinates, EngineOptions, GateOptions, UnavailablePolicy, WatchdogStrategy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Invalid break settings: {0}")]
    Invalid(#[from] rest_core::ConfigError),
    #[error("Config file not found at {0}")]
    NotFound(PathBuf),
}

/// Everything the daemon reads from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    #[serde(rename = "break")]
    pub break_config: BreakConfig,
    pub monitor: MonitorConfig,
    pub surface: SurfaceConfig,
    pub watchdog: WatchdogConfig,
    pub location: LocationConfig,
    pub ipc: IpcConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    /// Screen state assumed at startup, before the first power signal.
    pub initial_screen_on: bool,
    /// How often the config file is checked for changes.
    pub reload_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            initial_screen_on: true,
            reload_interval_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Block screen program and arguments. `{duration}` and `{token}` are
    /// substituted. Unset means no overlay: breaks fall back to notifications.
    pub overlay_command: Option<Vec<String>>,
    /// Break notification program and arguments. `{duration}` is substituted.
    pub notify_command: Option<Vec<String>>,
    /// App id the foreground feed reports for the block screen.
    pub app_id: String,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            overlay_command: None,
            notify_command: None,
            app_id: "screenrest-overlay".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchdogConfig {
    pub strategy: WatchdogStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocationConfig {
    /// Fixed position reported as the device location.
    pub fix_lat: Option<f64>,
    pub fix_lng: Option<f64>,
    pub fix_timeout_ms: u64,
    pub max_fix_age_secs: u64,
    pub when_unavailable: UnavailablePolicy,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            fix_lat: None,
            fix_lng: None,
            fix_timeout_ms: 2000,
            max_fix_age_secs: 15 * 60,
            when_unavailable: UnavailablePolicy::Permit,
        }
    }
}

impl LocationConfig {
    pub fn fix(&self) -> Option<Coordinates> {
        match (self.fix_lat, self.fix_lng) {
            (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IpcConfig {
    pub socket_path: PathBuf,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/screenrest.sock"),
        }
    }
}

impl AgentConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate the break settings.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = toml::from_str(content)?;
        config.break_config.validate()?;
        Ok(config)
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("screenrest")
            .join("config.toml")
    }

    /// Where the last-break timestamp is kept.
    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("screenrest")
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            poll_interval: Duration::from_secs(self.monitor.poll_interval_secs.clamp(1, 5)),
            watchdog: self.watchdog.strategy,
            surface_app_id: self.surface.app_id.clone(),
            gate: GateOptions {
                fix_timeout: Duration::from_millis(self.location.fix_timeout_ms),
                max_fix_age: Duration::from_secs(self.location.max_fix_age_secs),
                when_unavailable: self.location.when_unavailable,
            },
            initial_screen_on: self.monitor.initial_screen_on,
        }
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

/// Re-read `path` whenever its modification time changes and publish the new
/// break settings. Unreadable or invalid files keep the last good settings.
pub fn spawn_config_watch(
    path: PathBuf,
    tx: watch::Sender<BreakConfig>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_seen = modified_at(&path);
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let modified = modified_at(&path);
            if modified == last_seen {
                continue;
            }
            last_seen = modified;

            if modified.is_none() {
                debug!(path = %path.display(), "config file removed, keeping current settings");
                continue;
            }

            match AgentConfig::load_from(&path) {
                Ok(config) => {
                    let changed = tx.send_if_modified(|current| {
                        if *current == config.break_config {
                            return false;
                        }
                        *current = config.break_config.clone();
                        true
                    });
                    if changed {
                        info!(path = %path.display(), "break settings reloaded");
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "ignoring config change"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rest_core::TrackingMode;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.break_config, BreakConfig::default());
        assert_eq!(config.ipc.socket_path, PathBuf::from("/tmp/screenrest.sock"));
        assert!(config.surface.overlay_command.is_none());
        assert_eq!(config.engine_options().poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = AgentConfig::parse(
            r#"
            [break]
            usage_threshold_seconds = 1200
            tracking_mode = "cumulative_daily"

            [surface]
            overlay_command = ["screenrest-overlay", "--seconds", "{duration}"]
            "#,
        )
        .unwrap();

        assert_eq!(config.break_config.usage_threshold_seconds, 1200);
        assert_eq!(config.break_config.block_duration_seconds, 30);
        assert_eq!(config.break_config.tracking_mode, TrackingMode::CumulativeDaily);
        assert_eq!(config.surface.app_id, "screenrest-overlay");
        assert_eq!(config.watchdog.strategy, WatchdogStrategy::Reassert);
        assert_eq!(config.monitor.poll_interval_secs, 5);
    }

    #[test]
    fn test_rejects_invalid_break_settings() {
        let err = AgentConfig::parse("[break]\nblock_duration_seconds = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(rest_core::ConfigError::ZeroDuration)));

        let err = AgentConfig::parse("[break]\ntracking_mode = \"hourly\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_poll_interval_is_clamped() {
        let mut config = AgentConfig::default();
        config.monitor.poll_interval_secs = 60;
        assert_eq!(config.engine_options().poll_interval, Duration::from_secs(5));
        config.monitor.poll_interval_secs = 0;
        assert_eq!(config.engine_options().poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_location_settings() {
        let config = AgentConfig::parse(
            r#"
            [location]
            fix_lat = 52.52
            fix_lng = 13.405
            when_unavailable = "deny"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.location.fix(),
            Some(Coordinates {
                lat: 52.52,
                lng: 13.405
            })
        );
        assert_eq!(
            config.engine_options().gate.when_unavailable,
            UnavailablePolicy::Deny
        );
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = AgentConfig::load_from(&dir.path().join("config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_watch_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[break]\nusage_threshold_seconds = 600\n").unwrap();

        let (tx, mut rx) = watch::channel(BreakConfig::default());
        let cancel = CancellationToken::new();
        let task = spawn_config_watch(path.clone(), tx, Duration::from_millis(20), cancel.clone());

        // let the watcher record the initial mtime first
        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(
            &path,
            "[break]\nusage_threshold_seconds = 900\nblock_duration_seconds = 45\n",
        )
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rx.borrow().usage_threshold_seconds, 900);
        assert_eq!(rx.borrow().block_duration_seconds, 45);

        cancel.cancel();
        task.await.unwrap();
    }
}
