use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, TimeZone as _};
use rest_core::{
    BreakConfig, ContextToken, Engine, EngineOptions, EnforcementSurface, Host, NoBreakLog,
    NoLocation, Notifier, TokioClock, TrackingMode,
};
use tokio::sync::watch;

#[derive(Default)]
struct Surface {
    shown: Mutex<Vec<ContextToken>>,
    hidden: Mutex<Vec<ContextToken>>,
}

impl EnforcementSurface for Surface {
    fn overlay_available(&self) -> bool {
        true
    }

    fn show(&self, _duration_seconds: u32, token: ContextToken) -> color_eyre::eyre::Result<()> {
        self.shown.lock().unwrap().push(token);
        Ok(())
    }

    fn hide(&self, token: ContextToken) -> color_eyre::eyre::Result<()> {
        self.hidden.lock().unwrap().push(token);
        Ok(())
    }
}

struct QuietNotifier;

impl Notifier for QuietNotifier {
    fn show_break_notification(&self, _duration_seconds: u32) -> color_eyre::eyre::Result<()> {
        Ok(())
    }

    fn update_status_notification(&self, _used: Duration, _remaining: Duration) {}
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn test_cumulative_daily_break_cycle() {
    let start = Local
        .with_ymd_and_hms(2025, 3, 3, 14, 0, 0)
        .single()
        .unwrap();
    let surface = Arc::new(Surface::default());
    let host = Host {
        clock: Arc::new(TokioClock::starting_at(start)),
        location: NoLocation,
        surface: surface.clone(),
        notifier: Arc::new(QuietNotifier),
        break_log: Arc::new(NoBreakLog),
    };
    let (_config_tx, config_rx) = watch::channel(BreakConfig {
        usage_threshold_seconds: 5,
        block_duration_seconds: 2,
        tracking_mode: TrackingMode::CumulativeDaily,
        ..Default::default()
    });
    let options = EngineOptions {
        poll_interval: Duration::from_secs(1),
        ..Default::default()
    };

    let engine = Engine::start(host, options, config_rx);
    let handle = engine.handle();
    let mut status = handle.status();

    // 3 s on, 7 s off, then on again: due after 2 more seconds
    sleep_ms(3_000).await;
    handle.screen_off().unwrap();
    sleep_ms(7_000).await;
    handle.screen_on().unwrap();

    sleep_ms(1_500).await;
    assert!(surface.shown.lock().unwrap().is_empty());
    assert_eq!(handle.snapshot().await.unwrap().usage_ms, 4_500);

    sleep_ms(1_000).await;
    let token = surface.shown.lock().unwrap()[0];
    handle.surface_shown(token).unwrap();

    status
        .wait_for(|status| status.session_active)
        .await
        .unwrap();
    status
        .wait_for(|status| !status.session_active)
        .await
        .unwrap();
    // let the host worker flush the hide
    sleep_ms(10).await;

    assert_eq!(*surface.hidden.lock().unwrap(), vec![token]);
    let snapshot = handle.snapshot().await.unwrap();
    assert!(snapshot.usage_ms < 1_000);
    assert!(!snapshot.session_active);

    engine.stop().await;
}
