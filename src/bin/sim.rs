//! Scripted demo of the tracking coordinator against simulated hardware.
//!
//! Runs a full session: check-in, a couple of sync cycles, a connectivity
//! drop, then a battery drain that forces the automatic emergency check-out.
//! Set `FIELDTRACK_DEBUG=1` for second-scale timer intervals; without it the
//! production five-minute cadence applies and the demo takes a while.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use env_logger::Env;
use log::info;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use fieldtrack::sim::{
    SimulatedBattery, SimulatedLocation, SimulatedNetwork, SimulatedNotifier,
    SimulatedPermissions,
};
use fieldtrack::{EmergencyStore, Providers, TrackerConfig, TrackingController};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = if std::env::var_os("FIELDTRACK_DEBUG").is_some() {
        info!("debug profile: second-scale intervals");
        TrackerConfig::debug_profile()
    } else {
        info!("production profile: set FIELDTRACK_DEBUG=1 for a faster run");
        TrackerConfig::default()
    };

    let store_path = std::env::temp_dir()
        .join(format!("fieldtrack-sim-{}", Uuid::new_v4()))
        .join("emergency.sqlite3");
    info!("emergency store at {}", store_path.display());
    let store = EmergencyStore::open(store_path).context("open emergency store")?;

    let location = Arc::new(SimulatedLocation::new(18.5204, 73.8567));
    let battery = Arc::new(SimulatedBattery::new(0.86));
    let permissions = Arc::new(SimulatedPermissions::all_granted());
    let network = Arc::new(SimulatedNetwork::starting_online());
    let notifier = Arc::new(SimulatedNotifier::new());

    let providers = Providers {
        location: location.clone(),
        battery: battery.clone(),
        permissions: permissions.clone(),
        network: network.clone(),
        notifier: notifier.clone(),
    };
    let controller = TrackingController::new(providers, store, config.clone());

    if let Some(record) = controller.pending_recovery().await {
        info!(
            "recovered interrupted session for {} (stored {})",
            record.employee_name.as_deref().unwrap_or("unknown"),
            record.last_stored_time
        );
    }

    controller.set_location_update_callback(|fix, battery_pct| {
        info!(
            "location update: {:.5},{:.5} (±{:.0}m, battery {battery_pct}%)",
            fix.latitude, fix.longitude, fix.accuracy
        );
    });
    controller.set_countdown_callback(|seconds| {
        if seconds % 5 == 0 {
            info!("next sync in {seconds}s");
        }
    });
    controller.set_emergency_callback(|record| {
        info!(
            "EMERGENCY: {} (record stored {})",
            record.reason.as_deref().unwrap_or("unknown"),
            record.last_stored_time
        );
    });

    controller
        .start_tracking("emp-104", "Asha Rao", Some("att-2081"))
        .await
        .context("start tracking")?;

    // Let two sync cycles land while everything is healthy.
    sleep(config.sync_interval * 2 + Duration::from_secs(1)).await;

    info!("--- dropping connectivity ---");
    network.go_offline();
    sleep(config.offline_data_interval + Duration::from_secs(1)).await;

    info!("--- draining battery to 4% ---");
    battery.set_level(0.04);

    let stopped = wait_until_stopped(
        &controller,
        config.battery_check_interval * 2 + Duration::from_secs(5),
    )
    .await;
    if !stopped {
        info!("session still running; stopping manually");
        controller.stop_tracking(None).await;
    }

    match controller.emergency_data().await {
        Some(record) => info!(
            "final emergency record:\n{}",
            serde_json::to_string_pretty(&record).context("render record")?
        ),
        None => info!("no emergency record left behind"),
    }

    info!(
        "notifications shown: {}",
        notifier
            .displayed()
            .iter()
            .map(|(_, request)| request.title.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(())
}

async fn wait_until_stopped(controller: &TrackingController, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if !controller.is_tracking_active().await {
            return true;
        }
        sleep(Duration::from_millis(200)).await;
    }
    false
}
