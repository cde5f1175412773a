//! Per-run background tasks. Every loop follows the same shape: a fixed
//! interval whose first tick lands one full period after spawn, a select on
//! the run's cancellation token, and a body that re-checks session state
//! after each await. Loops never abort each other; cancellation is the only
//! exit path besides the network channel closing.

use log::debug;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::models::NetworkStatus;

use super::controller::TrackingController;

fn ticker(period: std::time::Duration) -> time::Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Main cadence: read location and battery, upload when online.
pub(crate) async fn location_sync_loop(controller: TrackingController, cancel: CancellationToken) {
    let mut interval = ticker(controller.config().sync_interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("location sync loop shutting down");
                break;
            }
            _ = interval.tick() => controller.run_sync_cycle().await,
        }
    }
}

/// One-second heartbeat behind the persistent notification.
pub(crate) async fn countdown_loop(controller: TrackingController, cancel: CancellationToken) {
    let mut interval = ticker(controller.config().countdown_tick);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("countdown loop shutting down");
                break;
            }
            _ = interval.tick() => controller.run_countdown_tick().await,
        }
    }
}

/// Keeps the durable record fresh while offline.
pub(crate) async fn offline_data_loop(controller: TrackingController, cancel: CancellationToken) {
    let mut interval = ticker(controller.config().offline_data_interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("offline data loop shutting down");
                break;
            }
            _ = interval.tick() => controller.run_offline_data_cycle().await,
        }
    }
}

/// Watches the offline clock and forces a check-out past the deadline.
pub(crate) async fn offline_timeout_loop(
    controller: TrackingController,
    cancel: CancellationToken,
) {
    let mut interval = ticker(controller.config().offline_check_interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("offline timeout loop shutting down");
                break;
            }
            _ = interval.tick() => controller.check_offline_timeout().await,
        }
    }
}

/// Re-verifies capability grants. The check may stop the run from inside
/// this very task, which is why teardown never joins these handles.
pub(crate) async fn permission_monitor_loop(
    controller: TrackingController,
    cancel: CancellationToken,
) {
    let mut interval = ticker(controller.config().permission_check_interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("permission monitor shutting down");
                break;
            }
            _ = interval.tick() => controller.run_permission_check().await,
        }
    }
}

/// Polls the battery between sync cycles so a dying device is caught early.
pub(crate) async fn battery_monitor_loop(
    controller: TrackingController,
    cancel: CancellationToken,
) {
    let mut interval = ticker(controller.config().battery_check_interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("battery monitor shutting down");
                break;
            }
            _ = interval.tick() => controller.run_battery_check().await,
        }
    }
}

/// Push-based connectivity updates. Exits when the run is cancelled or the
/// monitor drops its sender.
pub(crate) async fn network_listener(
    controller: TrackingController,
    mut receiver: watch::Receiver<NetworkStatus>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("network listener shutting down");
                break;
            }
            changed = receiver.changed() => {
                if changed.is_err() {
                    debug!("network monitor closed; listener exiting");
                    break;
                }
                let status = receiver.borrow_and_update().clone();
                controller.handle_network_change(status).await;
            }
        }
    }
}
