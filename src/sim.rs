//! In-process platform adapters for the demo binary and the integration
//! tests. Each one is driveable from the outside: flip connectivity, drain
//! the battery, revoke a permission, make the GPS fail, and the coordinator
//! reacts exactly as it would against real hardware.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tokio::sync::watch;

use crate::models::NetworkStatus;
use crate::providers::{
    BatteryProvider, Capability, LocationFix, LocationProvider, NetworkMonitor,
    NotificationRequest, Notifier, PermissionProvider, PermissionStatus,
};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---- location ---------------------------------------------------------

struct LocationState {
    latitude: f64,
    longitude: f64,
    failing: bool,
    requests: usize,
}

/// Random-walk GPS around a starting coordinate.
pub struct SimulatedLocation {
    state: Mutex<LocationState>,
}

impl SimulatedLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            state: Mutex::new(LocationState {
                latitude,
                longitude,
                failing: false,
                requests: 0,
            }),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        lock(&self.state).failing = failing;
    }

    /// Fixes requested so far, failed reads included.
    pub fn request_count(&self) -> usize {
        lock(&self.state).requests
    }
}

#[async_trait]
impl LocationProvider for SimulatedLocation {
    async fn current_location(&self) -> Result<LocationFix> {
        let mut state = lock(&self.state);
        state.requests += 1;
        if state.failing {
            bail!("simulated gps unavailable");
        }
        let mut rng = rand::thread_rng();
        state.latitude += rng.gen_range(-0.0005..0.0005);
        state.longitude += rng.gen_range(-0.0005..0.0005);
        Ok(LocationFix {
            latitude: state.latitude,
            longitude: state.longitude,
            accuracy: rng.gen_range(5.0..25.0),
            timestamp: Utc::now(),
        })
    }
}

// ---- battery ----------------------------------------------------------

struct BatteryState {
    level: f64,
    failing: bool,
}

pub struct SimulatedBattery {
    state: Mutex<BatteryState>,
}

impl SimulatedBattery {
    /// `level` is 0.0–1.0, matching the provider contract.
    pub fn new(level: f64) -> Self {
        Self {
            state: Mutex::new(BatteryState {
                level,
                failing: false,
            }),
        }
    }

    pub fn set_level(&self, level: f64) {
        lock(&self.state).level = level;
    }

    pub fn set_failing(&self, failing: bool) {
        lock(&self.state).failing = failing;
    }
}

#[async_trait]
impl BatteryProvider for SimulatedBattery {
    async fn battery_level(&self) -> Result<f64> {
        let state = lock(&self.state);
        if state.failing {
            bail!("simulated battery read failure");
        }
        Ok(state.level)
    }
}

// ---- permissions ------------------------------------------------------

/// Per-capability grant table, everything granted by default.
pub struct SimulatedPermissions {
    grants: Mutex<HashMap<Capability, PermissionStatus>>,
}

impl SimulatedPermissions {
    pub fn all_granted() -> Self {
        let grants = Capability::ALL
            .iter()
            .map(|capability| (*capability, PermissionStatus::Granted))
            .collect();
        Self {
            grants: Mutex::new(grants),
        }
    }

    pub fn set(&self, capability: Capability, status: PermissionStatus) {
        lock(&self.grants).insert(capability, status);
    }

    pub fn revoke(&self, capability: Capability) {
        self.set(capability, PermissionStatus::Denied);
    }
}

#[async_trait]
impl PermissionProvider for SimulatedPermissions {
    async fn check(&self, capability: Capability) -> PermissionStatus {
        lock(&self.grants)
            .get(&capability)
            .copied()
            .unwrap_or(PermissionStatus::Undetermined)
    }
}

// ---- network ----------------------------------------------------------

/// Connectivity source backed by a watch channel; flipping it pushes an
/// update to every subscribed listener.
pub struct SimulatedNetwork {
    sender: watch::Sender<NetworkStatus>,
}

impl SimulatedNetwork {
    pub fn starting_online() -> Self {
        Self::with_status(NetworkStatus::online("wifi"))
    }

    pub fn starting_offline() -> Self {
        Self::with_status(NetworkStatus::offline())
    }

    pub fn with_status(status: NetworkStatus) -> Self {
        let (sender, _) = watch::channel(status);
        Self { sender }
    }

    pub fn set_status(&self, status: NetworkStatus) {
        // send_replace updates the value even when no listener is attached.
        self.sender.send_replace(status);
    }

    pub fn go_online(&self) {
        self.set_status(NetworkStatus::online("wifi"));
    }

    pub fn go_offline(&self) {
        self.set_status(NetworkStatus::offline());
    }
}

impl NetworkMonitor for SimulatedNetwork {
    fn current_status(&self) -> NetworkStatus {
        self.sender.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.sender.subscribe()
    }
}

// ---- notifications ----------------------------------------------------

struct NotifierState {
    next_id: u64,
    channel_ready: bool,
    fail_display: bool,
    displayed: Vec<(String, NotificationRequest)>,
    active: HashMap<String, NotificationRequest>,
    foreground_running: bool,
}

/// Records every notification instead of showing it. Tests and the demo
/// read the log back to assert on titles and bodies.
pub struct SimulatedNotifier {
    state: Mutex<NotifierState>,
}

impl SimulatedNotifier {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NotifierState {
                next_id: 0,
                channel_ready: false,
                fail_display: false,
                displayed: Vec::new(),
                active: HashMap::new(),
                foreground_running: false,
            }),
        }
    }

    pub fn set_display_failing(&self, failing: bool) {
        lock(&self.state).fail_display = failing;
    }

    /// Every display call so far, oldest first, with the id it was shown
    /// under.
    pub fn displayed(&self) -> Vec<(String, NotificationRequest)> {
        lock(&self.state).displayed.clone()
    }

    pub fn last_displayed(&self) -> Option<(String, NotificationRequest)> {
        lock(&self.state).displayed.last().cloned()
    }

    /// Notifications currently on screen (displayed and not cancelled).
    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.state).active.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn channel_ready(&self) -> bool {
        lock(&self.state).channel_ready
    }

    pub fn foreground_running(&self) -> bool {
        lock(&self.state).foreground_running
    }
}

impl Default for SimulatedNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for SimulatedNotifier {
    async fn ensure_channel(&self) -> Result<()> {
        lock(&self.state).channel_ready = true;
        Ok(())
    }

    async fn display(&self, request: NotificationRequest) -> Result<String> {
        let mut state = lock(&self.state);
        if state.fail_display {
            bail!("simulated notification failure");
        }
        let id = match request.id.clone() {
            Some(id) => id,
            None => {
                state.next_id += 1;
                format!("sim-{}", state.next_id)
            }
        };
        if request.ongoing {
            state.foreground_running = true;
        }
        state.displayed.push((id.clone(), request.clone()));
        state.active.insert(id.clone(), request);
        Ok(id)
    }

    async fn cancel(&self, id: &str) -> Result<()> {
        lock(&self.state).active.remove(id);
        Ok(())
    }

    async fn cancel_all_triggered(&self) -> Result<()> {
        // Triggered notifications are the transient ones; the ongoing
        // tracking notification is cancelled by id instead.
        lock(&self.state).active.retain(|_, request| request.ongoing);
        Ok(())
    }

    async fn stop_foreground_service(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.foreground_running = false;
        state.active.retain(|_, request| !request.ongoing);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn location_walks_and_fails_on_demand() {
        let location = SimulatedLocation::new(18.52, 73.85);
        let fix = location.current_location().await.unwrap();
        assert!((fix.latitude - 18.52).abs() < 0.01);
        assert!(fix.accuracy >= 5.0 && fix.accuracy < 25.0);

        location.set_failing(true);
        assert!(location.current_location().await.is_err());
        location.set_failing(false);
        assert!(location.current_location().await.is_ok());
        assert_eq!(location.request_count(), 3);
    }

    #[tokio::test]
    async fn battery_reports_set_level() {
        let battery = SimulatedBattery::new(0.8);
        assert_eq!(battery.battery_level().await.unwrap(), 0.8);
        battery.set_level(0.03);
        assert_eq!(battery.battery_level().await.unwrap(), 0.03);
        battery.set_failing(true);
        assert!(battery.battery_level().await.is_err());
    }

    #[tokio::test]
    async fn permissions_default_granted_and_revoke() {
        let permissions = SimulatedPermissions::all_granted();
        for capability in Capability::ALL {
            assert!(permissions.check(capability).await.is_granted());
        }
        permissions.revoke(Capability::Location);
        assert_eq!(
            permissions.check(Capability::Location).await,
            PermissionStatus::Denied
        );
        assert!(permissions.check(Capability::Camera).await.is_granted());
    }

    #[tokio::test]
    async fn network_pushes_to_subscribers() {
        let network = SimulatedNetwork::starting_online();
        let mut receiver = network.subscribe();
        assert!(network.current_status().is_online());

        network.go_offline();
        receiver.changed().await.unwrap();
        assert!(!receiver.borrow_and_update().is_online());
        assert!(!network.current_status().is_online());
    }

    #[tokio::test]
    async fn notifier_mints_ids_and_cancels() {
        let notifier = SimulatedNotifier::new();
        notifier.ensure_channel().await.unwrap();
        assert!(notifier.channel_ready());

        let id = notifier
            .display(NotificationRequest {
                id: None,
                title: "t".to_string(),
                body: "b".to_string(),
                ongoing: true,
            })
            .await
            .unwrap();
        assert_eq!(notifier.active_ids(), vec![id.clone()]);
        assert!(notifier.foreground_running());

        // Re-display under the same id replaces, not duplicates.
        notifier
            .display(NotificationRequest {
                id: Some(id.clone()),
                title: "t".to_string(),
                body: "b2".to_string(),
                ongoing: true,
            })
            .await
            .unwrap();
        assert_eq!(notifier.active_ids().len(), 1);
        assert_eq!(notifier.displayed().len(), 2);

        notifier.cancel(&id).await.unwrap();
        assert!(notifier.active_ids().is_empty());
    }

    #[tokio::test]
    async fn cancel_all_triggered_spares_ongoing() {
        let notifier = SimulatedNotifier::new();
        let ongoing = notifier
            .display(NotificationRequest {
                id: None,
                title: "tracking".to_string(),
                body: "b".to_string(),
                ongoing: true,
            })
            .await
            .unwrap();
        notifier
            .display(NotificationRequest {
                id: None,
                title: "alert".to_string(),
                body: "b".to_string(),
                ongoing: false,
            })
            .await
            .unwrap();

        notifier.cancel_all_triggered().await.unwrap();
        assert_eq!(notifier.active_ids(), vec![ongoing]);

        notifier.stop_foreground_service().await.unwrap();
        assert!(notifier.active_ids().is_empty());
        assert!(!notifier.foreground_running());
    }
}
