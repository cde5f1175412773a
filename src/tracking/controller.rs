use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::TrackerConfig;
use crate::models::{
    reason_preserves_record, EmergencyLocation, EmergencyRecord, EmergencyReason, NetworkStatus,
    PERMISSION_STOP_REASON,
};
use crate::providers::{
    battery_percent, BatteryProvider, Capability, LocationFix, LocationProvider, NetworkMonitor,
    NotificationRequest, Notifier, PermissionProvider, PermissionStatus,
};
use crate::store::EmergencyStore;

use super::countdown::{body_text, Countdown};
use super::loops;
use super::session::{TrackingPhase, TrackingSession};

const TRACKING_TITLE: &str = "Location tracking active";
const EMERGENCY_TITLE: &str = "Emergency check-out";
const STOPPED_TITLE: &str = "Tracking stopped";

/// Why a start request was refused. Everything here is fatal-to-start: the
/// session is left exactly as it was before the call.
#[derive(Debug, Error)]
pub enum StartTrackingError {
    #[error("{capability} permission is {status}; tracking requires all grants")]
    PermissionMissing {
        capability: Capability,
        status: PermissionStatus,
    },
    /// The platform ties background execution to a visible notification, so
    /// failing to show one kills the whole start.
    #[error("failed to display the tracking notification")]
    Notification(#[source] anyhow::Error),
}

/// Platform adapters the coordinator runs against. Cloning shares the
/// underlying adapters.
#[derive(Clone)]
pub struct Providers {
    pub location: Arc<dyn LocationProvider>,
    pub battery: Arc<dyn BatteryProvider>,
    pub permissions: Arc<dyn PermissionProvider>,
    pub network: Arc<dyn NetworkMonitor>,
    pub notifier: Arc<dyn Notifier>,
}

pub type LocationUpdateFn = dyn Fn(&LocationFix, u8) + Send + Sync;
pub type CountdownFn = dyn Fn(u64) + Send + Sync;
pub type EmergencyFn = dyn Fn(&EmergencyRecord) + Send + Sync;

#[derive(Default)]
struct CallbackRegistry {
    location_update: Option<Arc<LocationUpdateFn>>,
    countdown: Option<Arc<CountdownFn>>,
    emergency: Option<Arc<EmergencyFn>>,
}

/// Cancellation token plus handles for one run's spawned tasks. Teardown is
/// cooperative only: the permission monitor calls stop from inside its own
/// task, so joining (or aborting) here would deadlock or kill the teardown
/// mid-flight.
struct SessionTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl SessionTasks {
    fn shutdown(self) {
        self.cancel.cancel();
        // Handles are dropped without joining; each loop exits at its next
        // select on the token.
        drop(self.handles);
    }
}

/// Point-in-time view of the coordinator for UI polling.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    pub session: TrackingSession,
    pub countdown_seconds: u64,
}

/// Coordinates one background tracking run: the timer loops, the network
/// subscription, the persistent notification, and the durable emergency
/// record. Clone freely; all clones share state.
#[derive(Clone)]
pub struct TrackingController {
    config: TrackerConfig,
    providers: Providers,
    store: EmergencyStore,
    session: Arc<Mutex<TrackingSession>>,
    countdown: Arc<Mutex<Countdown>>,
    notification_id: Arc<Mutex<Option<String>>>,
    tasks: Arc<Mutex<Option<SessionTasks>>>,
    callbacks: Arc<RwLock<CallbackRegistry>>,
    /// First emergency trigger wins and owns the stop; concurrent monitors
    /// (battery + sync cycle can both see a low reading) must neither
    /// double-fire nor tear the session down under the winner.
    emergency_latch: Arc<AtomicBool>,
}

impl TrackingController {
    pub fn new(providers: Providers, store: EmergencyStore, config: TrackerConfig) -> Self {
        let countdown = Countdown::new(config.sync_interval);
        Self {
            config,
            providers,
            store,
            session: Arc::new(Mutex::new(TrackingSession::new())),
            countdown: Arc::new(Mutex::new(countdown)),
            notification_id: Arc::new(Mutex::new(None)),
            tasks: Arc::new(Mutex::new(None)),
            callbacks: Arc::new(RwLock::new(CallbackRegistry::default())),
            emergency_latch: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn config(&self) -> &TrackerConfig {
        &self.config
    }

    // ---- lifecycle ----------------------------------------------------

    /// Starts a tracking run for the given employee. No-op if a run is
    /// already active or starting. On any error the session is reset, every
    /// spawned task is cancelled and nothing is persisted.
    pub async fn start_tracking(
        &self,
        employee_id: &str,
        employee_name: &str,
        attendance_id: Option<&str>,
    ) -> Result<(), StartTrackingError> {
        {
            let mut session = self.session.lock().await;
            match session.phase {
                TrackingPhase::Idle => {}
                phase => {
                    debug!("start_tracking ignored; session is {phase:?}");
                    return Ok(());
                }
            }
            // Claim the slot before the first await so concurrent starts
            // collapse into one.
            session.phase = TrackingPhase::Starting;
        }

        // Hard gate: every capability must read granted right now.
        for capability in Capability::ALL {
            let status = self.providers.permissions.check(capability).await;
            if !status.is_granted() {
                warn!("start_tracking refused: {capability} permission is {status}");
                self.session.lock().await.reset();
                return Err(StartTrackingError::PermissionMissing { capability, status });
            }
        }

        let network = self.providers.network.current_status();
        let run_id = Uuid::new_v4().to_string();
        {
            let mut session = self.session.lock().await;
            session.begin(
                employee_id.to_string(),
                employee_name.to_string(),
                attendance_id.map(str::to_string),
                network.is_online(),
                run_id.clone(),
            );
        }
        self.emergency_latch.store(false, Ordering::SeqCst);
        info!(
            "[{run_id}] tracking starting for employee {employee_id} (online: {})",
            network.is_online()
        );

        let cancel = CancellationToken::new();
        let mut handles = Vec::with_capacity(7);

        // Monitors go up before the notification so a connectivity drop or
        // revocation during start is never missed.
        let receiver = self.providers.network.subscribe();
        handles.push(tokio::spawn(loops::network_listener(
            self.clone(),
            receiver,
            cancel.clone(),
        )));
        handles.push(tokio::spawn(loops::permission_monitor_loop(
            self.clone(),
            cancel.clone(),
        )));
        handles.push(tokio::spawn(loops::battery_monitor_loop(
            self.clone(),
            cancel.clone(),
        )));

        if let Err(err) = self.arm_tracking_notification().await {
            error!("[{run_id}] tracking notification failed: {err:#}");
            cancel.cancel();
            self.session.lock().await.reset();
            return Err(StartTrackingError::Notification(err));
        }

        handles.push(tokio::spawn(loops::location_sync_loop(
            self.clone(),
            cancel.clone(),
        )));
        handles.push(tokio::spawn(loops::countdown_loop(
            self.clone(),
            cancel.clone(),
        )));
        handles.push(tokio::spawn(loops::offline_data_loop(
            self.clone(),
            cancel.clone(),
        )));
        handles.push(tokio::spawn(loops::offline_timeout_loop(
            self.clone(),
            cancel.clone(),
        )));

        *self.tasks.lock().await = Some(SessionTasks { cancel, handles });

        {
            let mut session = self.session.lock().await;
            if !session.is_tracking {
                // A stop raced the tail of the start; unwind what was just
                // armed instead of resurrecting the session.
                drop(session);
                if let Some(tasks) = self.tasks.lock().await.take() {
                    tasks.shutdown();
                }
                if let Some(id) = self.notification_id.lock().await.take() {
                    if let Err(err) = self.providers.notifier.cancel(&id).await {
                        warn!("[{run_id}] failed to cancel notification after raced start: {err:#}");
                    }
                }
                info!("[{run_id}] start raced a stop; session stays idle");
                return Ok(());
            }
            session.phase = TrackingPhase::Active;
        }
        info!("[{run_id}] tracking active");
        Ok(())
    }

    /// Stops the current run. Safe to call from anywhere, including from
    /// inside the timer tasks themselves. Notification teardown is
    /// best-effort; state teardown always completes. The stored emergency
    /// record survives only for reasons that need later inspection.
    pub async fn stop_tracking(&self, reason: Option<&str>) -> bool {
        let run_id = {
            let mut session = self.session.lock().await;
            if !matches!(
                session.phase,
                TrackingPhase::Active | TrackingPhase::Starting
            ) {
                debug!("stop_tracking ignored; no active session");
                return true;
            }
            // Flip before any teardown so timer bodies already past their
            // guard bail out at the next check.
            session.is_tracking = false;
            session.phase = TrackingPhase::Stopping;
            session.run_id.clone().unwrap_or_default()
        };
        info!(
            "[{run_id}] stopping tracking (reason: {})",
            reason.unwrap_or("normal check-out")
        );

        if let Some(tasks) = self.tasks.lock().await.take() {
            tasks.shutdown();
        }

        let notification_id = self.notification_id.lock().await.take();
        if let Some(id) = notification_id {
            if let Err(err) = self.providers.notifier.cancel(&id).await {
                warn!("[{run_id}] failed to cancel tracking notification: {err:#}");
            }
        }
        if let Err(err) = self.providers.notifier.cancel_all_triggered().await {
            warn!("[{run_id}] failed to cancel triggered notifications: {err:#}");
        }
        if let Err(err) = self.providers.notifier.stop_foreground_service().await {
            warn!("[{run_id}] failed to stop foreground service: {err:#}");
        }
        if let Some(reason) = reason {
            let request = NotificationRequest {
                id: None,
                title: STOPPED_TITLE.to_string(),
                body: reason.to_string(),
                ongoing: false,
            };
            if let Err(err) = self.providers.notifier.display(request).await {
                warn!("[{run_id}] failed to display stop notification: {err:#}");
            }
        }

        if reason.map(reason_preserves_record).unwrap_or(false) {
            debug!("[{run_id}] keeping emergency record for later inspection");
        } else if let Err(err) = self.store.clear().await {
            warn!("[{run_id}] failed to clear emergency record: {err:#}");
        }

        self.session.lock().await.reset();
        self.emergency_latch.store(false, Ordering::SeqCst);
        info!("[{run_id}] tracking stopped");
        true
    }

    async fn arm_tracking_notification(&self) -> Result<()> {
        self.providers
            .notifier
            .ensure_channel()
            .await
            .context("notification channel setup")?;
        let seed = {
            let mut countdown = self.countdown.lock().await;
            countdown.reset();
            countdown.remaining()
        };
        let id = self
            .providers
            .notifier
            .display(NotificationRequest {
                id: None,
                title: TRACKING_TITLE.to_string(),
                body: body_text(seed),
                ongoing: true,
            })
            .await
            .context("display tracking notification")?;
        *self.notification_id.lock().await = Some(id);
        Ok(())
    }

    // ---- queries ------------------------------------------------------

    pub async fn state(&self) -> TrackingSession {
        self.session.lock().await.clone()
    }

    pub async fn is_tracking_active(&self) -> bool {
        self.session.lock().await.is_tracking
    }

    pub async fn snapshot(&self) -> TrackerSnapshot {
        let session = self.session.lock().await.clone();
        let countdown_seconds = self.countdown.lock().await.remaining();
        TrackerSnapshot {
            session,
            countdown_seconds,
        }
    }

    /// Last persisted emergency record, if any. Read errors surface as
    /// `None`; the caller cannot do anything useful with a broken store.
    pub async fn emergency_data(&self) -> Option<EmergencyRecord> {
        match self.store.read().await {
            Ok(record) => record,
            Err(err) => {
                warn!("failed to read emergency record: {err:#}");
                None
            }
        }
    }

    pub async fn clear_emergency_data(&self) {
        if let Err(err) = self.store.clear().await {
            warn!("failed to clear emergency record: {err:#}");
        }
    }

    /// A record still flagged `tracking_active` and not stamped with an
    /// emergency reason means the previous process died mid-run; the app
    /// decides whether to resume or check out. Reasoned records were already
    /// delivered through the emergency callback and are kept for inspection
    /// only.
    pub async fn pending_recovery(&self) -> Option<EmergencyRecord> {
        self.emergency_data()
            .await
            .filter(|record| record.tracking_active && record.reason.is_none())
    }

    // ---- callbacks ----------------------------------------------------

    pub fn set_location_update_callback(
        &self,
        callback: impl Fn(&LocationFix, u8) + Send + Sync + 'static,
    ) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .location_update = Some(Arc::new(callback));
    }

    pub fn set_countdown_callback(&self, callback: impl Fn(u64) + Send + Sync + 'static) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .countdown = Some(Arc::new(callback));
    }

    pub fn set_emergency_callback(
        &self,
        callback: impl Fn(&EmergencyRecord) + Send + Sync + 'static,
    ) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .emergency = Some(Arc::new(callback));
    }

    fn emit_location_update(&self, fix: &LocationFix, battery_pct: u8) {
        let callback = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .location_update
            .clone();
        if let Some(callback) = callback {
            callback(fix, battery_pct);
        }
    }

    fn emit_countdown(&self, seconds_remaining: u64) {
        let callback = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .countdown
            .clone();
        if let Some(callback) = callback {
            callback(seconds_remaining);
        }
    }

    fn emit_emergency(&self, record: &EmergencyRecord) {
        let callback = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .emergency
            .clone();
        if let Some(callback) = callback {
            callback(record);
        }
    }

    // ---- timer bodies -------------------------------------------------

    /// One full sync cycle: read sensors, gate on battery, then either
    /// upload (online) or hold the fix for the offline refresh loop.
    pub(crate) async fn run_sync_cycle(&self) {
        if !self.is_tracking_active().await {
            return;
        }

        let fix = self.providers.location.current_location().await;
        let battery = self.providers.battery.battery_level().await;

        // A stop may have landed while the sensors were read.
        if !self.is_tracking_active().await {
            return;
        }

        let battery = match battery {
            Ok(level) => level,
            Err(err) => {
                warn!("sync cycle: battery read failed: {err:#}");
                return;
            }
        };

        // Battery gates before the location error path so a dying device
        // still checks out even when the GPS read failed.
        if battery <= self.config.low_battery_threshold {
            info!(
                "sync cycle: battery at {:.0}%, forcing low-battery check-out",
                battery * 100.0
            );
            self.terminate_low_battery().await;
            return;
        }

        let fix = match fix {
            Ok(fix) => fix,
            Err(err) => {
                warn!("sync cycle: location read failed: {err:#}");
                return;
            }
        };

        let online = matches!(self.session.lock().await.is_online, Some(true));
        if !online {
            debug!(
                "sync cycle: offline, holding upload of fix {:.5},{:.5}",
                fix.latitude, fix.longitude
            );
            return;
        }

        let battery_pct = battery_percent(battery);
        self.emit_location_update(&fix, battery_pct);

        let location = EmergencyLocation::from_fix(&fix, battery_pct);
        let record = self.build_record(location, None).await;
        self.persist_record(&record).await;
    }

    /// Offline-only refresh of the durable record so a crash while offline
    /// loses at most one interval of movement.
    pub(crate) async fn run_offline_data_cycle(&self) {
        {
            let session = self.session.lock().await;
            if !session.is_tracking || session.is_online != Some(false) {
                return;
            }
        }

        let (location, battery) = self.snapshot_location_and_battery().await;
        if !self.is_tracking_active().await {
            return;
        }

        let record = self.build_record(location, None).await;
        self.persist_record(&record).await;

        if let Some(level) = battery {
            if level <= self.config.low_battery_threshold {
                info!(
                    "offline refresh: battery at {:.0}%, forcing low-battery check-out",
                    level * 100.0
                );
                self.terminate_low_battery().await;
            }
        }
    }

    pub(crate) async fn run_battery_check(&self) {
        if !self.is_tracking_active().await {
            return;
        }
        match self.providers.battery.battery_level().await {
            Ok(level) => {
                if !self.is_tracking_active().await {
                    return;
                }
                if level <= self.config.low_battery_threshold {
                    info!(
                        "battery monitor: {:.0}% at or below cut-off",
                        level * 100.0
                    );
                    self.terminate_low_battery().await;
                }
            }
            Err(err) => warn!("battery monitor: read failed: {err:#}"),
        }
    }

    /// Re-checks every capability. On the first revocation the emergency
    /// path runs while the session is still live, then the run stops.
    pub(crate) async fn run_permission_check(&self) {
        for capability in Capability::ALL {
            if !self.is_tracking_active().await {
                return;
            }
            let status = self.providers.permissions.check(capability).await;
            if !self.is_tracking_active().await {
                return;
            }
            if !status.is_granted() {
                warn!("{capability} permission now {status}; forcing check-out");
                if self
                    .run_emergency(EmergencyReason::PermissionRevoked(capability))
                    .await
                {
                    self.stop_tracking(Some(PERMISSION_STOP_REASON)).await;
                }
                return;
            }
        }
    }

    pub(crate) async fn check_offline_timeout(&self) {
        let expired = {
            let session = self.session.lock().await;
            session.is_tracking
                && session.is_online == Some(false)
                && session
                    .offline_elapsed()
                    .map_or(false, |elapsed| elapsed > self.config.offline_timeout)
        };
        if expired && self.run_emergency(EmergencyReason::OfflineTimeout).await {
            self.stop_tracking(Some(EmergencyReason::OfflineTimeout.as_str()))
                .await;
        }
    }

    /// Advances the countdown and refreshes the notification body. Gated on
    /// the notification id rather than the tracking flag so the counter can
    /// never keep running against a dismissed notification.
    pub(crate) async fn run_countdown_tick(&self) {
        let Some(id) = self.notification_id.lock().await.clone() else {
            return;
        };

        let seconds_remaining = self.countdown.lock().await.tick();
        self.emit_countdown(seconds_remaining);

        let request = NotificationRequest {
            id: Some(id),
            title: TRACKING_TITLE.to_string(),
            body: body_text(seconds_remaining),
            ongoing: true,
        };
        if let Err(err) = self.providers.notifier.display(request).await {
            // Cosmetic; tracking carries on regardless.
            debug!("countdown notification update failed: {err:#}");
        }
    }

    /// Applies a connectivity report. The offline clock is stamped only on
    /// an observed online→offline transition and cleared on recovery;
    /// duplicate reports never move it.
    pub(crate) async fn handle_network_change(&self, status: NetworkStatus) {
        let online = status.is_online();
        let mut session = self.session.lock().await;
        if !session.is_tracking {
            return;
        }
        let previous = session.is_online;
        session.is_online = Some(online);
        if online {
            if previous == Some(false) {
                info!(
                    "connectivity restored ({}); uploads resume on the next scheduled sync",
                    status.connection_type
                );
            }
            session.clear_offline();
        } else if previous != Some(false) {
            info!("connectivity lost; offline clock started");
            session.mark_offline();
        }
    }

    pub(crate) async fn terminate_low_battery(&self) {
        if self.run_emergency(EmergencyReason::LowBattery).await {
            self.stop_tracking(Some(EmergencyReason::LowBattery.as_str()))
                .await;
        }
    }

    // ---- emergency path -----------------------------------------------

    /// Shared forced-check-out path: persist a final record with the reason,
    /// fire the emergency callback, show the alert. Returns whether this
    /// call ran the path. Only the caller that gets `true` stops the run
    /// afterwards; latched-out duplicates must leave teardown to the
    /// winner, whose record is still being built from the live session.
    async fn run_emergency(&self, reason: EmergencyReason) -> bool {
        if self.emergency_latch.swap(true, Ordering::SeqCst) {
            debug!("emergency already in flight; duplicate {reason:?} trigger dropped");
            return false;
        }
        // Capture the session before the sensor snapshot suspends so the
        // record keeps the run's identity even if a stop lands mid-flight.
        let session = {
            let session = self.session.lock().await;
            if !session.is_tracking {
                self.emergency_latch.store(false, Ordering::SeqCst);
                return false;
            }
            session.clone()
        };
        let run_id = session.run_id.clone().unwrap_or_default();
        warn!("[{run_id}] emergency termination: {}", reason.as_str());

        let (location, _) = self.snapshot_location_and_battery().await;
        let record = Self::record_for(&session, location, Some(reason));
        self.persist_record(&record).await;

        // The callback gets the freshly built record even when the write
        // failed; the forced check-out must not depend on storage health.
        self.emit_emergency(&record);

        let request = NotificationRequest {
            id: None,
            title: EMERGENCY_TITLE.to_string(),
            body: reason.notification_body(),
            ongoing: false,
        };
        if let Err(err) = self.providers.notifier.display(request).await {
            warn!("[{run_id}] failed to display emergency notification: {err:#}");
        }
        true
    }

    // ---- record assembly ----------------------------------------------

    /// Best-effort location and battery for a persisted snapshot: live GPS
    /// first, then the previously stored fix, then a zero placeholder.
    /// Battery falls back from live to stored to zero.
    async fn snapshot_location_and_battery(&self) -> (EmergencyLocation, Option<f64>) {
        let battery = match self.providers.battery.battery_level().await {
            Ok(level) => Some(level),
            Err(err) => {
                warn!("snapshot: battery read failed: {err:#}");
                None
            }
        };

        let stored = match self.store.read().await {
            Ok(record) => record,
            Err(err) => {
                warn!("snapshot: stored record read failed: {err:#}");
                None
            }
        };

        let location = match self.providers.location.current_location().await {
            Ok(fix) => {
                let battery_pct = battery
                    .map(battery_percent)
                    .or_else(|| stored.as_ref().map(|record| record.location.battery_level))
                    .unwrap_or(0);
                EmergencyLocation::from_fix(&fix, battery_pct)
            }
            Err(err) => {
                warn!("snapshot: location read failed, reusing stored fix: {err:#}");
                match stored {
                    Some(record) => {
                        let mut location = record.location;
                        // The stale fix keeps its own timestamp; only the
                        // battery reading is refreshed when available.
                        if let Some(level) = battery {
                            location.battery_level = battery_percent(level);
                        }
                        location
                    }
                    None => EmergencyLocation {
                        timestamp: Utc::now(),
                        coordinates: [0.0, 0.0],
                        battery_level: battery.map(battery_percent).unwrap_or(0),
                        accuracy: 0.0,
                    },
                }
            }
        };

        (location, battery)
    }

    /// Record shaped from the session as it stands right now. The emergency
    /// path captures the session up front and goes through `record_for`
    /// directly instead.
    async fn build_record(
        &self,
        location: EmergencyLocation,
        reason: Option<EmergencyReason>,
    ) -> EmergencyRecord {
        let session = self.session.lock().await;
        Self::record_for(&session, location, reason)
    }

    fn record_for(
        session: &TrackingSession,
        location: EmergencyLocation,
        reason: Option<EmergencyReason>,
    ) -> EmergencyRecord {
        EmergencyRecord {
            attendance_id: session.attendance_id.clone(),
            employee_id: session.employee_id.clone(),
            employee_name: session.employee_name.clone(),
            tracking_active: session.is_tracking,
            last_stored_time: Utc::now(),
            consecutive_failures: session.consecutive_failures,
            was_online: session.is_online,
            offline_start_time: session.offline_start_time,
            location,
            reason: reason.map(|reason| reason.as_str().to_string()),
        }
    }

    /// The single place the write-failure policy lives: a failed store write
    /// bumps `consecutive_failures`, a successful one resets it. Sensor
    /// failures never touch the counter.
    pub(crate) async fn persist_record(&self, record: &EmergencyRecord) {
        match self.store.write(record).await {
            Ok(()) => {
                self.session.lock().await.consecutive_failures = 0;
            }
            Err(err) => {
                let mut session = self.session.lock().await;
                session.consecutive_failures = session.consecutive_failures.saturating_add(1);
                warn!(
                    "emergency record write failed ({} consecutive): {err:#}",
                    session.consecutive_failures
                );
            }
        }
    }
}
