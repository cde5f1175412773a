//! Background location-tracking coordinator for field attendance.
//!
//! After a worker checks in, [`TrackingController`] keeps a session alive in
//! the background: periodic location syncs, a per-second countdown behind the
//! persistent notification, connectivity and battery watchdogs, and a durable
//! [`EmergencyRecord`] so a crash or forced shutdown can be recovered (or
//! turned into an automatic check-out) on the next launch.
//!
//! The coordinator talks to the platform only through the adapter traits in
//! [`providers`]; the [`sim`] module ships scriptable in-memory
//! implementations used by the `fieldtrack-sim` demo and the integration
//! tests. The library never initializes logging; binaries do.

pub mod config;
pub mod models;
pub mod providers;
pub mod sim;
pub mod store;
pub mod tracking;

pub use config::TrackerConfig;
pub use models::{
    reason_preserves_record, EmergencyLocation, EmergencyRecord, EmergencyReason, NetworkStatus,
    PERMISSION_STOP_REASON,
};
pub use providers::{
    battery_percent, BatteryProvider, Capability, LocationFix, LocationProvider, NetworkMonitor,
    NotificationRequest, Notifier, PermissionProvider, PermissionStatus,
};
pub use store::EmergencyStore;
pub use tracking::{
    Providers, StartTrackingError, TrackerSnapshot, TrackingController, TrackingPhase,
    TrackingSession,
};
