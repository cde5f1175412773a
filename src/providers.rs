//! Adapter boundary for everything the coordinator consumes from the host
//! platform: GPS, battery, permission state, connectivity, and notifications.
//! Production builds wire platform bridges behind these traits; tests and the
//! demo binary use the `sim` implementations.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::models::NetworkStatus;

/// A single GPS reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters.
    pub accuracy: f64,
    pub timestamp: DateTime<Utc>,
}

/// Grant state of a single capability, as the platform reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionStatus {
    Granted,
    Denied,
    Blocked,
    Undetermined,
}

impl PermissionStatus {
    pub fn is_granted(self) -> bool {
        self == PermissionStatus::Granted
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PermissionStatus::Granted => "granted",
            PermissionStatus::Denied => "denied",
            PermissionStatus::Blocked => "blocked",
            PermissionStatus::Undetermined => "undetermined",
        }
    }
}

impl fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities tracking depends on. All three must be granted for a session
/// to start, and revocation of any one of them ends the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    /// Camera access (check-in selfie capture elsewhere in the app).
    Camera,
    /// Location access at "always"/background precision, not merely
    /// while-in-use.
    Location,
    /// Permission to post notifications; without it the foreground
    /// notification cannot be shown and background execution dies.
    Notifications,
}

impl Capability {
    pub const ALL: [Capability; 3] = [
        Capability::Camera,
        Capability::Location,
        Capability::Notifications,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Camera => "Camera",
            Capability::Location => "Location",
            Capability::Notifications => "Notification",
        };
        f.write_str(name)
    }
}

/// Converts a 0.0–1.0 charge fraction to a whole percentage.
pub fn battery_percent(level: f64) -> u8 {
    (level.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// One notification to display or replace.
///
/// Re-displaying with the same `id` replaces the existing notification in
/// place; the countdown loop uses that to rewrite the body once per second.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRequest {
    /// Replace the notification with this id; `None` lets the sink mint one.
    pub id: Option<String>,
    pub title: String,
    pub body: String,
    /// Ongoing notifications anchor a foreground service and cannot be
    /// swiped away; transient ones can.
    pub ongoing: bool,
}

/// GPS provider.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Current fix, or an error when no fix could be obtained in time.
    async fn current_location(&self) -> Result<LocationFix>;
}

/// Battery-level provider.
#[async_trait]
pub trait BatteryProvider: Send + Sync {
    /// Charge fraction in `[0.0, 1.0]`.
    async fn battery_level(&self) -> Result<f64>;
}

/// Capability grant state provider.
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    async fn check(&self, capability: Capability) -> PermissionStatus;
}

/// Connectivity provider with a push-style subscription.
pub trait NetworkMonitor: Send + Sync {
    fn current_status(&self) -> NetworkStatus;

    /// Receiver that observes every status change. Dropping the receiver is
    /// the unsubscribe.
    fn subscribe(&self) -> watch::Receiver<NetworkStatus>;
}

/// Notification sink. All operations are best-effort from the coordinator's
/// point of view except the initial foreground display, which is fatal to
/// session start when it fails.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Creates or refreshes the notification channel notifications go to.
    async fn ensure_channel(&self) -> Result<()>;

    /// Displays (or replaces) a notification, returning its id.
    async fn display(&self, request: NotificationRequest) -> Result<String>;

    async fn cancel(&self, id: &str) -> Result<()>;

    /// Cancels any still-pending triggered notifications.
    async fn cancel_all_triggered(&self) -> Result<()>;

    /// Stops the foreground service attached to the ongoing notification.
    async fn stop_foreground_service(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn battery_percent_clamps_and_rounds() {
        assert_eq!(battery_percent(0.0), 0);
        assert_eq!(battery_percent(0.754), 75);
        assert_eq!(battery_percent(0.755), 76);
        assert_eq!(battery_percent(1.0), 100);
        assert_eq!(battery_percent(1.7), 100);
        assert_eq!(battery_percent(-0.2), 0);
    }

    #[test]
    fn permission_status_display_matches_platform_strings() {
        assert_eq!(PermissionStatus::Granted.to_string(), "granted");
        assert_eq!(PermissionStatus::Blocked.to_string(), "blocked");
        assert!(PermissionStatus::Granted.is_granted());
        assert!(!PermissionStatus::Undetermined.is_granted());
    }

    #[test]
    fn capability_list_is_complete() {
        assert_eq!(Capability::ALL.len(), 3);
        assert_eq!(Capability::Location.to_string(), "Location");
        assert_eq!(Capability::Notifications.to_string(), "Notification");
    }
}
