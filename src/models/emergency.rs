use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::{Capability, LocationFix};

/// Stop reason passed by the permission monitor when it tears a session down.
pub const PERMISSION_STOP_REASON: &str = "Permission revoked";

/// Trigger of an autonomous forced check-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmergencyReason {
    LowBattery,
    PermissionRevoked(Capability),
    OfflineTimeout,
}

impl EmergencyReason {
    /// The reason string stamped into the persisted record. These values are
    /// part of the stored format and must not change between releases.
    pub fn as_str(self) -> &'static str {
        match self {
            EmergencyReason::LowBattery => "Low battery - automatic check-out",
            EmergencyReason::PermissionRevoked(Capability::Location) => {
                "Emergency - Location permission revoked"
            }
            EmergencyReason::PermissionRevoked(Capability::Notifications) => {
                "Emergency - Notification permission revoked"
            }
            EmergencyReason::PermissionRevoked(Capability::Camera) => {
                "Emergency - Camera permission revoked"
            }
            EmergencyReason::OfflineTimeout => "Emergency - No internet for 1+ hours",
        }
    }

    /// Body text of the user-visible notification shown for this emergency.
    pub fn notification_body(self) -> String {
        match self {
            EmergencyReason::LowBattery => {
                "Battery critically low. You have been checked out automatically.".to_string()
            }
            EmergencyReason::PermissionRevoked(capability) => format!(
                "{} permission was revoked. Tracking stopped and a check-out was recorded.",
                capability
            ),
            EmergencyReason::OfflineTimeout => {
                "No internet connection for over an hour. You have been checked out automatically."
                    .to_string()
            }
        }
    }
}

/// Whether a stop with this reason must leave the emergency record in place
/// for later inspection. Low-battery and permission stops keep it; everything
/// else (including a normal check-out) clears it.
pub fn reason_preserves_record(reason: &str) -> bool {
    if reason == EmergencyReason::LowBattery.as_str() || reason == PERMISSION_STOP_REASON {
        return true;
    }
    Capability::ALL
        .iter()
        .any(|capability| reason == EmergencyReason::PermissionRevoked(*capability).as_str())
}

/// Last position folded into the recovery snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyLocation {
    pub timestamp: DateTime<Utc>,
    /// `[latitude, longitude]`.
    pub coordinates: [f64; 2],
    /// Battery percentage 0–100 at the time of the fix.
    pub battery_level: u8,
    /// Reported horizontal accuracy in meters (0 when synthesized).
    pub accuracy: f64,
}

impl EmergencyLocation {
    pub fn from_fix(fix: &LocationFix, battery_level: u8) -> Self {
        Self {
            timestamp: fix.timestamp,
            coordinates: [fix.latitude, fix.longitude],
            battery_level,
            accuracy: fix.accuracy,
        }
    }
}

/// Durable last-known-good snapshot used for crash/kill recovery and forced
/// check-out. Exactly one record exists at a time; every write replaces the
/// previous value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyRecord {
    pub attendance_id: Option<String>,
    pub employee_id: Option<String>,
    pub employee_name: Option<String>,
    pub tracking_active: bool,
    pub last_stored_time: DateTime<Utc>,
    /// Consecutive emergency-store write failures at the time this record was
    /// built (resets to zero after any successful write).
    pub consecutive_failures: u32,
    pub was_online: Option<bool>,
    pub offline_start_time: Option<DateTime<Utc>>,
    pub location: EmergencyLocation,
    /// Set only when the record was produced by an emergency termination.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}
