use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connectivity state as reported by the platform network monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    pub is_connected: bool,
    pub is_internet_reachable: bool,
    /// Platform connection kind, e.g. "wifi", "cellular", "none".
    pub connection_type: String,
    pub last_checked: DateTime<Utc>,
}

impl NetworkStatus {
    pub fn online(connection_type: &str) -> Self {
        Self {
            is_connected: true,
            is_internet_reachable: true,
            connection_type: connection_type.to_string(),
            last_checked: Utc::now(),
        }
    }

    pub fn offline() -> Self {
        Self {
            is_connected: false,
            is_internet_reachable: false,
            connection_type: "none".to_string(),
            last_checked: Utc::now(),
        }
    }

    /// Online means a link is up *and* the internet is actually reachable;
    /// a captive portal or dead uplink counts as offline.
    pub fn is_online(&self) -> bool {
        self.is_connected && self.is_internet_reachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_requires_both_flags() {
        let mut status = NetworkStatus::online("wifi");
        assert!(status.is_online());

        status.is_internet_reachable = false;
        assert!(!status.is_online(), "connected without reachability is offline");

        status.is_internet_reachable = true;
        status.is_connected = false;
        assert!(!status.is_online());

        assert!(!NetworkStatus::offline().is_online());
    }
}
