use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TrackingPhase {
    Idle,
    Starting,
    Active,
    Stopping,
}

impl Default for TrackingPhase {
    fn default() -> Self {
        TrackingPhase::Idle
    }
}

/// In-memory state of one tracking run. Created fresh on every start, mutated
/// only by the coordinator, reset to defaults on stop.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSession {
    pub phase: TrackingPhase,
    /// True between a successful start and a completed stop. Flipped to false
    /// as the very first step of teardown so in-flight timer callbacks bail
    /// out at their next check.
    pub is_tracking: bool,
    pub employee_id: Option<String>,
    pub employee_name: Option<String>,
    pub attendance_id: Option<String>,
    /// Log-correlation id minted per run.
    pub run_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    /// Consecutive emergency-store write failures; reset on any successful
    /// write, never touched by sensor-read failures.
    pub consecutive_failures: u32,
    /// Last known connectivity; `None` only before the first read.
    pub is_online: Option<bool>,
    /// Wall-clock stamp of the last online→offline transition, kept for the
    /// persisted record.
    pub offline_start_time: Option<DateTime<Utc>>,
    /// Monotonic twin of `offline_start_time`; combines with the poll loop to
    /// evaluate the offline timeout without trusting the wall clock.
    #[serde(skip)]
    pub offline_anchor: Option<Instant>,
}

impl Default for TrackingSession {
    fn default() -> Self {
        Self {
            phase: TrackingPhase::Idle,
            is_tracking: false,
            employee_id: None,
            employee_name: None,
            attendance_id: None,
            run_id: None,
            started_at: None,
            consecutive_failures: 0,
            is_online: None,
            offline_start_time: None,
            offline_anchor: None,
        }
    }
}

impl TrackingSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds identity and seeds a fresh run. Connectivity comes from the
    /// read taken at start; the offline clock always starts unset.
    pub fn begin(
        &mut self,
        employee_id: String,
        employee_name: String,
        attendance_id: Option<String>,
        online: bool,
        run_id: String,
    ) {
        *self = Self {
            phase: TrackingPhase::Starting,
            is_tracking: true,
            employee_id: Some(employee_id),
            employee_name: Some(employee_name),
            attendance_id,
            run_id: Some(run_id),
            started_at: Some(Utc::now()),
            consecutive_failures: 0,
            is_online: Some(online),
            offline_start_time: None,
            offline_anchor: None,
        };
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Stamps the offline clock once; repeated calls while already stamped
    /// keep the original instant (re-stamping would push the timeout out).
    pub fn mark_offline(&mut self) {
        if self.offline_anchor.is_none() {
            self.offline_start_time = Some(Utc::now());
            self.offline_anchor = Some(Instant::now());
        }
    }

    pub fn clear_offline(&mut self) {
        self.offline_start_time = None;
        self.offline_anchor = None;
    }

    /// Time spent offline since the last online→offline transition.
    pub fn offline_elapsed(&self) -> Option<Duration> {
        self.offline_anchor.map(|anchor| anchor.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_binds_identity_and_clears_offline_clock() {
        let mut session = TrackingSession::new();
        session.consecutive_failures = 4;
        session.mark_offline();

        session.begin(
            "emp-1".to_string(),
            "A. Rao".to_string(),
            Some("att-9".to_string()),
            true,
            "run-1".to_string(),
        );

        assert_eq!(session.phase, TrackingPhase::Starting);
        assert!(session.is_tracking);
        assert_eq!(session.employee_id.as_deref(), Some("emp-1"));
        assert_eq!(session.attendance_id.as_deref(), Some("att-9"));
        assert_eq!(session.consecutive_failures, 0);
        assert_eq!(session.is_online, Some(true));
        assert!(session.offline_start_time.is_none());
        assert!(session.offline_anchor.is_none());
    }

    #[test]
    fn reset_returns_to_defaults() {
        let mut session = TrackingSession::new();
        session.begin(
            "emp-1".to_string(),
            "A. Rao".to_string(),
            None,
            false,
            "run-1".to_string(),
        );
        session.reset();

        assert_eq!(session.phase, TrackingPhase::Idle);
        assert!(!session.is_tracking);
        assert!(session.employee_id.is_none());
        assert!(session.is_online.is_none());
    }

    #[tokio::test]
    async fn offline_stamp_is_sticky_until_cleared() {
        let mut session = TrackingSession::new();
        session.mark_offline();
        let first_anchor = session.offline_anchor;
        let first_stamp = session.offline_start_time;

        session.mark_offline();
        assert_eq!(session.offline_anchor, first_anchor);
        assert_eq!(session.offline_start_time, first_stamp);

        session.clear_offline();
        assert!(session.offline_anchor.is_none());
        assert!(session.offline_elapsed().is_none());

        session.mark_offline();
        assert!(session.offline_elapsed().is_some());
    }
}
