pub mod emergency;
pub mod network;

pub use emergency::{
    reason_preserves_record, EmergencyLocation, EmergencyRecord, EmergencyReason,
    PERMISSION_STOP_REASON,
};
pub use network::NetworkStatus;
