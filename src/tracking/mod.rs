pub mod controller;
pub mod countdown;
pub(crate) mod loops;
pub mod session;

pub use controller::{
    CountdownFn, EmergencyFn, LocationUpdateFn, Providers, StartTrackingError, TrackerSnapshot,
    TrackingController,
};
pub use countdown::Countdown;
pub use session::{TrackingPhase, TrackingSession};
