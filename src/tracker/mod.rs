mod control;
mod error;
mod tracker;
mod types;

pub use control::{TrackerHandle, TrackingController};
pub use error::TrackerError;
pub use tracker::Tracker;
pub use types::{
    target_from_parts, validate_target, CelestialTarget, TickOutcome, TrackerSettings,
    TrackerState, TrackerStatus,
};
