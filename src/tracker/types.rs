use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::TrackerError;
use crate::astro::{Equatorial, Horizontal};
use crate::rotator::RotatorPosition;

/// A fixed point on the sky to follow.
pub type CelestialTarget = Equatorial;

const MAX_TOLERANCE_DEG: f64 = 30.0;
const MAX_LEAD: Duration = Duration::from_secs(3600);

/// Builds a target from optional RA/Dec, as given on the command line.
/// Both absent means no target; only one of them is an error.
pub fn target_from_parts(
    ra_deg: Option<f64>,
    dec_deg: Option<f64>,
) -> Result<Option<CelestialTarget>, TrackerError> {
    match (ra_deg, dec_deg) {
        (None, None) => Ok(None),
        (Some(ra), Some(dec)) => validate_target(ra, dec).map(Some),
        _ => Err(TrackerError::InvalidTarget {
            ra: ra_deg,
            dec: dec_deg,
        }),
    }
}

pub fn validate_target(ra_deg: f64, dec_deg: f64) -> Result<CelestialTarget, TrackerError> {
    if !ra_deg.is_finite() || !dec_deg.is_finite() || !(-90.0..=90.0).contains(&dec_deg) {
        return Err(TrackerError::InvalidTarget {
            ra: Some(ra_deg),
            dec: Some(dec_deg),
        });
    }
    Ok(Equatorial::new(ra_deg.rem_euclid(360.0), dec_deg))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    /// Time between ticks.
    #[serde(deserialize_with = "crate::config::duration")]
    pub cadence: Duration,
    /// Separation below which the rotator is considered on source.
    pub tolerance_deg: f64,
    pub min_elevation_deg: f64,
    pub max_consecutive_failures: u32,
    /// Aim where the target will be this far in the future.
    #[serde(deserialize_with = "crate::config::duration")]
    pub lead: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            cadence: Duration::from_secs(30),
            tolerance_deg: 2.0,
            min_elevation_deg: 0.0,
            max_consecutive_failures: 5,
            lead: Duration::ZERO,
        }
    }
}

impl TrackerSettings {
    pub fn validate(&self) -> Result<(), TrackerError> {
        if !(0.0..MAX_TOLERANCE_DEG).contains(&self.tolerance_deg) {
            return Err(TrackerError::InvalidTolerance(self.tolerance_deg));
        }
        if self.cadence.is_zero() {
            return Err(TrackerError::InvalidCadence);
        }
        if self.max_consecutive_failures == 0 {
            return Err(TrackerError::InvalidThreshold);
        }
        if self.lead > MAX_LEAD {
            return Err(TrackerError::InvalidLead(self.lead));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackerStatus {
    pub state: TrackerState,
    pub target: Option<CelestialTarget>,
    /// Last position confirmed by the device.
    pub last_known_position: Option<RotatorPosition>,
    pub last_update: Option<DateTime<Utc>>,
    /// Where the target was computed to be on the last tick.
    pub target_alt_az: Option<Horizontal>,
    pub on_source: bool,
    pub below_horizon: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl TrackerStatus {
    pub(super) fn new(target: Option<CelestialTarget>) -> Self {
        Self {
            state: TrackerState::Idle,
            target,
            last_known_position: None,
            last_update: None,
            target_alt_az: None,
            on_source: false,
            below_horizon: false,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No target: position polled only.
    Observed(RotatorPosition),
    OnSource { separation_deg: f64 },
    Moved {
        to: RotatorPosition,
        separation_deg: f64,
    },
    /// Target below the minimum elevation; position held.
    BelowHorizon(Horizontal),
    Fault { consecutive: u32 },
    /// Failure threshold reached; the tracker stopped itself.
    FailSafe,
    /// The tracker had already stopped.
    Stopped,
}
