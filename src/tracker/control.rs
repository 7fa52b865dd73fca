use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use super::error::TrackerError;
use super::types::{
    validate_target, CelestialTarget, TickOutcome, TrackerSettings, TrackerState, TrackerStatus,
};
use crate::astro::{
    separation_deg, to_equatorial, to_galactic, to_horizontal, Equatorial, Galactic, Horizontal,
    ObserverSite,
};
use crate::rotator::{Rotator, RotatorError, RotatorPosition, Transport};

#[derive(Debug)]
struct Shared {
    status: TrackerStatus,
}

/// Read side of a tracker. Cheap to clone; never touches the rotator.
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    site: ObserverSite,
    shared: Arc<StdMutex<Shared>>,
}

impl TrackerHandle {
    fn new(site: ObserverSite, target: Option<CelestialTarget>) -> Self {
        Self {
            site,
            shared: Arc::new(StdMutex::new(Shared {
                status: TrackerStatus::new(target),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn site(&self) -> &ObserverSite {
        &self.site
    }

    pub fn status(&self) -> TrackerStatus {
        self.lock().status.clone()
    }

    pub fn state(&self) -> TrackerState {
        self.lock().status.state
    }

    pub fn on_source(&self) -> bool {
        self.lock().status.on_source
    }

    pub fn rotator_position(&self) -> Option<RotatorPosition> {
        self.lock().status.last_known_position
    }

    /// Computed target position while tracking, otherwise the rotator's
    /// own reading.
    pub fn current_alt_az(&self) -> Option<Horizontal> {
        let shared = self.lock();
        shared
            .status
            .target_alt_az
            .or_else(|| shared.status.last_known_position.map(Horizontal::from))
    }

    pub fn current_ra_dec(&self) -> Option<Equatorial> {
        self.current_ra_dec_at(Utc::now())
    }

    pub fn current_ra_dec_at(&self, time: DateTime<Utc>) -> Option<Equatorial> {
        let position = self.rotator_position()?;
        Some(to_equatorial(&position.into(), &self.site, time))
    }

    pub fn current_galactic(&self) -> Option<Galactic> {
        self.current_galactic_at(Utc::now())
    }

    pub fn current_galactic_at(&self, time: DateTime<Utc>) -> Option<Galactic> {
        self.current_ra_dec_at(time).map(|eq| to_galactic(&eq))
    }

    pub fn set_target(&self, ra_deg: f64, dec_deg: f64) -> Result<(), TrackerError> {
        let target = validate_target(ra_deg, dec_deg)?;
        let mut shared = self.lock();
        shared.status.target = Some(target);
        clear_tracking(&mut shared.status);
        info!("Tracking RA {:.4}, Dec {:.4}", target.ra_deg, target.dec_deg);
        Ok(())
    }

    pub fn clear_target(&self) {
        let mut shared = self.lock();
        shared.status.target = None;
        clear_tracking(&mut shared.status);
        info!("Target cleared, polling position only");
    }

    pub(super) fn set_state(&self, state: TrackerState) {
        self.lock().status.state = state;
    }
}

fn clear_tracking(status: &mut TrackerStatus) {
    status.target_alt_az = None;
    status.on_source = false;
    status.below_horizon = false;
}

/// One tracker's tick logic, driven by the worker or stepped directly.
pub struct TrackingController<T: Transport> {
    rotator: Rotator<T>,
    settings: TrackerSettings,
    handle: TrackerHandle,
}

impl<T: Transport> TrackingController<T> {
    pub fn new(
        rotator: Rotator<T>,
        site: ObserverSite,
        target: Option<CelestialTarget>,
        settings: TrackerSettings,
    ) -> Result<Self, TrackerError> {
        settings.validate()?;
        let target = target
            .map(|t| validate_target(t.ra_deg, t.dec_deg))
            .transpose()?;

        match &target {
            Some(t) => info!("Tracking RA {:.4}, Dec {:.4}", t.ra_deg, t.dec_deg),
            None => info!("No target given, polling position only"),
        }

        Ok(Self {
            rotator,
            settings,
            handle: TrackerHandle::new(site, target),
        })
    }

    pub fn handle(&self) -> TrackerHandle {
        self.handle.clone()
    }

    /// Polls the rotator, then moves it towards the target if needed.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let target = {
            let shared = self.handle.lock();
            if shared.status.state == TrackerState::Stopped {
                return TickOutcome::Stopped;
            }
            shared.status.target
        };

        let position = match self.rotator.get_position() {
            Ok(position) => position,
            Err(e) => return self.record_failure(e),
        };

        let Some(target) = target else {
            let mut shared = self.handle.lock();
            shared.status.last_known_position = Some(position);
            shared.status.last_update = Some(now);
            clear_tracking(&mut shared.status);
            drop(shared);
            self.record_success();
            return TickOutcome::Observed(position);
        };

        let at = chrono::Duration::from_std(self.settings.lead)
            .ok()
            .and_then(|lead| now.checked_add_signed(lead))
            .unwrap_or(now);
        let desired = to_horizontal(&target, self.handle.site(), at);
        let separation = separation_deg(&position.into(), &desired);
        let below_horizon = desired.alt_deg < self.settings.min_elevation_deg;
        debug!(
            "Target at alt {:.2}, az {:.2}; separation {:.2} deg",
            desired.alt_deg, desired.az_deg, separation
        );

        {
            let mut shared = self.handle.lock();
            shared.status.last_known_position = Some(position);
            shared.status.last_update = Some(now);
            // retargeted during the poll; the next tick picks up the new target
            if shared.status.target != Some(target) {
                drop(shared);
                self.record_success();
                return TickOutcome::Observed(position);
            }
            shared.status.target_alt_az = Some(desired);
            shared.status.below_horizon = below_horizon;
            shared.status.on_source = !below_horizon && separation <= self.settings.tolerance_deg;
        }

        let outcome = if below_horizon {
            warn!(
                "Target at elevation {:.1} is below the {:.1} deg limit, holding position",
                desired.alt_deg, self.settings.min_elevation_deg
            );
            TickOutcome::BelowHorizon(desired)
        } else if separation <= self.settings.tolerance_deg {
            debug!("Within tolerance, not moving");
            TickOutcome::OnSource {
                separation_deg: separation,
            }
        } else {
            let to = RotatorPosition::new(desired.az_deg.rem_euclid(360.0), desired.alt_deg);
            if let Err(e) = self.rotator.move_to(to) {
                return self.record_failure(e);
            }
            TickOutcome::Moved {
                to,
                separation_deg: separation,
            }
        };

        self.record_success();
        outcome
    }

    /// Stops the rotator and releases its transport.
    pub fn shutdown(&mut self) {
        if self.rotator.is_open() {
            info!("Ending tracking, closing rotator link");
        }
        if let Err(e) = self.rotator.end() {
            warn!("Rotator did not acknowledge shutdown cleanly: {}", e);
        }
    }

    fn record_success(&self) {
        let mut shared = self.handle.lock();
        shared.status.consecutive_failures = 0;
        shared.status.last_error = None;
    }

    fn record_failure(&mut self, err: RotatorError) -> TickOutcome {
        let consecutive = {
            let mut shared = self.handle.lock();
            shared.status.consecutive_failures += 1;
            shared.status.last_error = Some(err.to_string());
            shared.status.consecutive_failures
        };

        if consecutive < self.settings.max_consecutive_failures {
            warn!(
                "Rotator fault ({}/{}): {}",
                consecutive, self.settings.max_consecutive_failures, err
            );
            return TickOutcome::Fault { consecutive };
        }

        error!(
            "{} consecutive rotator faults, last: {}; stopping tracker",
            consecutive, err
        );
        // the rotator is left in its last commanded state
        self.rotator.release();
        self.handle.set_state(TrackerState::Stopped);
        TickOutcome::FailSafe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotator::sim::{Fault, SimulatedPort, SimulatedRotator};
    use crate::rotator::{Command, Limits, Rot2Prog};
    use std::sync::Mutex;
    use chrono::TimeZone;
    use std::time::Duration;

    fn green_bank() -> ObserverSite {
        ObserverSite::new(39.1, -79.2, 100.0)
    }

    fn instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 22, 6, 0, 0).unwrap()
    }

    fn controller(
        sim: &SimulatedRotator,
        target: Option<CelestialTarget>,
        settings: TrackerSettings,
    ) -> TrackingController<SimulatedPort> {
        let rotator = Rotator::new(sim.port(), Rot2Prog::default(), Duration::from_millis(20), 1);
        TrackingController::new(rotator, green_bank(), target, settings).unwrap()
    }

    #[test]
    fn no_target_only_polls() {
        let sim = SimulatedRotator::new(RotatorPosition::new(120.0, 30.0));
        let mut ctl = controller(&sim, None, TrackerSettings::default());

        for i in 0..10 {
            let outcome = ctl.tick(instant() + chrono::Duration::seconds(30 * i));
            assert!(matches!(outcome, TickOutcome::Observed(_)));
        }

        assert_eq!(sim.polls(), 10);
        assert!(sim.moves().is_empty());
        let h = ctl.handle().current_alt_az().unwrap();
        assert!((h.az_deg - 120.0).abs() < 1e-6);
        assert!((h.alt_deg - 30.0).abs() < 1e-6);
    }

    #[test]
    fn moves_once_onto_target() {
        let sim = SimulatedRotator::new(RotatorPosition::new(0.0, 0.0));
        let mut ctl = controller(
            &sim,
            Some(Equatorial::new(0.0, 0.0)),
            TrackerSettings::default(),
        );

        let outcome = ctl.tick(instant());
        let to = match outcome {
            TickOutcome::Moved { to, .. } => to,
            other => panic!("expected a move, got {:?}", other),
        };
        assert!((to.elevation_deg - 49.5008).abs() < 0.01);
        assert!((to.azimuth_deg - 198.7883).abs() < 0.01);

        // the device receives the set point at its 0.1 degree resolution
        let moves = sim.moves();
        assert_eq!(moves.len(), 1);
        assert!((moves[0].azimuth_deg - to.azimuth_deg).abs() <= 0.05 + 1e-9);
        assert!((moves[0].elevation_deg - to.elevation_deg).abs() <= 0.05 + 1e-9);

        // the reading taken before the move is what the tracker reports
        let status = ctl.handle().status();
        assert_eq!(
            status.last_known_position,
            Some(RotatorPosition::new(0.0, 0.0))
        );
        assert!(!status.on_source);

        assert!(matches!(
            ctl.tick(instant() + chrono::Duration::seconds(1)),
            TickOutcome::OnSource { .. }
        ));
        assert_eq!(sim.moves().len(), 1);
        assert!(ctl.handle().on_source());
    }

    #[test]
    fn derived_coordinates_follow_the_reading() {
        let sim = SimulatedRotator::new(RotatorPosition::new(198.8, 49.5));
        let mut ctl = controller(&sim, None, TrackerSettings::default());
        let handle = ctl.handle();
        assert!(handle.current_ra_dec_at(instant()).is_none());

        ctl.tick(instant());

        let eq = handle.current_ra_dec_at(instant()).unwrap();
        let dra = (eq.ra_deg + 180.0).rem_euclid(360.0) - 180.0;
        assert!(dra.abs() < 0.05, "ra {}", eq.ra_deg);
        assert!(eq.dec_deg.abs() < 0.05, "dec {}", eq.dec_deg);

        let gal = handle.current_galactic_at(instant()).unwrap();
        assert!((gal.l_deg - 96.337).abs() < 0.1);
        assert!((gal.b_deg + 60.189).abs() < 0.1);
    }

    #[test]
    fn holds_below_horizon_but_reports_target() {
        let sim = SimulatedRotator::new(RotatorPosition::new(180.0, 10.0));
        let mut ctl = controller(
            &sim,
            Some(Equatorial::new(0.0, -80.0)),
            TrackerSettings::default(),
        );

        let outcome = ctl.tick(instant());
        assert!(matches!(outcome, TickOutcome::BelowHorizon(h) if h.alt_deg < 0.0));
        assert!(sim.moves().is_empty());

        let handle = ctl.handle();
        let reported = handle.current_alt_az().unwrap();
        assert!(reported.alt_deg < 0.0);
        assert!(handle.status().below_horizon);
        assert_eq!(
            handle.rotator_position(),
            Some(RotatorPosition::new(180.0, 10.0))
        );
    }

    #[test]
    fn minimum_elevation_is_configurable() {
        let sim = SimulatedRotator::new(RotatorPosition::new(0.0, 0.0));
        let settings = TrackerSettings {
            min_elevation_deg: 60.0,
            ..Default::default()
        };
        let mut ctl = controller(&sim, Some(Equatorial::new(0.0, 0.0)), settings);

        assert!(matches!(ctl.tick(instant()), TickOutcome::BelowHorizon(_)));
        assert!(sim.moves().is_empty());
    }

    #[test]
    fn target_changes_apply_on_next_tick() {
        let sim = SimulatedRotator::new(RotatorPosition::new(0.0, 0.0));
        let mut ctl = controller(&sim, None, TrackerSettings::default());
        let handle = ctl.handle();

        assert!(matches!(ctl.tick(instant()), TickOutcome::Observed(_)));

        handle.set_target(0.0, 0.0).unwrap();
        assert!(matches!(ctl.tick(instant()), TickOutcome::Moved { .. }));

        handle.clear_target();
        assert!(matches!(ctl.tick(instant()), TickOutcome::Observed(_)));
        assert!(handle.status().target_alt_az.is_none());
        assert_eq!(sim.moves().len(), 1);

        assert!(handle.set_target(0.0, -91.0).is_err());
    }

    #[test]
    fn single_dropped_poll_is_absorbed() {
        let sim = SimulatedRotator::new(RotatorPosition::new(10.0, 10.0));
        let mut ctl = controller(&sim, None, TrackerSettings::default());

        sim.inject(Fault::Silent);
        assert!(matches!(ctl.tick(instant()), TickOutcome::Observed(_)));
        assert_eq!(sim.polls(), 2);

        sim.inject(Fault::Silent);
        sim.inject(Fault::Silent);
        assert_eq!(ctl.tick(instant()), TickOutcome::Fault { consecutive: 1 });
        assert_eq!(sim.polls(), 4);
    }

    #[test]
    fn fails_safe_after_consecutive_link_errors() {
        let sim = SimulatedRotator::new(RotatorPosition::new(10.0, 10.0));
        let target = Some(Equatorial::new(0.0, 0.0));
        let mut ctl = controller(&sim, target, TrackerSettings::default());
        let handle = ctl.handle();
        handle.set_state(TrackerState::Running);

        for _ in 0..5 {
            sim.inject(Fault::Disconnected);
        }
        for expected in 1..5 {
            assert_eq!(
                ctl.tick(instant()),
                TickOutcome::Fault {
                    consecutive: expected
                }
            );
            assert_eq!(handle.state(), TrackerState::Running);
        }
        assert_eq!(ctl.tick(instant()), TickOutcome::FailSafe);

        assert_eq!(handle.state(), TrackerState::Stopped);
        assert!(sim.is_released());
        assert!(handle.rotator_position().is_none());
        assert!(sim.moves().is_empty());
        assert_eq!(ctl.tick(instant()), TickOutcome::Stopped);
    }

    #[test]
    fn success_resets_failure_count() {
        let sim = SimulatedRotator::new(RotatorPosition::new(10.0, 10.0));
        let mut ctl = controller(&sim, None, TrackerSettings::default());
        let handle = ctl.handle();

        for _ in 0..4 {
            sim.inject(Fault::Disconnected);
        }
        for _ in 0..4 {
            ctl.tick(instant());
        }
        assert_eq!(handle.status().consecutive_failures, 4);
        assert!(handle.status().last_error.is_some());

        assert!(matches!(ctl.tick(instant()), TickOutcome::Observed(_)));
        assert_eq!(handle.status().consecutive_failures, 0);

        sim.inject(Fault::Disconnected);
        assert_eq!(ctl.tick(instant()), TickOutcome::Fault { consecutive: 1 });
    }

    #[test]
    fn failed_move_counts_as_fault() {
        let sim = SimulatedRotator::new(RotatorPosition::new(0.0, 0.0));
        // the target sits in the western sky, beyond this mount's azimuth range
        let codec = Rot2Prog::new(
            10,
            Limits {
                azimuth_min: 0.0,
                azimuth_max: 180.0,
                elevation_min: 0.0,
                elevation_max: 90.0,
            },
        );
        let rotator = Rotator::new(sim.port(), codec, Duration::from_millis(20), 1);
        let settings = TrackerSettings {
            max_consecutive_failures: 2,
            ..Default::default()
        };
        let target = Some(Equatorial::new(0.0, 0.0));
        let mut ctl = TrackingController::new(rotator, green_bank(), target, settings).unwrap();
        let handle = ctl.handle();

        assert_eq!(ctl.tick(instant()), TickOutcome::Fault { consecutive: 1 });
        assert!(sim.moves().is_empty());
        // the poll itself went through
        assert_eq!(handle.rotator_position(), Some(RotatorPosition::new(0.0, 0.0)));

        assert_eq!(ctl.tick(instant()), TickOutcome::FailSafe);
        assert_eq!(handle.state(), TrackerState::Stopped);
        assert!(sim.is_released());
        assert_eq!(
            sim.commands(),
            vec![Command::GetPosition, Command::GetPosition]
        );
    }

    /// Clears the target while the status frame is on the wire.
    struct RetargetingPort {
        inner: SimulatedPort,
        handle: Arc<Mutex<Option<TrackerHandle>>>,
    }

    impl Transport for RetargetingPort {
        fn send(&mut self, bytes: &[u8]) -> std::io::Result<()> {
            if let Some(handle) = self.handle.lock().unwrap().as_ref() {
                handle.clear_target();
            }
            self.inner.send(bytes)
        }

        fn receive(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.inner.receive(buf)
        }

        fn discard_input(&mut self) -> std::io::Result<()> {
            self.inner.discard_input()
        }
    }

    #[test]
    fn target_cleared_mid_tick_is_not_overwritten() {
        let sim = SimulatedRotator::new(RotatorPosition::new(0.0, 0.0));
        let slot = Arc::new(Mutex::new(None));
        let port = RetargetingPort {
            inner: sim.port(),
            handle: slot.clone(),
        };
        let rotator = Rotator::new(port, Rot2Prog::default(), Duration::from_millis(20), 1);
        let target = Some(Equatorial::new(0.0, 0.0));
        let mut ctl =
            TrackingController::new(rotator, green_bank(), target, TrackerSettings::default())
                .unwrap();
        let handle = ctl.handle();
        *slot.lock().unwrap() = Some(handle.clone());

        assert!(matches!(ctl.tick(instant()), TickOutcome::Observed(_)));

        let status = handle.status();
        assert!(status.target.is_none());
        assert!(status.target_alt_az.is_none());
        assert!(!status.on_source);
        assert!(sim.moves().is_empty());
        let reported = handle.current_alt_az().unwrap();
        assert!(reported.alt_deg.abs() < 1e-6);
        assert!(reported.az_deg.abs() < 1e-6);
    }

    #[test]
    fn rejects_invalid_settings() {
        let sim = SimulatedRotator::new(RotatorPosition::new(0.0, 0.0));
        let rotator = Rotator::new(sim.port(), Rot2Prog::default(), Duration::from_millis(20), 1);
        let settings = TrackerSettings {
            tolerance_deg: 45.0,
            ..Default::default()
        };
        assert!(matches!(
            TrackingController::new(rotator, green_bank(), None, settings),
            Err(TrackerError::InvalidTolerance(_))
        ));
    }
}
