use chrono::Utc;
use log::{debug, info};
use serialport::SerialPort;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::control::{TrackerHandle, TrackingController};
use super::error::TrackerError;
use super::types::{CelestialTarget, TickOutcome, TrackerSettings, TrackerState, TrackerStatus};
use crate::astro::{Equatorial, Galactic, Horizontal, ObserverSite};
use crate::rotator::{Rotator, RotatorPosition, Transport};

#[derive(Debug)]
struct WorkerHandle {
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<Result<(), TrackerError>>,
}

/// Drives a [`TrackingController`] on a fixed cadence in the background.
pub struct Tracker<T: Transport + 'static = Box<dyn SerialPort>> {
    handle: TrackerHandle,
    cadence: Duration,
    controller: Option<TrackingController<T>>,
    worker: Option<WorkerHandle>,
}

impl<T: Transport + 'static> Tracker<T> {
    pub fn new(
        rotator: Rotator<T>,
        site: ObserverSite,
        target: Option<CelestialTarget>,
        settings: TrackerSettings,
    ) -> Result<Self, TrackerError> {
        let cadence = settings.cadence;
        let controller = TrackingController::new(rotator, site, target, settings)?;
        Ok(Self {
            handle: controller.handle(),
            cadence,
            controller: Some(controller),
            worker: None,
        })
    }

    pub fn handle(&self) -> TrackerHandle {
        self.handle.clone()
    }

    pub fn status(&self) -> TrackerStatus {
        self.handle.status()
    }

    pub fn state(&self) -> TrackerState {
        self.handle.state()
    }

    pub fn rotator_position(&self) -> Option<RotatorPosition> {
        self.handle.rotator_position()
    }

    pub fn on_source(&self) -> bool {
        self.handle.on_source()
    }

    pub fn current_alt_az(&self) -> Option<Horizontal> {
        self.handle.current_alt_az()
    }

    pub fn current_ra_dec(&self) -> Option<Equatorial> {
        self.handle.current_ra_dec()
    }

    pub fn current_galactic(&self) -> Option<Galactic> {
        self.handle.current_galactic()
    }

    pub fn set_target(&self, ra_deg: f64, dec_deg: f64) -> Result<(), TrackerError> {
        self.handle.set_target(ra_deg, dec_deg)
    }

    pub fn clear_target(&self) {
        self.handle.clear_target()
    }

    /// Spawns the tracking worker. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<(), TrackerError> {
        if self.handle.state() == TrackerState::Stopped {
            return Err(TrackerError::Stopped);
        }
        if self.worker.is_some() {
            return Err(TrackerError::AlreadyRunning);
        }
        let controller = self.controller.take().ok_or(TrackerError::Stopped)?;

        let (stop_tx, stop_rx) = oneshot::channel();
        self.handle.set_state(TrackerState::Running);
        let join = tokio::spawn(run_tracker_loop(controller, self.cadence, stop_rx));
        self.worker = Some(WorkerHandle { stop_tx, join });

        info!("Tracker started, cadence {:?}", self.cadence);
        Ok(())
    }

    /// Stops tracking, halts the rotator and releases it. Safe to call more
    /// than once, and before `start`.
    pub async fn end(&mut self) -> Result<(), TrackerError> {
        let result = if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            match worker.join.await {
                Ok(result) => result,
                Err(e) => Err(e.into()),
            }
        } else if let Some(mut controller) = self.controller.take() {
            tokio::task::spawn_blocking(move || controller.shutdown())
                .await
                .map_err(TrackerError::from)
        } else {
            Ok(())
        };

        self.handle.set_state(TrackerState::Stopped);
        result
    }
}

impl<T: Transport + 'static> Drop for Tracker<T> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
        }
    }
}

async fn run_tracker_loop<T: Transport + 'static>(
    mut controller: TrackingController<T>,
    cadence: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) -> Result<(), TrackerError> {
    let mut interval = tokio::time::interval(cadence);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let should_stop = tokio::select! {
            _ = interval.tick() => false,
            _ = &mut stop_rx => true,
        };
        if should_stop {
            break;
        }

        // serial I/O blocks; the tick is awaited so ticks never overlap
        let (returned, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = controller.tick(Utc::now());
            (controller, outcome)
        })
        .await?;
        controller = returned;
        debug!("Tick: {:?}", outcome);

        if matches!(outcome, TickOutcome::FailSafe | TickOutcome::Stopped) {
            return Ok(());
        }
    }

    tokio::task::spawn_blocking(move || controller.shutdown()).await?;
    Ok(())
}
