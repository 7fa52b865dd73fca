use log::{debug, info, warn};
use serialport::SerialPort;
use std::io;
use std::time::{Duration, Instant};

use super::error::RotatorError;
use super::protocol::{Rot2Prog, RESPONSE_LEN};
use super::transport::{open_serial, Transport};
use super::types::{Command, RotatorPosition};
use crate::config::RotatorConfig;

/// Exclusive owner of the controller's transport.
///
/// Polls are retried on a dropped or garbled reply; motion commands are
/// sent once and never repeated, since a stale set point may no longer be
/// safe to drive to.
pub struct Rotator<T: Transport = Box<dyn SerialPort>> {
    codec: Rot2Prog,
    transport: Option<T>,
    timeout: Duration,
    poll_retries: u32,
}

impl Rotator<Box<dyn SerialPort>> {
    pub fn open(config: &RotatorConfig) -> Result<Self, RotatorError> {
        let port = open_serial(&config.port, config.baud_rate, config.timeout)?;
        info!(
            "Opened rotator on {} at {} baud",
            config.port, config.baud_rate
        );
        Ok(Self::new(
            port,
            config.codec(),
            config.timeout,
            config.poll_retries,
        ))
    }
}

impl<T: Transport> Rotator<T> {
    pub fn new(transport: T, codec: Rot2Prog, timeout: Duration, poll_retries: u32) -> Self {
        Self {
            codec,
            transport: Some(transport),
            timeout,
            poll_retries,
        }
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    pub fn get_position(&mut self) -> Result<RotatorPosition, RotatorError> {
        let mut attempt = 0;
        loop {
            match self.poll_once() {
                Ok(pos) => return Ok(pos),
                Err(e) if e.is_transient() && attempt < self.poll_retries => {
                    attempt += 1;
                    warn!(
                        "Position poll failed: {} (retry {}/{})",
                        e, attempt, self.poll_retries
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Alias of [`Rotator::get_position`].
    pub fn get_location(&mut self) -> Result<RotatorPosition, RotatorError> {
        self.get_position()
    }

    /// Starts a slew to `pos` without waiting for it to finish.
    pub fn move_to(&mut self, pos: RotatorPosition) -> Result<(), RotatorError> {
        let frame = self.codec.encode(&Command::MoveTo(pos))?;
        self.transport()?.send(&frame)?;
        debug!(
            "Commanded move to az {:.1}, el {:.1}",
            pos.azimuth_deg, pos.elevation_deg
        );
        Ok(())
    }

    pub fn go_to(&mut self, azimuth_deg: f64, elevation_deg: f64) -> Result<(), RotatorError> {
        self.move_to(RotatorPosition::new(azimuth_deg, elevation_deg))
    }

    pub fn stop(&mut self) -> Result<(), RotatorError> {
        let frame = self.codec.encode(&Command::Stop)?;
        self.transport()?.send(&frame)?;
        debug!("Commanded stop");
        Ok(())
    }

    /// Stops the rotator and releases the transport.
    ///
    /// The transport is dropped even when the stop frame cannot be sent; that
    /// failure is returned afterwards. Calling `end` again is a no-op.
    pub fn end(&mut self) -> Result<(), RotatorError> {
        if self.transport.is_none() {
            return Ok(());
        }

        let result = self.stop();
        if let Err(e) = &result {
            warn!("Final stop failed: {}", e);
        }
        self.transport = None;
        info!("Rotator link closed");
        result
    }

    /// Closes the link without stopping, leaving a commanded slew running.
    pub fn release(&mut self) {
        if self.transport.take().is_some() {
            info!("Rotator link released");
        }
    }

    fn poll_once(&mut self) -> Result<RotatorPosition, RotatorError> {
        let frame = self.codec.encode(&Command::GetPosition)?;
        let timeout = self.timeout;

        let transport = self.transport()?;
        transport.discard_input()?;
        transport.send(&frame)?;
        let reply = read_frame(transport, timeout)?;

        let pos = self.codec.decode(&reply)?;
        debug!(
            "Rotator at az {:.1}, el {:.1}",
            pos.azimuth_deg, pos.elevation_deg
        );
        Ok(pos)
    }

    fn transport(&mut self) -> Result<&mut T, RotatorError> {
        self.transport.as_mut().ok_or(RotatorError::Closed)
    }
}

impl<T: Transport> Drop for Rotator<T> {
    fn drop(&mut self) {
        let _ = self.end();
    }
}

fn read_frame<T: Transport>(
    transport: &mut T,
    timeout: Duration,
) -> Result<[u8; RESPONSE_LEN], RotatorError> {
    let deadline = Instant::now() + timeout;
    let mut frame = [0u8; RESPONSE_LEN];
    let mut filled = 0;

    while filled < RESPONSE_LEN {
        match transport.receive(&mut frame[filled..]) {
            Ok(0) => return Err(RotatorError::Timeout(timeout)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                ) =>
            {
                return Err(RotatorError::Timeout(timeout))
            }
            Err(e) => return Err(e.into()),
        }

        if filled < RESPONSE_LEN && Instant::now() >= deadline {
            return Err(RotatorError::Timeout(timeout));
        }
    }

    Ok(frame)
}
