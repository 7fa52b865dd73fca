//! In-process Rot2Prog controller.
//!
//! Answers status and stop frames with its current position and slews
//! instantly on set frames. Faults can be queued to exercise the link's
//! timeout and retry handling without hardware.

use log::trace;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::protocol::Rot2Prog;
use super::transport::Transport;
use super::types::{Command, RotatorPosition};

/// Misbehaviour applied to the next frame the device receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Frame is lost: no reply, no motion.
    Silent,
    /// Reply arrives with a corrupted terminator.
    Garbled,
    /// The write itself fails.
    Disconnected,
}

#[derive(Debug)]
struct SimState {
    codec: Rot2Prog,
    position: RotatorPosition,
    pending: VecDeque<u8>,
    faults: VecDeque<Fault>,
    received: Vec<Command>,
    open_ports: usize,
}

/// Handle to the simulated device. Clones share the same device.
#[derive(Debug, Clone)]
pub struct SimulatedRotator {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedRotator {
    pub fn new(position: RotatorPosition) -> Self {
        Self::with_codec(Rot2Prog::default(), position)
    }

    pub fn with_codec(codec: Rot2Prog, position: RotatorPosition) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                codec,
                position,
                pending: VecDeque::new(),
                faults: VecDeque::new(),
                received: Vec::new(),
                open_ports: 0,
            })),
        }
    }

    /// Opens a serial-like connection to the device.
    pub fn port(&self) -> SimulatedPort {
        self.lock().open_ports += 1;
        SimulatedPort {
            state: self.state.clone(),
        }
    }

    pub fn position(&self) -> RotatorPosition {
        self.lock().position
    }

    /// Moves the device as if by hand.
    pub fn set_position(&self, position: RotatorPosition) {
        self.lock().position = position;
    }

    pub fn inject(&self, fault: Fault) {
        self.lock().faults.push_back(fault);
    }

    /// Every well-formed frame received so far, faults included.
    pub fn commands(&self) -> Vec<Command> {
        self.lock().received.clone()
    }

    pub fn moves(&self) -> Vec<RotatorPosition> {
        self.lock()
            .received
            .iter()
            .filter_map(|c| match c {
                Command::MoveTo(pos) => Some(*pos),
                _ => None,
            })
            .collect()
    }

    pub fn polls(&self) -> usize {
        self.lock()
            .received
            .iter()
            .filter(|c| matches!(c, Command::GetPosition))
            .count()
    }

    pub fn is_released(&self) -> bool {
        self.lock().open_ports == 0
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct SimulatedPort {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedPort {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SimulatedPort {
    fn drop(&mut self) {
        let mut state = self.lock();
        state.open_ports = state.open_ports.saturating_sub(1);
    }
}

impl Transport for SimulatedPort {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        let fault = state.faults.pop_front();

        if fault == Some(Fault::Disconnected) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated device disconnected",
            ));
        }

        let command = match state.codec.decode_command(bytes) {
            Ok(command) => command,
            Err(e) => {
                trace!("Simulated rotator ignored frame: {}", e);
                return Ok(());
            }
        };
        state.received.push(command);

        if fault == Some(Fault::Silent) {
            trace!("Simulated rotator dropped {:?}", command);
            return Ok(());
        }

        let replies = match command {
            Command::GetPosition | Command::Stop => true,
            Command::MoveTo(target) => {
                state.position = target;
                false
            }
        };

        if replies {
            if let Ok(mut reply) = state.codec.encode_response(&state.position) {
                if fault == Some(Fault::Garbled) {
                    reply[reply.len() - 1] = 0;
                }
                state.pending.extend(reply);
            }
        }

        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.pending.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no reply"));
        }
        let n = buf.len().min(state.pending.len());
        for (slot, byte) in buf.iter_mut().zip(state.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.lock().pending.clear();
        Ok(())
    }
}
