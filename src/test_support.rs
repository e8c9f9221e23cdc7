//! In-memory collaborators for the unit tests.

use std::collections::VecDeque;

use core::convert::Infallible;

use embedded_io_async::{ErrorType, Read, ReadReady, Write};

use crate::config::MOTOR_NB;
use crate::drivers::{InertialSensor, LoadCell, MargSample, ServoBus};
use crate::ipc::PositionMailbox;

/* ───── Serial port ─────────────────────────────────────────────────── */

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8>>;

/// Scripted byte stream. Reads pend forever once `rx` is empty, so only a
/// caller-side timeout ends them. A responder sees every flushed chunk and
/// may queue the peer's answer.
#[derive(Default)]
pub struct MockPort {
    rx: VecDeque<u8>,
    pub tx: Vec<u8>,
    pub flushes: usize,
    flushed_upto: usize,
    responder: Option<Responder>,
}

impl MockPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rx(bytes: &[u8]) -> Self {
        let mut port = Self::new();
        port.push_rx(bytes);
        port
    }

    pub fn push_rx(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }

    pub fn respond_with(mut self, f: impl FnMut(&[u8]) -> Vec<u8> + 'static) -> Self {
        self.responder = Some(Box::new(f));
        self
    }

    pub fn pending_rx(&self) -> usize {
        self.rx.len()
    }

    /// Drains what the device has sent so far.
    pub fn take_tx(&mut self) -> Vec<u8> {
        self.flushed_upto = 0;
        core::mem::take(&mut self.tx)
    }
}

impl ErrorType for MockPort {
    type Error = Infallible;
}

impl Read for MockPort {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.rx.is_empty() || buf.is_empty() {
            core::future::pending::<()>().await;
        }
        let n = buf.len().min(self.rx.len());
        for (slot, b) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = b;
        }
        Ok(n)
    }
}

impl ReadReady for MockPort {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.rx.is_empty())
    }
}

impl Write for MockPort {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.tx.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.flushes += 1;
        let fresh = &self.tx[self.flushed_upto..];
        if let Some(responder) = self.responder.as_mut() {
            let reply = responder(fresh);
            self.rx.extend(reply);
        }
        self.flushed_upto = self.tx.len();
        Ok(())
    }
}

/* ───── Servo bus ───────────────────────────────────────────────────── */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusCall {
    Request(u8),
    Move { id: u8, position: u16, span: u16 },
    Unload(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusFault(pub u8);

/// Replies to position requests synchronously, from inside the call.
pub struct RecordingServoBus {
    pub calls: Vec<BusCall>,
    /// Reported position, indexed by motor id.
    pub positions: [u16; MOTOR_NB],
    /// Motors that never answer a position request.
    pub silent: Vec<u8>,
    /// Motors whose every command fails.
    pub failing: Vec<u8>,
}

impl Default for RecordingServoBus {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            positions: [512; MOTOR_NB],
            silent: Vec::new(),
            failing: Vec::new(),
        }
    }
}

impl RecordingServoBus {
    pub fn moves(&self) -> Vec<BusCall> {
        self.calls
            .iter()
            .copied()
            .filter(|c| matches!(c, BusCall::Move { .. }))
            .collect()
    }

    fn check(&self, id: u8) -> Result<(), BusFault> {
        if self.failing.contains(&id) {
            Err(BusFault(id))
        } else {
            Ok(())
        }
    }
}

impl ServoBus for RecordingServoBus {
    type Error = BusFault;

    async fn request_position(
        &mut self,
        id: u8,
        mailbox: &PositionMailbox,
    ) -> Result<(), Self::Error> {
        self.calls.push(BusCall::Request(id));
        self.check(id)?;
        if !self.silent.contains(&id) {
            if let Some(&raw) = self.positions.get(id as usize) {
                mailbox.deliver(id, raw);
            }
        }
        Ok(())
    }

    async fn move_time(&mut self, id: u8, position: u16, span: u16) -> Result<(), Self::Error> {
        self.calls.push(BusCall::Move { id, position, span });
        self.check(id)
    }

    async fn set_unload(&mut self, id: u8) -> Result<(), Self::Error> {
        self.calls.push(BusCall::Unload(id));
        self.check(id)
    }
}

/* ───── Sensors ─────────────────────────────────────────────────────── */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorFault;

#[derive(Debug, Default)]
pub struct FixedLoadCell {
    pub value: i32,
    pub fail: bool,
}

impl FixedLoadCell {
    pub fn new(value: i32) -> Self {
        Self { value, fail: false }
    }
}

impl LoadCell for FixedLoadCell {
    type Error = SensorFault;

    async fn read(&mut self) -> Result<i32, Self::Error> {
        if self.fail {
            Err(SensorFault)
        } else {
            Ok(self.value)
        }
    }
}

#[derive(Debug, Default)]
pub struct ScriptedImu {
    pub current: MargSample,
    pub fail_begin: bool,
    pub fail_update: bool,
    pub begun: bool,
    pub updates: usize,
}

impl ScriptedImu {
    pub fn new(sample: MargSample) -> Self {
        Self {
            current: sample,
            ..Self::default()
        }
    }
}

impl InertialSensor for ScriptedImu {
    type Error = SensorFault;

    async fn begin(&mut self) -> Result<(), Self::Error> {
        if self.fail_begin {
            return Err(SensorFault);
        }
        self.begun = true;
        Ok(())
    }

    async fn update(&mut self) -> Result<(), Self::Error> {
        if self.fail_update {
            return Err(SensorFault);
        }
        self.updates += 1;
        Ok(())
    }

    fn sample(&self) -> MargSample {
        self.current
    }
}
