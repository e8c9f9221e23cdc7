//! The onboard controller
//! ===========================================================
//!
//! One `Controller` value owns the serial codec, the hardware collaborators
//! and every piece of mutable protocol state. Handlers take `&mut self`, so
//! a message is always handled to completion before the next one is read.
//!
//! * `handshake` – CONNECT / ALREADY_CONNECTED
//! * `exchange`  – ACTION, STEP, STATE, RESET, VERSION, SET
//! * `crate::scheduler` – the cooperative `tick()`

mod error;
mod exchange;
mod handshake;

pub use error::ControllerError;
pub use exchange::StepPhase;

use embassy_time::Duration;

use crate::ahrs::Madgwick;
use crate::config::{ControllerConfig, FailurePolicy, SENSOR_ERROR_LOG_EVERY};
use crate::drivers::{InertialSensor, LoadCell, ServoBus};
use crate::ipc::PositionMailbox;
use crate::protocol::{Codec, CodecError, ErrorCode, Message, Schema, CURRENT};
use crate::scheduler::Cadence;
use crate::state::State;

use embedded_io_async::{Read, ReadReady, Write};

pub type Result<T> = core::result::Result<T, ControllerError>;

/// Handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Link {
    Disconnected,
    Connected,
}

/// Everything the controller drives besides the peer link.
pub struct Hardware<B, L, I> {
    pub servos: B,
    pub weight_left: L,
    pub weight_right: L,
    pub imu: I,
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SensorErrors {
    pub total: u32,
    pub consecutive: u32,
}

impl SensorErrors {
    /// Counts one failure; true when this one should be logged.
    pub fn record(&mut self) -> bool {
        self.total += 1;
        self.consecutive += 1;
        self.consecutive % SENSOR_ERROR_LOG_EVERY == 1
    }

    /// Clears the streak and returns its length.
    pub fn recover(&mut self) -> u32 {
        core::mem::take(&mut self.consecutive)
    }
}

pub struct Controller<P, B, L, I> {
    pub(crate) codec: Codec<P>,
    pub(crate) hw: Hardware<B, L, I>,
    pub(crate) schema: &'static Schema,
    pub(crate) config: ControllerConfig,
    pub(crate) link: Link,
    pub(crate) peer_version: Option<i8>,
    pub(crate) state: State,
    pub(crate) mailbox: PositionMailbox,
    pub(crate) ahrs: Madgwick,
    pub(crate) cadence: Cadence,
    pub(crate) phase: StepPhase,
    pub(crate) failures: u16,
    pub(crate) imu_errors: SensorErrors,
}

impl<P, B, L, I> Controller<P, B, L, I>
where
    P: Read + Write + ReadReady,
    B: ServoBus,
    L: LoadCell,
    I: InertialSensor,
{
    /// A controller speaking the current protocol revision.
    pub fn new(port: P, hw: Hardware<B, L, I>, config: ControllerConfig) -> Self {
        Self::with_schema(port, hw, config, CURRENT)
    }

    /// A controller locked to one protocol revision.
    pub fn with_schema(
        port: P,
        hw: Hardware<B, L, I>,
        config: ControllerConfig,
        schema: &'static Schema,
    ) -> Self {
        let t = config.timeouts;
        Self {
            codec: Codec::new(port, t.short_field, t.long_field),
            hw,
            schema,
            link: Link::Disconnected,
            peer_version: None,
            state: State::new(),
            mailbox: PositionMailbox::new(config.motor_ids),
            ahrs: Madgwick::new(config.gyro_meas_error_deg_s, config.gyro_meas_drift_deg_s2),
            cadence: Cadence::new(config.intervals),
            phase: StepPhase::Idle,
            failures: 0,
            imu_errors: SensorErrors::default(),
            config,
        }
    }

    /// Brings up the inertial sensor, then runs the handshake if configured.
    /// A sensor that fails to start is logged and left alone.
    pub async fn begin(&mut self) {
        match self.hw.imu.begin().await {
            Ok(()) => info!("IMU ready"),
            Err(e) => warn!("IMU init failed: {:?}", e),
        }
        if self.config.auto_connect {
            self.connect().await;
        }
    }

    /* ───── accessors ──────────────────────────────────────────────── */

    pub fn link(&self) -> Link {
        self.link
    }

    pub fn is_connected(&self) -> bool {
        self.link == Link::Connected
    }

    /// Version the peer announced in its last VERSION message.
    pub fn peer_version(&self) -> Option<i8> {
        self.peer_version
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// The cached snapshot, without refreshing it.
    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn orientation(&self) -> &Madgwick {
        &self.ahrs
    }

    pub fn phase(&self) -> StepPhase {
        self.phase
    }

    pub fn consecutive_failures(&self) -> u16 {
        self.failures
    }

    pub fn hardware(&self) -> &Hardware<B, L, I> {
        &self.hw
    }

    pub fn hardware_mut(&mut self) -> &mut Hardware<B, L, I> {
        &mut self.hw
    }

    pub fn port(&self) -> &P {
        self.codec.port()
    }

    pub fn port_mut(&mut self) -> &mut P {
        self.codec.port_mut()
    }

    /* ───── dispatch ───────────────────────────────────────────────── */

    /// Handles one pending message if a byte is waiting; never blocks on an
    /// idle link.
    pub async fn poll_message(&mut self) -> Option<Result<Message>> {
        match self.codec.poll_byte().await {
            Ok(Some(op)) => Some(self.handle_message(op).await),
            Ok(None) => None,
            Err(e) => Some(Err(e.into())),
        }
    }

    /// Routes one opcode to its handler. Replies leave the port before this
    /// returns.
    pub async fn handle_message(&mut self, opcode: u8) -> Result<Message> {
        let res = match self.schema.decode(opcode) {
            Some(msg) => {
                trace!("rx {:?}", msg);
                self.dispatch(msg).await.map(|()| msg)
            }
            None => {
                warn!("unknown opcode {}", opcode);
                self.reject(
                    ErrorCode::ReceivedUnknownMessage,
                    ControllerError::UnknownOpcode(opcode),
                )
                .await
            }
        };
        let res = match (res, self.codec.flush().await) {
            (Ok(_), Err(e)) => Err(e.into()),
            (res, _) => res,
        };
        self.account(res.is_ok());
        res
    }

    async fn dispatch(&mut self, msg: Message) -> Result<()> {
        match msg {
            Message::Connect => self.on_connect().await,
            Message::AlreadyConnected => {
                self.on_already_connected();
                Ok(())
            }
            Message::Ok => {
                self.reject(ErrorCode::DidNotExpectOk, ControllerError::Unexpected(msg))
                    .await
            }
            Message::Nok => {
                self.reject(ErrorCode::DidNotExpectNok, ControllerError::Unexpected(msg))
                    .await
            }
            Message::Error => {
                // an ERROR carries its reason byte; keep the stream aligned
                match self.codec.read_i8().await {
                    Ok(raw) => warn!("peer error {} ({:?})", raw, self.schema.reason(raw)),
                    Err(e) => warn!("peer error without reason: {:?}", e),
                }
                self.reject(
                    ErrorCode::DidNotExpectMessage,
                    ControllerError::Unexpected(msg),
                )
                .await
            }
            Message::Close | Message::Info => {
                self.reject(
                    ErrorCode::NotImplementedYet,
                    ControllerError::NotImplemented(msg),
                )
                .await
            }
            Message::Version => self.on_version().await,
            Message::Action | Message::Step | Message::State | Message::Reset | Message::Set
                if !self.is_connected() =>
            {
                self.refuse_disconnected(msg).await
            }
            Message::Action => self.on_action().await,
            Message::Step => self.on_step().await,
            Message::State | Message::Reset => self.on_state_request().await,
            Message::Set => self.on_set().await,
        }
    }

    /// Drains the payload of a request that needs a connection, then refuses it.
    async fn refuse_disconnected(&mut self, msg: Message) -> Result<()> {
        let payload = match msg {
            Message::Action | Message::Step => self.schema.action_len(self.config.motor_ids.len()),
            Message::Set => 5,
            _ => 0,
        };
        if let Err(e) = self.codec.skip(payload).await {
            warn!("short {:?} payload while disconnected: {:?}", msg, e);
        }
        warn!("{:?} refused: not connected", msg);
        self.reject(
            ErrorCode::DidNotExpectMessage,
            ControllerError::NotConnected(msg),
        )
        .await
    }

    /* ───── outbound helpers ───────────────────────────────────────── */

    pub(crate) async fn send(&mut self, msg: Message) -> Result<()> {
        let op = self
            .schema
            .opcode(msg)
            .ok_or(ControllerError::NotInSchema(msg))?;
        self.codec.write_u8(op).await?;
        Ok(())
    }

    /// Sends ERROR with `code` translated through the active schema.
    pub async fn send_error(&mut self, code: ErrorCode) -> Result<()> {
        let raw = self.schema.error_code(code);
        self.send(Message::Error).await?;
        self.codec.write_i8(raw).await?;
        self.codec.flush().await?;
        Ok(())
    }

    /// Tells the peer `code` and hands `err` back to the caller.
    pub(crate) async fn reject<T>(&mut self, code: ErrorCode, err: ControllerError) -> Result<T> {
        self.send_error(code).await?;
        Err(err)
    }

    /// Waits for the peer's OK; anything else is answered with EXPECTED_OK.
    pub(crate) async fn wait_ack(&mut self) -> Result<()> {
        let ok = self
            .schema
            .opcode(Message::Ok)
            .ok_or(ControllerError::NotInSchema(Message::Ok))?;
        let got = match self.codec.read_u8(self.config.timeouts.ack).await {
            Ok(b) if b == ok => return Ok(()),
            Ok(b) => Some(b),
            Err(CodecError::Timeout { .. }) => None,
            Err(e) => return Err(e.into()),
        };
        warn!("no OK from peer (got {:?})", got);
        self.reject(ErrorCode::ExpectedOk, ControllerError::ExpectedOk { got })
            .await
    }

    /* ───── failure policy ─────────────────────────────────────────── */

    pub(crate) fn account(&mut self, ok: bool) {
        if ok {
            self.failures = 0;
            return;
        }
        self.failures = self.failures.saturating_add(1);
        if let FailurePolicy::ResetAfter(limit) = self.config.failure_policy {
            if self.failures >= limit && self.is_connected() {
                warn!("{} consecutive failures, dropping link", self.failures);
                self.link = Link::Disconnected;
                self.failures = 0;
            }
        }
    }

    /* ───── runtime intervals ──────────────────────────────────────── */

    pub fn intake_interval(&self) -> Duration {
        self.cadence.intervals.intake
    }

    pub fn refresh_interval(&self) -> Duration {
        self.cadence.intervals.refresh
    }

    pub fn push_interval(&self) -> Option<Duration> {
        self.cadence.intervals.push
    }
}
