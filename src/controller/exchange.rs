//! Action/state exchange
//! ===========================================================
//!
//! ACTION and STEP payloads are read field by field in motor order. OK is
//! sent only once the whole payload is in, so a peer seeing OK knows the
//! action was taken. STATE frames are acknowledged with one OK; a missing
//! OK is reported with ERROR and never retried here.

use embassy_time::{Duration, Instant};
use embedded_io_async::{Read, ReadReady, Write};

use super::{Controller, ControllerError, Result};
use crate::config::MOTOR_NB;
use crate::drivers::{InertialSensor, LoadCell, ServoBus};
use crate::protocol::message::{SET_INTAKE_INTERVAL, SET_PUSH_INTERVAL, SET_REFRESH_INTERVAL};
use crate::protocol::{ErrorCode, Message};
use crate::state::{Action, ImuReadings, MotorCommand, State};

/// Progress of a STEP round trip. A failed step always lands back on
/// `Idle`; actuation already applied is not undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StepPhase {
    Idle,
    Applying,
    Sending,
}

impl<P, B, L, I> Controller<P, B, L, I>
where
    P: Read + Write + ReadReady,
    B: ServoBus,
    L: LoadCell,
    I: InertialSensor,
{
    /* ───── actions ────────────────────────────────────────────────── */

    /// Reads one ACTION payload and acknowledges it. A short payload is an
    /// error and gets no OK.
    pub async fn receive_action(&mut self) -> Result<Action> {
        let mut action = Action::default();
        for cmd in action.commands.iter_mut() {
            let position = self.codec.read_i16().await?;
            let span = self.codec.read_i16().await?;
            let activate = if self.schema.action_has_activate {
                self.codec.read_i8().await? != 0
            } else {
                true
            };
            // positions travel as i16 without remapping
            *cmd = MotorCommand {
                position: position as u16,
                span: span as u16,
                activate,
            };
        }
        self.send(Message::Ok).await?;
        // the peer hears OK before any servo moves
        self.codec.flush().await?;
        Ok(action)
    }

    /// Commands every motor. A failing motor is logged and skipped; the
    /// return value is how many failed.
    pub async fn act(&mut self, action: &Action) -> usize {
        let mut failed = 0;
        for (&id, cmd) in self.config.motor_ids.iter().zip(action.commands.iter()) {
            let res = if cmd.activate {
                self.hw.servos.move_time(id, cmd.position, cmd.span).await
            } else {
                self.hw.servos.set_unload(id).await
            };
            if let Err(e) = res {
                failed += 1;
                warn!("servo {} command failed: {:?}", id, e);
            }
        }
        if failed > 0 {
            debug!("{}/{} servo commands failed", failed, MOTOR_NB);
        }
        failed
    }

    pub(super) async fn on_action(&mut self) -> Result<()> {
        let action = self.receive_action().await?;
        self.act(&action).await;
        Ok(())
    }

    pub(super) async fn on_step(&mut self) -> Result<()> {
        let res = self.step().await;
        self.phase = StepPhase::Idle;
        res
    }

    async fn step(&mut self) -> Result<()> {
        let action = self.receive_action().await?;
        self.phase = StepPhase::Applying;
        self.act(&action).await;
        self.refresh_state_if_needed().await;
        self.phase = StepPhase::Sending;
        self.send_state().await
    }

    /* ───── state ──────────────────────────────────────────────────── */

    /// Refreshes the snapshot when it is older than the refresh interval.
    /// Returns whether a refresh ran.
    pub async fn refresh_state_if_needed(&mut self) -> bool {
        let now = Instant::now();
        if !self.state.is_stale(now, self.cadence.intervals.refresh) {
            return false;
        }
        self.refresh_state(now).await;
        true
    }

    /// The snapshot, refreshed first if it is stale.
    pub async fn get_state(&mut self) -> &State {
        self.refresh_state_if_needed().await;
        &self.state
    }

    async fn refresh_state(&mut self, now: Instant) {
        self.state.begin_refresh(now);
        self.mailbox.reset();

        let ids = self.config.motor_ids;
        for &id in ids.iter() {
            if let Err(e) = self.hw.servos.request_position(id, &self.mailbox).await {
                warn!("position request to servo {} failed: {:?}", id, e);
            }
        }

        // one window for all replies, not one per motor
        let deadline = Instant::now() + self.config.timeouts.position_reply;
        let band = self.config.plausibility;
        let mut plausible = true;
        for i in 0..MOTOR_NB {
            if let Some(raw) = self.mailbox.wait_until(i, deadline).await {
                self.state.positions[i] = raw;
                self.state.fresh[i] = true;
                plausible &= band.is_plausible(raw);
            }
        }
        self.state.plausible = plausible;
        if self.state.fresh_count() < MOTOR_NB {
            debug!("{}/{} servos replied", self.state.fresh_count(), MOTOR_NB);
        }

        match self.hw.weight_left.read().await {
            Ok(w) => self.state.weight_left = w,
            Err(e) => warn!("left load cell: {:?}", e),
        }
        match self.hw.weight_right.read().await {
            Ok(w) => self.state.weight_right = w,
            Err(e) => warn!("right load cell: {:?}", e),
        }

        let sample = self.hw.imu.sample();
        let euler = self.ahrs.euler_angles(self.config.yaw_correction_deg);
        self.state.imu =
            ImuReadings::from_fused(sample.accel, sample.gyro, euler, &self.config.imu_scales);
    }

    async fn write_state(&mut self) -> Result<()> {
        let layout = self.schema.state_layout;
        self.send(Message::State).await?;
        self.codec.write_i32(self.state.timestamp_ms as i32).await?;
        for i in 0..MOTOR_NB {
            self.codec.write_i16(self.state.positions[i] as i16).await?;
            if layout.freshness {
                self.codec.write_i8(self.state.fresh[i] as i8).await?;
            }
        }
        if layout.plausibility {
            self.codec.write_i8(self.state.plausible as i8).await?;
        }
        if layout.weights {
            self.codec.write_i32(self.state.weight_left).await?;
            self.codec.write_i32(self.state.weight_right).await?;
        }
        if layout.imu {
            for v in self.state.imu.to_wire() {
                self.codec.write_i16(v).await?;
            }
        }
        Ok(())
    }

    /// Sends the cached snapshot and waits for the peer's OK.
    pub async fn send_state(&mut self) -> Result<()> {
        self.write_state().await?;
        self.wait_ack().await
    }

    /// STATE and RESET: OK, then a (possibly cached) snapshot.
    pub(super) async fn on_state_request(&mut self) -> Result<()> {
        self.send(Message::Ok).await?;
        self.refresh_state_if_needed().await;
        self.send_state().await
    }

    /* ───── version & parameters ───────────────────────────────────── */

    pub(super) async fn on_version(&mut self) -> Result<()> {
        let theirs = self.codec.read_i8().await?;
        self.peer_version = Some(theirs);
        if theirs != self.schema.version {
            warn!(
                "peer speaks protocol v{}, this firmware v{}",
                theirs, self.schema.version
            );
        }
        self.send(Message::Ok).await?;
        self.send(Message::Version).await?;
        self.codec.write_i8(self.schema.version).await?;
        self.wait_ack().await
    }

    pub(super) async fn on_set(&mut self) -> Result<()> {
        let param = self.codec.read_i8().await?;
        let value = self.codec.read_i32().await?;
        let invalid = ControllerError::InvalidParameter { param, value };
        if value < 0 {
            warn!("SET {} rejected: negative value {}", param, value);
            return self.reject(ErrorCode::InvalidParameter, invalid).await;
        }

        let d = Duration::from_millis(value as u64);
        let intervals = &mut self.cadence.intervals;
        match param {
            SET_INTAKE_INTERVAL => intervals.intake = d,
            SET_REFRESH_INTERVAL => intervals.refresh = d,
            SET_PUSH_INTERVAL => intervals.push = (value > 0).then_some(d),
            _ => {
                warn!("SET rejected: unknown parameter {}", param);
                return self.reject(ErrorCode::InvalidParameter, invalid).await;
            }
        }
        debug!("SET {} = {} ms", param, value);
        self.send(Message::Ok).await
    }
}
