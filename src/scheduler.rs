//! Cooperative scheduler
//! ===========================================================
//!
//! `tick()` is called over and over from one execution context. Each concern
//! runs when its own interval has elapsed; nothing in a tick waits on an
//! idle link.

use embassy_time::{Duration, Instant};
use embedded_io_async::{Read, ReadReady, Write};

use crate::config::Intervals;
use crate::controller::{Controller, ControllerError};
use crate::drivers::{InertialSensor, LoadCell, ServoBus};
use crate::protocol::Message;

/// Last time something ran.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Gate {
    last: Option<Instant>,
}

impl Gate {
    pub fn due(&self, now: Instant, interval: Duration) -> bool {
        match self.last {
            None => true,
            Some(t) => now.saturating_duration_since(t) >= interval,
        }
    }

    pub fn mark(&mut self, now: Instant) {
        self.last = Some(now);
    }
}

pub(crate) struct Cadence {
    pub intervals: Intervals,
    pub intake: Gate,
    pub imu: Gate,
    /// Last successful push.
    pub push: Gate,
}

impl Cadence {
    pub fn new(intervals: Intervals) -> Self {
        Self {
            intervals,
            intake: Gate::default(),
            imu: Gate::default(),
            push: Gate::default(),
        }
    }
}

/// What one `tick()` did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Outcome of the inbound message handled this tick, if there was one.
    pub handled: Option<Result<Message, ControllerError>>,
    pub imu_sampled: bool,
    pub refreshed: bool,
    /// `Some(true)` for a pushed and acknowledged state frame.
    pub pushed: Option<bool>,
}

impl<P, B, L, I> Controller<P, B, L, I>
where
    P: Read + Write + ReadReady,
    B: ServoBus,
    L: LoadCell,
    I: InertialSensor,
{
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let now = Instant::now();

        if self.cadence.intake.due(now, self.cadence.intervals.intake) {
            self.cadence.intake.mark(now);
            report.handled = self.poll_message().await;
        }

        if self.cadence.imu.due(now, self.cadence.intervals.imu_sample) {
            self.cadence.imu.mark(now);
            report.imu_sampled = self.sample_imu().await;
        }

        report.refreshed = self.refresh_state_if_needed().await;

        if let Some(period) = self.cadence.intervals.push {
            if self.schema.pushes_state
                && self.is_connected()
                && self.cadence.push.due(Instant::now(), period)
            {
                report.pushed = Some(self.push_state().await);
            }
        }

        report
    }

    async fn push_state(&mut self) -> bool {
        let res = self.send_state().await;
        let _ = self.codec.flush().await;
        let ok = match res {
            Ok(()) => {
                self.cadence.push.mark(Instant::now());
                true
            }
            Err(e) => {
                warn!("state push failed: {:?}", e);
                false
            }
        };
        self.account(ok);
        ok
    }

    /// Reads the inertial sensor and feeds the orientation filter.
    pub async fn sample_imu(&mut self) -> bool {
        match self.hw.imu.update().await {
            Ok(()) => {
                let streak = self.imu_errors.recover();
                if streak > 0 {
                    info!("IMU recovered after {} consecutive errors", streak);
                }
                let sample = self.hw.imu.sample();
                self.ahrs.update(&sample);
                true
            }
            Err(e) => {
                if self.imu_errors.record() {
                    warn!("IMU read error #{}: {:?}", self.imu_errors.total, e);
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use crate::controller::{Hardware, Link};
    use crate::drivers::{MargSample, Vector3};
    use crate::protocol::V4;
    use crate::test_support::{FixedLoadCell, MockPort, RecordingServoBus, ScriptedImu};
    use embassy_futures::block_on;

    type TestController = Controller<MockPort, RecordingServoBus, FixedLoadCell, ScriptedImu>;

    fn hardware() -> Hardware<RecordingServoBus, FixedLoadCell, ScriptedImu> {
        Hardware {
            servos: RecordingServoBus::default(),
            weight_left: FixedLoadCell::new(0),
            weight_right: FixedLoadCell::new(0),
            imu: ScriptedImu::new(MargSample {
                accel: Vector3::new(0.0, 0.0, 9.81),
                ..Default::default()
            }),
        }
    }

    fn with_push(port: MockPort, push: Option<Duration>) -> TestController {
        let intervals = Intervals {
            push,
            ..Default::default()
        };
        let config = ControllerConfig::default()
            .with_auto_connect(false)
            .with_intervals(intervals);
        Controller::new(port, hardware(), config)
    }

    /// Answers every v6 STATE frame with OK.
    fn acks_state(sent: &[u8]) -> std::vec::Vec<u8> {
        if sent.first() == Some(&8) {
            std::vec![1]
        } else {
            std::vec![]
        }
    }

    #[test]
    fn gate_is_due_until_marked_then_after_interval() {
        let mut g = Gate::default();
        let t0 = Instant::from_millis(100);
        assert!(g.due(t0, Duration::from_secs(10)));
        g.mark(t0);
        assert!(!g.due(Instant::from_millis(149), Duration::from_millis(50)));
        assert!(g.due(Instant::from_millis(150), Duration::from_millis(50)));
        // zero interval: every tick
        assert!(g.due(t0, Duration::from_millis(0)));
    }

    #[test]
    fn idle_tick_samples_and_refreshes() {
        block_on(async {
            let mut c = with_push(MockPort::new(), None);
            let report = c.tick().await;
            assert!(report.handled.is_none());
            assert!(report.imu_sampled);
            assert!(report.refreshed);
            assert_eq!(report.pushed, None);
            assert_eq!(c.hardware().imu.updates, 1);
            assert!(c.port().tx.is_empty());
        });
    }

    #[test]
    fn one_message_per_tick() {
        block_on(async {
            let mut c = with_push(MockPort::with_rx(&[3, 3]), None);
            let report = c.tick().await;
            assert_eq!(report.handled, Some(Ok(Message::Connect)));
            assert_eq!(c.codec.staged(), 1);
            assert_eq!(c.port().tx, [3]);

            // the second CONNECT waits for the next tick
            let report = c.tick().await;
            assert_eq!(report.handled, Some(Ok(Message::Connect)));
            assert_eq!(c.codec.staged(), 0);
            assert_eq!(c.port().tx, [3, 4]);
        });
    }

    #[test]
    fn intake_waits_for_its_interval() {
        block_on(async {
            let intervals = Intervals {
                intake: Duration::from_secs(3600),
                ..Default::default()
            };
            let config = ControllerConfig::default()
                .with_auto_connect(false)
                .with_intervals(intervals);
            let mut c = Controller::new(MockPort::with_rx(&[3, 3]), hardware(), config);
            assert!(c.tick().await.handled.is_some());
            assert!(c.tick().await.handled.is_none());
            assert_eq!(c.codec.staged(), 1);
        });
    }

    #[test]
    fn imu_is_sampled_at_its_own_period() {
        block_on(async {
            let mut c = with_push(MockPort::new(), None);
            c.tick().await;
            let report = c.tick().await;
            // default period is 20 ms; back-to-back ticks skip the sensor
            assert!(!report.imu_sampled);
            assert_eq!(c.hardware().imu.updates, 1);
        });
    }

    #[test]
    fn imu_failures_are_counted_not_fatal() {
        block_on(async {
            let mut c = with_push(MockPort::new(), None);
            c.hardware_mut().imu.fail_update = true;
            assert!(!c.sample_imu().await);
            assert!(!c.sample_imu().await);
            assert_eq!(c.imu_errors.total, 2);
            assert_eq!(c.imu_errors.consecutive, 2);

            c.hardware_mut().imu.fail_update = false;
            assert!(c.sample_imu().await);
            assert_eq!(c.imu_errors.consecutive, 0);
            assert_eq!(c.imu_errors.total, 2);
        });
    }

    #[test]
    fn connected_controller_pushes_state_on_its_interval() {
        block_on(async {
            let port = MockPort::new().respond_with(acks_state);
            let mut c = with_push(port, Some(Duration::from_secs(3600)));
            c.link = Link::Connected;

            let report = c.tick().await;
            assert_eq!(report.pushed, Some(true));
            assert_eq!(c.port().tx[0], 8);

            let report = c.tick().await;
            assert_eq!(report.pushed, None);
        });
    }

    #[test]
    fn unacknowledged_push_is_retried_next_tick() {
        block_on(async {
            let mut c = with_push(MockPort::new(), Some(Duration::from_secs(3600)));
            c.link = Link::Connected;
            assert_eq!(c.tick().await.pushed, Some(false));
            // the gate only moves on success
            assert_eq!(c.tick().await.pushed, Some(false));
            assert_eq!(c.consecutive_failures(), 2);
        });
    }

    #[test]
    fn no_push_while_disconnected_or_on_older_revisions() {
        block_on(async {
            let mut c = with_push(MockPort::new(), Some(Duration::from_millis(0)));
            assert_eq!(c.tick().await.pushed, None);

            let intervals = Intervals {
                push: Some(Duration::from_millis(0)),
                ..Default::default()
            };
            let config = ControllerConfig::default()
                .with_auto_connect(false)
                .with_intervals(intervals);
            let mut old = Controller::with_schema(MockPort::new(), hardware(), config, &V4);
            old.link = Link::Connected;
            assert_eq!(old.tick().await.pushed, None);
            assert!(old.port().tx.is_empty());
        });
    }
}
