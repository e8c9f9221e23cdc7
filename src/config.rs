// Centralize all configuration constants
use embassy_time::Duration;

use crate::state::PlausibilityBand;

pub const MOTOR_NB: usize = 10;
// IDs other than 0..=9 need a matching MOTOR_IDS table on the servo bus side
pub const MOTOR_IDS: [u8; MOTOR_NB] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9];
pub const IMU_AXES: usize = 9;

// Bounded waits
pub const HANDSHAKE_RETRY_MS: u64 = 1000;
pub const SHORT_FIELD_TIMEOUT_MS: u64 = 100; // i8 / i16
pub const LONG_FIELD_TIMEOUT_MS: u64 = 200; // i32
pub const ACK_TIMEOUT_MS: u64 = 100;
pub const POSITION_REPLY_WINDOW_MS: u64 = 5;

// Scheduler defaults
pub const INTAKE_INTERVAL_MS: u64 = 0;
pub const REFRESH_INTERVAL_MS: u64 = 0;
pub const IMU_SAMPLE_PERIOD_MS: u64 = 20; // MPU-9250 at SRD 19 → 50 Hz

// Orientation filter
pub const GYRO_MEAS_ERROR_DEG_S: f32 = 40.0;
pub const GYRO_MEAS_DRIFT_DEG_S2: f32 = 0.0;
pub const YAW_DECLINATION_DEG: f32 = 0.36; // Paris, 2019-12-12

// IMU wire scaling (value × scale, saturated into i16)
pub const ACCEL_WIRE_SCALE: f32 = 100.0; // m/s²
pub const GYRO_WIRE_SCALE: f32 = 1000.0; // rad/s
pub const ANGLE_WIRE_SCALE: f32 = 100.0; // degrees

// Serial staging buffers
pub const TX_BUFFER_SIZE: usize = 128;
pub const RX_BUFFER_SIZE: usize = 64;

// Log every n-th consecutive sensor failure
pub const SENSOR_ERROR_LOG_EVERY: u32 = 100;

/// Codec and handshake wait bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timeouts {
    pub short_field: Duration,
    pub long_field: Duration,
    pub ack: Duration,
    pub handshake_retry: Duration,
    pub position_reply: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            short_field: Duration::from_millis(SHORT_FIELD_TIMEOUT_MS),
            long_field: Duration::from_millis(LONG_FIELD_TIMEOUT_MS),
            ack: Duration::from_millis(ACK_TIMEOUT_MS),
            handshake_retry: Duration::from_millis(HANDSHAKE_RETRY_MS),
            position_reply: Duration::from_millis(POSITION_REPLY_WINDOW_MS),
        }
    }
}

/// Scheduler cadence. `push: None` disables unsolicited state frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Intervals {
    pub intake: Duration,
    pub refresh: Duration,
    pub push: Option<Duration>,
    pub imu_sample: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            intake: Duration::from_millis(INTAKE_INTERVAL_MS),
            refresh: Duration::from_millis(REFRESH_INTERVAL_MS),
            push: None,
            imu_sample: Duration::from_millis(IMU_SAMPLE_PERIOD_MS),
        }
    }
}

/// What to do when exchanges keep failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FailurePolicy {
    /// Stay connected whatever happens; the peer decides.
    #[default]
    Ignore,
    /// Drop back to Disconnected after this many consecutive failures.
    ResetAfter(u16),
}

/// Integer scales applied to the fused IMU values of a state frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImuScales {
    pub accel: f32,
    pub gyro: f32,
    pub angle: f32,
}

impl Default for ImuScales {
    fn default() -> Self {
        Self {
            accel: ACCEL_WIRE_SCALE,
            gyro: GYRO_WIRE_SCALE,
            angle: ANGLE_WIRE_SCALE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControllerConfig {
    pub motor_ids: [u8; MOTOR_NB],
    pub timeouts: Timeouts,
    pub intervals: Intervals,
    pub failure_policy: FailurePolicy,
    pub plausibility: PlausibilityBand,
    pub imu_scales: ImuScales,
    pub gyro_meas_error_deg_s: f32,
    pub gyro_meas_drift_deg_s2: f32,
    pub yaw_correction_deg: f32,
    pub auto_connect: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            motor_ids: MOTOR_IDS,
            timeouts: Timeouts::default(),
            intervals: Intervals::default(),
            failure_policy: FailurePolicy::default(),
            plausibility: PlausibilityBand::default(),
            imu_scales: ImuScales::default(),
            gyro_meas_error_deg_s: GYRO_MEAS_ERROR_DEG_S,
            gyro_meas_drift_deg_s2: GYRO_MEAS_DRIFT_DEG_S2,
            yaw_correction_deg: YAW_DECLINATION_DEG,
            auto_connect: true,
        }
    }
}

impl ControllerConfig {
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_intervals(mut self, intervals: Intervals) -> Self {
        self.intervals = intervals;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }
}
