//! Snapshot and command types exchanged with the peer.

use embassy_time::{Duration, Instant};

use crate::ahrs::EulerAngles;
use crate::config::{ImuScales, IMU_AXES, MOTOR_NB};
use crate::drivers::imu::Vector3;

/// Raw servo readings within `margin` counts of a rail are not trusted.
///
/// With the defaults the sane band is 11..=1029; readings above the upper
/// rail come from servos reporting an extended range and are passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PlausibilityBand {
    pub low_rail: u16,
    pub high_rail: u16,
    pub margin: u16,
}

impl Default for PlausibilityBand {
    fn default() -> Self {
        Self {
            low_rail: 0,
            high_rail: 1040,
            margin: 10,
        }
    }
}

impl PlausibilityBand {
    pub fn is_plausible(&self, raw: u16) -> bool {
        let near_low = raw <= self.low_rail.saturating_add(self.margin);
        let near_high = raw >= self.high_rail.saturating_sub(self.margin) && raw <= self.high_rail;
        !(near_low || near_high)
    }
}

/* ───── IMU wire values ─────────────────────────────────────────────── */

/// Fused IMU values already scaled to their i16 wire form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImuReadings {
    pub accel: [i16; 3],
    pub gyro: [i16; 3],
    /// roll, pitch, yaw
    pub angles: [i16; 3],
}

#[inline]
fn scaled(v: f32, scale: f32) -> i16 {
    // `as` saturates at the i16 rails and maps NaN to 0
    (v * scale) as i16
}

/// Maps an angle in [0, 360) onto (-180, 180].
#[inline]
fn signed_degrees(deg: f32) -> f32 {
    if deg > 180.0 {
        deg - 360.0
    } else {
        deg
    }
}

impl ImuReadings {
    pub fn from_fused(accel: Vector3, gyro: Vector3, euler: EulerAngles, scales: &ImuScales) -> Self {
        Self {
            accel: [
                scaled(accel.x, scales.accel),
                scaled(accel.y, scales.accel),
                scaled(accel.z, scales.accel),
            ],
            gyro: [
                scaled(gyro.x, scales.gyro),
                scaled(gyro.y, scales.gyro),
                scaled(gyro.z, scales.gyro),
            ],
            angles: [
                scaled(signed_degrees(euler.roll), scales.angle),
                scaled(signed_degrees(euler.pitch), scales.angle),
                scaled(signed_degrees(euler.yaw), scales.angle),
            ],
        }
    }

    /// Wire order: ax, ay, az, gx, gy, gz, roll, pitch, yaw.
    pub fn to_wire(&self) -> [i16; IMU_AXES] {
        let [ax, ay, az] = self.accel;
        let [gx, gy, gz] = self.gyro;
        let [r, p, y] = self.angles;
        [ax, ay, az, gx, gy, gz, r, p, y]
    }
}

/* ───── State ───────────────────────────────────────────────────────── */

/// The robot snapshot. One instance lives in the controller and is
/// refreshed in place.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct State {
    /// Milliseconds since boot, wrapping after ~49 days.
    pub timestamp_ms: u32,
    pub positions: [u16; MOTOR_NB],
    pub fresh: [bool; MOTOR_NB],
    pub plausible: bool,
    pub weight_left: i32,
    pub weight_right: i32,
    pub imu: ImuReadings,
    refreshed_at: Option<Instant>,
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    pub const fn new() -> Self {
        Self {
            timestamp_ms: 0,
            positions: [0; MOTOR_NB],
            fresh: [false; MOTOR_NB],
            plausible: true,
            weight_left: 0,
            weight_right: 0,
            imu: ImuReadings {
                accel: [0; 3],
                gyro: [0; 3],
                angles: [0; 3],
            },
            refreshed_at: None,
        }
    }

    /// Whether a refresh is due; a state never refreshed always is.
    pub fn is_stale(&self, now: Instant, interval: Duration) -> bool {
        match self.refreshed_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= interval,
        }
    }

    /// Starts a refresh cycle: stamps the time and clears per-cycle flags.
    pub(crate) fn begin_refresh(&mut self, now: Instant) {
        self.refreshed_at = Some(now);
        self.timestamp_ms = now.as_millis() as u32;
        self.fresh = [false; MOTOR_NB];
        self.plausible = true;
    }

    pub fn fresh_count(&self) -> usize {
        self.fresh.iter().filter(|f| **f).count()
    }
}

/* ───── Action ──────────────────────────────────────────────────────── */

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorCommand {
    pub position: u16,
    /// Move duration in milliseconds.
    pub span: u16,
    /// `false` de-energizes the servo instead of moving it.
    pub activate: bool,
}

/// One command per motor, in motor-index order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Action {
    pub commands: [MotorCommand; MOTOR_NB],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plausibility_band_flags_rail_readings() {
        let band = PlausibilityBand::default();
        assert!(!band.is_plausible(5));
        assert!(!band.is_plausible(10));
        assert!(band.is_plausible(11));
        assert!(band.is_plausible(1029));
        assert!(!band.is_plausible(1030));
        assert!(!band.is_plausible(1035));
        assert!(band.is_plausible(2048));
    }

    #[test]
    fn imu_readings_saturate_and_wrap() {
        let scales = ImuScales::default();
        let r = ImuReadings::from_fused(
            Vector3 {
                x: 9.81,
                y: -1000.0,
                z: f32::NAN,
            },
            Vector3 {
                x: 0.5,
                y: 0.0,
                z: -0.25,
            },
            EulerAngles {
                roll: 10.0,
                pitch: -5.5,
                yaw: 270.0,
            },
            &scales,
        );
        assert_eq!(r.accel, [981, i16::MIN, 0]);
        assert_eq!(r.gyro, [500, 0, -250]);
        assert_eq!(r.angles, [1000, -550, -9000]);
        assert_eq!(r.to_wire()[6..], [1000, -550, -9000]);
    }

    #[test]
    fn new_state_is_stale_until_refreshed() {
        let mut s = State::new();
        let t0 = Instant::from_millis(1_000);
        assert!(s.is_stale(t0, Duration::from_secs(3600)));
        s.fresh[2] = true;
        s.plausible = false;
        s.begin_refresh(t0);
        assert_eq!(s.timestamp_ms, 1_000);
        assert_eq!(s.fresh_count(), 0);
        assert!(s.plausible);
        assert!(!s.is_stale(Instant::from_millis(1_009), Duration::from_millis(10)));
        assert!(s.is_stale(Instant::from_millis(1_010), Duration::from_millis(10)));
    }
}
