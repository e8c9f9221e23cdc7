//! Orientation filter
//! ===========================================================
//!
//! Madgwick gradient-descent fusion of accel, gyro and mag into a unit
//! quaternion, with a gyro bias estimate driven by `zeta`.
//!
//! Frames: the quaternion rotates sensor-frame vectors into the earth frame
//! (x north, z up). Gravity is expected along +z when level.

use core::f32::consts::PI;

use embassy_time::Instant;
use libm::{asinf, atan2f, fmodf, sqrtf};

use crate::drivers::imu::{MargSample, Vector3};

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quaternion {
    pub const IDENTITY: Self = Self {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn norm(&self) -> f32 {
        sqrtf(self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z)
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Degrees. Yaw is in [0, 360).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EulerAngles {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

const DEG_TO_RAD: f32 = PI / 180.0;
const RAD_TO_DEG: f32 = 180.0 / PI;

pub struct Madgwick {
    q: Quaternion,
    beta: f32,
    zeta: f32,
    gyro_bias: Vector3,
    last_update: Option<Instant>,
}

impl Madgwick {
    /// `gyro_meas_error` in °/s, `gyro_meas_drift` in °/s².
    pub fn new(gyro_meas_error: f32, gyro_meas_drift: f32) -> Self {
        let k = sqrtf(3.0 / 4.0);
        Self {
            q: Quaternion::IDENTITY,
            beta: k * gyro_meas_error * DEG_TO_RAD,
            zeta: k * gyro_meas_drift * DEG_TO_RAD,
            gyro_bias: Vector3::ZERO,
            last_update: None,
        }
    }

    pub fn beta(&self) -> f32 {
        self.beta
    }

    pub fn zeta(&self) -> f32 {
        self.zeta
    }

    pub fn quaternion(&self) -> Quaternion {
        self.q
    }

    pub fn gyro_bias(&self) -> Vector3 {
        self.gyro_bias
    }

    pub fn update(&mut self, sample: &MargSample) {
        self.update_at(sample, Instant::now());
    }

    /// One filter step at time `now`. The first call only sets the epoch.
    pub fn update_at(&mut self, sample: &MargSample, now: Instant) {
        let dt = match self.last_update.replace(now) {
            Some(prev) => now.saturating_duration_since(prev).as_micros() as f32 * 1e-6,
            None => 0.0,
        };

        let mut g = sample.gyro;
        g.x -= self.gyro_bias.x;
        g.y -= self.gyro_bias.y;
        g.z -= self.gyro_bias.z;

        let q = self.q;
        let mut q_dot = [
            0.5 * (-q.x * g.x - q.y * g.y - q.z * g.z),
            0.5 * (q.w * g.x + q.y * g.z - q.z * g.y),
            0.5 * (q.w * g.y - q.x * g.z + q.z * g.x),
            0.5 * (q.w * g.z + q.x * g.y - q.y * g.x),
        ];

        // no usable gravity reference: integrate the gyro alone
        if let Some(a) = sample.accel.normalized() {
            let s = gradient(&q, a, sample.mag.normalized());
            let n = sqrtf(s[0] * s[0] + s[1] * s[1] + s[2] * s[2] + s[3] * s[3]);
            if n > 0.0 && n.is_finite() {
                let s = [s[0] / n, s[1] / n, s[2] / n, s[3] / n];

                if self.zeta > 0.0 && dt > 0.0 {
                    // angular error from the gradient direction, 2 q* ⊗ s
                    let wx = 2.0 * (q.w * s[1] - q.x * s[0] - q.y * s[3] + q.z * s[2]);
                    let wy = 2.0 * (q.w * s[2] + q.x * s[3] - q.y * s[0] - q.z * s[1]);
                    let wz = 2.0 * (q.w * s[3] - q.x * s[2] + q.y * s[1] - q.z * s[0]);
                    self.gyro_bias.x += wx * dt * self.zeta;
                    self.gyro_bias.y += wy * dt * self.zeta;
                    self.gyro_bias.z += wz * dt * self.zeta;
                }

                for (d, s) in q_dot.iter_mut().zip(s) {
                    *d -= self.beta * s;
                }
            }
        }

        let next = Quaternion {
            w: q.w + q_dot[0] * dt,
            x: q.x + q_dot[1] * dt,
            y: q.y + q_dot[2] * dt,
            z: q.z + q_dot[3] * dt,
        };
        let n = next.norm();
        self.q = if n > 0.0 && n.is_finite() {
            Quaternion {
                w: next.w / n,
                x: next.x / n,
                y: next.y / n,
                z: next.z / n,
            }
        } else {
            Quaternion::IDENTITY
        };
    }

    /// Tait-Bryan angles from the rotation matrix, `yaw_correction` (magnetic
    /// declination, degrees) added to yaw.
    pub fn euler_angles(&self, yaw_correction: f32) -> EulerAngles {
        let Quaternion { w, x, y, z } = self.q;
        let a12 = 2.0 * (x * y + w * z);
        let a22 = w * w + x * x - y * y - z * z;
        let a31 = 2.0 * (w * x + y * z);
        let a32 = 2.0 * (x * z - w * y);
        let a33 = w * w - x * x - y * y + z * z;

        let pitch = -asinf(a32.clamp(-1.0, 1.0)) * RAD_TO_DEG;
        let roll = atan2f(a31, a33) * RAD_TO_DEG;
        let mut yaw = fmodf(atan2f(a12, a22) * RAD_TO_DEG + yaw_correction, 360.0);
        if yaw < 0.0 {
            yaw += 360.0;
        }
        // a tiny negative remainder rounds up to exactly 360
        if yaw >= 360.0 {
            yaw -= 360.0;
        }
        EulerAngles { roll, pitch, yaw }
    }
}

/// Jᵀf of the fusion objective: gravity always, the flattened magnetic
/// reference only when `m` is usable.
fn gradient(q: &Quaternion, a: Vector3, m: Option<Vector3>) -> [f32; 4] {
    let Quaternion {
        w: q0,
        x: q1,
        y: q2,
        z: q3,
    } = *q;

    let fg = [
        2.0 * (q1 * q3 - q0 * q2) - a.x,
        2.0 * (q0 * q1 + q2 * q3) - a.y,
        1.0 - 2.0 * (q1 * q1 + q2 * q2) - a.z,
    ];
    let mut s = [
        -2.0 * q2 * fg[0] + 2.0 * q1 * fg[1],
        2.0 * q3 * fg[0] + 2.0 * q0 * fg[1] - 4.0 * q1 * fg[2],
        -2.0 * q0 * fg[0] + 2.0 * q3 * fg[1] - 4.0 * q2 * fg[2],
        2.0 * q1 * fg[0] + 2.0 * q2 * fg[1],
    ];

    let Some(m) = m else {
        return s;
    };

    let (q0q0, q1q1, q2q2, q3q3) = (q0 * q0, q1 * q1, q2 * q2, q3 * q3);
    let hx = m.x * (q0q0 + q1q1 - q2q2 - q3q3)
        + 2.0 * m.y * (q1 * q2 - q0 * q3)
        + 2.0 * m.z * (q1 * q3 + q0 * q2);
    let hy = 2.0 * m.x * (q1 * q2 + q0 * q3)
        + m.y * (q0q0 - q1q1 + q2q2 - q3q3)
        + 2.0 * m.z * (q2 * q3 - q0 * q1);
    let hz = 2.0 * m.x * (q1 * q3 - q0 * q2)
        + 2.0 * m.y * (q2 * q3 + q0 * q1)
        + m.z * (q0q0 - q1q1 - q2q2 + q3q3);
    let bx = sqrtf(hx * hx + hy * hy);
    let bz = hz;

    let fb = [
        2.0 * bx * (0.5 - q2q2 - q3q3) + 2.0 * bz * (q1 * q3 - q0 * q2) - m.x,
        2.0 * bx * (q1 * q2 - q0 * q3) + 2.0 * bz * (q0 * q1 + q2 * q3) - m.y,
        2.0 * bx * (q0 * q2 + q1 * q3) + 2.0 * bz * (0.5 - q1q1 - q2q2) - m.z,
    ];
    s[0] += -2.0 * bz * q2 * fb[0] + (-2.0 * bx * q3 + 2.0 * bz * q1) * fb[1] + 2.0 * bx * q2 * fb[2];
    s[1] += 2.0 * bz * q3 * fb[0]
        + (2.0 * bx * q2 + 2.0 * bz * q0) * fb[1]
        + (2.0 * bx * q3 - 4.0 * bz * q1) * fb[2];
    s[2] += (-4.0 * bx * q2 - 2.0 * bz * q0) * fb[0]
        + (2.0 * bx * q1 + 2.0 * bz * q3) * fb[1]
        + (2.0 * bx * q0 - 4.0 * bz * q2) * fb[2];
    s[3] += (-4.0 * bx * q3 + 2.0 * bz * q1) * fb[0]
        + (-2.0 * bx * q0 + 2.0 * bz * q2) * fb[1]
        + 2.0 * bx * q1 * fb[2];
    s
}
