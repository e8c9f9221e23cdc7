use super::DriverError;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn norm(&self) -> f32 {
        libm::sqrtf(self.x * self.x + self.y * self.y + self.z * self.z)
    }

    /// Unit vector, or `None` when the norm is zero or not finite.
    pub fn normalized(&self) -> Option<Self> {
        let n = self.norm();
        if n > 0.0 && n.is_finite() {
            Some(Self::new(self.x / n, self.y / n, self.z / n))
        } else {
            None
        }
    }
}

/// One 9-axis sample: accel in m/s², gyro in rad/s, mag in µT.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MargSample {
    pub accel: Vector3,
    pub gyro: Vector3,
    pub mag: Vector3,
}

/// 9-axis inertial sensor (accel + gyro + mag).
#[allow(async_fn_in_trait)]
pub trait InertialSensor {
    type Error: DriverError;

    /// Wakes and configures the chip.
    async fn begin(&mut self) -> Result<(), Self::Error>;

    /// Reads a new sample from the chip into the driver.
    async fn update(&mut self) -> Result<(), Self::Error>;

    /// The sample captured by the last successful [`update`](Self::update).
    fn sample(&self) -> MargSample;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_rejects_degenerate_vectors() {
        assert_eq!(Vector3::ZERO.normalized(), None);
        assert_eq!(Vector3::new(f32::NAN, 0.0, 1.0).normalized(), None);
        let u = Vector3::new(3.0, 0.0, 4.0).normalized().unwrap();
        assert!((u.norm() - 1.0).abs() < 1e-6);
        assert!((u.x - 0.6).abs() < 1e-6);
    }
}
