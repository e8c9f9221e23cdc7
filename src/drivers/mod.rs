//! Collaborator seams: the servo bus, the load cells and the inertial sensor.
//!
//! The chip drivers live outside this crate; the controller only sees these
//! traits. Driver errors are logged by the controller, never sent to the peer.

pub mod imu;
pub mod load_cell;
pub mod servo;

pub use imu::{InertialSensor, MargSample, Vector3};
pub use load_cell::LoadCell;
pub use servo::ServoBus;

/// Bound for driver error types so they can be logged with either backend.
#[cfg(feature = "defmt")]
pub trait DriverError: core::fmt::Debug + defmt::Format {}
#[cfg(feature = "defmt")]
impl<T: core::fmt::Debug + defmt::Format> DriverError for T {}

#[cfg(not(feature = "defmt"))]
pub trait DriverError: core::fmt::Debug {}
#[cfg(not(feature = "defmt"))]
impl<T: core::fmt::Debug> DriverError for T {}
