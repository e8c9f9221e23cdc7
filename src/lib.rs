#![cfg_attr(not(test), no_std)]

// must stay first: the logging macros are textually scoped
mod fmt;

pub mod ahrs;
pub mod config;
pub mod controller;
pub mod drivers;
pub mod ipc;
pub mod protocol;
pub mod scheduler;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use ahrs::{EulerAngles, Madgwick, Quaternion};
pub use config::ControllerConfig;
pub use controller::{Controller, ControllerError, Hardware, Link};
pub use ipc::PositionMailbox;
pub use scheduler::TickReport;
pub use state::{Action, MotorCommand, State};
