//! Motor and sensor drivers for the fan rig.
//!
//! The crate is split the same way the hardware is wired: [`hardware`] holds the
//! pin-level capabilities (digital outputs, digital inputs, PWM), [`traits`] holds
//! the motor-level contract the controller programs against, and [`devices`] holds
//! the concrete drivers built from those pins.
#![warn(missing_docs)]

pub mod devices;
pub mod error;
pub mod hardware;
pub mod traits;

pub use devices::h_bridge::HBridge;
pub use error::{HardwareError, MotorError};
pub use traits::motor::{Direction, MotorControl, MotorState};
