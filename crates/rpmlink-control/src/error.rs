//! Error types for the control crate.

use rpmlink_motor::MotorError;
use thiserror::Error;

/// Failure inside the control subsystem.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The motor driver refused a command.
    #[error("motor driver error")]
    Motor(#[from] MotorError),
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The sampler thread could not be started.
    #[error("failed to start sampler thread")]
    Spawn(#[source] std::io::Error),
}
