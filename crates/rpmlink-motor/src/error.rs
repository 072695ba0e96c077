//! Error types for pin access and motor driving.

use thiserror::Error;

/// Failure reported by a pin-level backend.
#[derive(Debug, Error)]
pub enum HardwareError {
    /// A digital pin could not be read or driven.
    #[error("gpio pin {pin}: {message}")]
    Gpio {
        /// BCM pin number.
        pin: u8,
        /// Backend description of the failure.
        message: String,
    },
    /// The PWM generator rejected a duty cycle or frequency.
    #[error("pwm on pin {pin}: {message}")]
    Pwm {
        /// BCM pin number.
        pin: u8,
        /// Backend description of the failure.
        message: String,
    },
    /// The GPIO peripheral itself could not be opened.
    #[error("gpio peripheral unavailable: {0}")]
    Unavailable(String),
}

/// Failure while claiming or driving the H-bridge.
#[derive(Debug, Error)]
pub enum MotorError {
    /// One of the bridge outputs failed to change state.
    #[error("failed to drive {output}")]
    Output {
        /// Name of the line that failed, such as `enable` or `in1`.
        output: &'static str,
        /// Underlying pin failure.
        #[source]
        source: HardwareError,
    },
}

impl MotorError {
    pub(crate) fn output(output: &'static str, source: impl Into<HardwareError>) -> Self {
        MotorError::Output {
            output,
            source: source.into(),
        }
    }
}
