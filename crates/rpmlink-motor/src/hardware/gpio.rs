use crate::error::HardwareError;

/// Capability to drive a digital output high or low.
pub trait DigitalOutput {
    /// Backend error type.
    type Error: Into<HardwareError>;

    /// Drive the pin high.
    fn set_high(&mut self) -> Result<(), Self::Error>;

    /// Drive the pin low.
    fn set_low(&mut self) -> Result<(), Self::Error>;

    /// Drive the pin to `high`.
    fn set_level(&mut self, high: bool) -> Result<(), Self::Error> {
        if high { self.set_high() } else { self.set_low() }
    }
}

/// Capability to sample a digital input.
pub trait DigitalInput {
    /// Backend error type.
    type Error: Into<HardwareError>;

    /// Returns `true` when the pin reads high.
    fn is_high(&mut self) -> Result<bool, Self::Error>;
}
