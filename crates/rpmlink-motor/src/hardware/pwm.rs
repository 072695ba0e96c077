use crate::error::HardwareError;

/// Capability to generate a PWM signal on one output.
pub trait PwmOutput {
    /// Backend error type.
    type Error: Into<HardwareError>;

    /// Largest duty value accepted by [`PwmOutput::set_duty_cycle`].
    fn max_duty_cycle(&self) -> u16;

    /// Set the raw duty value. Zero means no output.
    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error>;

    /// Set the duty cycle as a percentage (0-100).
    fn set_duty_cycle_percent(&mut self, percent: u8) -> Result<(), Self::Error> {
        self.set_duty_cycle(percent_to_duty(percent, self.max_duty_cycle()))
    }

    /// Stop generating output entirely.
    fn disable(&mut self) -> Result<(), Self::Error> {
        self.set_duty_cycle(0)
    }
}

/// Scale a percentage onto `0..=max_duty`, truncating.
pub fn percent_to_duty(percent: u8, max_duty: u16) -> u16 {
    let percent = u32::from(percent.min(100));
    (percent * u32::from(max_duty) / 100) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_to_duty() {
        assert_eq!(percent_to_duty(0, 255), 0);
        assert_eq!(percent_to_duty(50, 255), 127);
        assert_eq!(percent_to_duty(100, 255), 255);
        // Out-of-range percentages saturate at full duty
        assert_eq!(percent_to_duty(250, 255), 255);
    }
}
