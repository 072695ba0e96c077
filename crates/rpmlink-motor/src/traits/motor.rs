/// Rotation direction of the fan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// IN1 high, IN2 low.
    #[default]
    Forward,
    /// IN1 low, IN2 high.
    Reverse,
}

impl Direction {
    /// Levels for the bridge inputs `(in1, in2)` that select this direction.
    pub const fn bridge_levels(self) -> (bool, bool) {
        match self {
            Direction::Forward => (true, false),
            Direction::Reverse => (false, true),
        }
    }
}

impl core::fmt::Display for Direction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Direction::Forward => f.write_str("forward"),
            Direction::Reverse => f.write_str("reverse"),
        }
    }
}

/// Snapshot of what the driver last commanded.
///
/// `speed` survives a turn-off so the next turn-on resumes where the motor
/// stopped. `on` is true only while the bridge is actually delivering power.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotorState {
    /// Commanded speed as a percentage, always within `0..=100`.
    pub speed: u8,
    /// Commanded direction.
    pub direction: Direction,
    /// Whether the bridge is powered.
    pub on: bool,
}

/// Clamp a requested speed into the `0..=100` percent range.
pub fn clamp_speed(percent: i32) -> u8 {
    percent.clamp(0, 100) as u8
}

/// Core trait defining the interface for motor control
pub trait MotorControl {
    /// Driver error type.
    type Error;

    /// Select the rotation direction and drive the bridge inputs for it.
    fn set_direction(&mut self, direction: Direction) -> Result<(), Self::Error>;

    /// Set the speed, clamped to `0..=100`.
    ///
    /// A positive speed powers the motor, zero turns it off.
    fn set_speed(&mut self, percent: i32) -> Result<(), Self::Error>;

    /// Power the motor in the current direction at the current speed.
    fn turn_on(&mut self) -> Result<(), Self::Error>;

    /// Brake the motor and remove power. The commanded speed is kept.
    fn turn_off(&mut self) -> Result<(), Self::Error>;

    /// Current driver state.
    fn state(&self) -> MotorState;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_speed() {
        assert_eq!(clamp_speed(-5), 0);
        assert_eq!(clamp_speed(0), 0);
        assert_eq!(clamp_speed(42), 42);
        assert_eq!(clamp_speed(150), 100);
        assert_eq!(clamp_speed(i32::MIN), 0);
    }

    #[test]
    fn test_bridge_levels_are_complementary() {
        assert_eq!(Direction::Forward.bridge_levels(), (true, false));
        assert_eq!(Direction::Reverse.bridge_levels(), (false, true));
    }
}
