//! L298N-style H-bridge: one PWM enable line, two direction inputs and a status LED.

use tracing::{debug, error, info};

use crate::error::{HardwareError, MotorError};
use crate::hardware::gpio::DigitalOutput;
use crate::hardware::pwm::PwmOutput;
use crate::traits::motor::{Direction, MotorControl, MotorState, clamp_speed};

/// Speed used by `turn_on` when no speed has been commanded yet.
pub const DEFAULT_ON_SPEED: u8 = 50;

/// Motor driven through an H-bridge.
///
/// The bridge is put into the braked, unpowered state on construction and again
/// when the driver is dropped, so the motor never outlives its controller.
pub struct HBridge<P, A, B, L>
where
    P: PwmOutput,
    A: DigitalOutput,
    B: DigitalOutput,
    L: DigitalOutput,
{
    enable: P,
    in1: A,
    in2: B,
    indicator: L,
    state: MotorState,
    // Whether IN1/IN2 currently carry a direction pattern rather than the brake pattern.
    engaged: bool,
    default_on_speed: u8,
}

impl<P, A, B, L> HBridge<P, A, B, L>
where
    P: PwmOutput,
    A: DigitalOutput,
    B: DigitalOutput,
    L: DigitalOutput,
{
    /// Take ownership of the bridge pins and brake the motor.
    pub fn new(enable: P, in1: A, in2: B, indicator: L) -> Result<Self, MotorError> {
        let mut bridge = Self {
            enable,
            in1,
            in2,
            indicator,
            state: MotorState::default(),
            engaged: false,
            default_on_speed: DEFAULT_ON_SPEED,
        };
        bridge.turn_off()?;
        Ok(bridge)
    }

    /// Override the speed `turn_on` falls back to when the commanded speed is zero.
    pub fn with_default_on_speed(mut self, speed: u8) -> Self {
        self.default_on_speed = speed.min(100);
        self
    }

    fn drive_direction(&mut self) -> Result<(), MotorError> {
        let (in1, in2) = self.state.direction.bridge_levels();
        self.in1
            .set_level(in1)
            .map_err(|e| MotorError::output("in1", e))?;
        self.in2
            .set_level(in2)
            .map_err(|e| MotorError::output("in2", e))?;
        self.engaged = true;
        Ok(())
    }
}

impl<P, A, B, L> MotorControl for HBridge<P, A, B, L>
where
    P: PwmOutput,
    A: DigitalOutput,
    B: DigitalOutput,
    L: DigitalOutput,
{
    type Error = MotorError;

    fn set_direction(&mut self, direction: Direction) -> Result<(), Self::Error> {
        self.state.direction = direction;
        self.drive_direction()?;
        info!(%direction, "direction set");
        Ok(())
    }

    fn set_speed(&mut self, percent: i32) -> Result<(), Self::Error> {
        let speed = clamp_speed(percent);
        self.state.speed = speed;

        if speed == 0 {
            self.state.on = false;
            self.enable
                .disable()
                .map_err(|e| MotorError::output("enable", e))?;
            self.indicator
                .set_low()
                .map_err(|e| MotorError::output("indicator", e))?;
        } else {
            // After a turn-off the inputs are braked; restore the direction first.
            if !self.engaged {
                self.drive_direction()?;
            }
            self.state.on = true;
            self.enable
                .set_duty_cycle_percent(speed)
                .map_err(|e| MotorError::output("enable", e))?;
            self.indicator
                .set_high()
                .map_err(|e| MotorError::output("indicator", e))?;
        }

        debug!(speed, on = self.state.on, "speed set");
        Ok(())
    }

    fn turn_on(&mut self) -> Result<(), Self::Error> {
        if self.state.on {
            return Ok(());
        }
        if self.state.speed == 0 {
            self.state.speed = self.default_on_speed;
        }
        self.drive_direction()?;
        self.set_speed(i32::from(self.state.speed))?;
        info!(speed = self.state.speed, direction = %self.state.direction, "motor on");
        Ok(())
    }

    fn turn_off(&mut self) -> Result<(), Self::Error> {
        self.state.on = false;
        self.engaged = false;

        // Every output is attempted even if an earlier one fails.
        let results: [(&'static str, Result<(), HardwareError>); 4] = [
            ("enable", self.enable.disable().map_err(Into::into)),
            ("in1", self.in1.set_low().map_err(Into::into)),
            ("in2", self.in2.set_low().map_err(Into::into)),
            ("indicator", self.indicator.set_low().map_err(Into::into)),
        ];
        for (output, result) in results {
            result.map_err(|source| MotorError::Output { output, source })?;
        }

        debug!("motor off");
        Ok(())
    }

    fn state(&self) -> MotorState {
        self.state
    }
}

impl<P, A, B, L> Drop for HBridge<P, A, B, L>
where
    P: PwmOutput,
    A: DigitalOutput,
    B: DigitalOutput,
    L: DigitalOutput,
{
    fn drop(&mut self) {
        if let Err(e) = self.turn_off() {
            error!(error = %e, "failed to brake motor on release");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::mock::{MockPin, MockPwm};

    struct Rig {
        enable: MockPwm,
        in1: MockPin,
        in2: MockPin,
        led: MockPin,
    }

    fn rig() -> (HBridge<MockPwm, MockPin, MockPin, MockPin>, Rig) {
        let pins = Rig {
            enable: MockPwm::new(255),
            in1: MockPin::new(23),
            in2: MockPin::new(24),
            led: MockPin::new(25),
        };
        let bridge = HBridge::new(
            pins.enable.clone(),
            pins.in1.clone(),
            pins.in2.clone(),
            pins.led.clone(),
        )
        .unwrap();
        (bridge, pins)
    }

    #[test]
    fn test_new_bridge_is_braked() {
        let (bridge, pins) = rig();
        assert_eq!(bridge.state(), MotorState::default());
        assert_eq!(pins.enable.duty(), 0);
        assert!(!pins.in1.is_high());
        assert!(!pins.in2.is_high());
        assert!(!pins.led.is_high());
    }

    #[test]
    fn test_turn_on_uses_default_speed() {
        let (mut bridge, pins) = rig();
        bridge.turn_on().unwrap();

        let state = bridge.state();
        assert!(state.on);
        assert_eq!(state.speed, DEFAULT_ON_SPEED);
        assert_eq!(pins.enable.duty(), 127);
        assert!(pins.in1.is_high());
        assert!(!pins.in2.is_high());
        assert!(pins.led.is_high());
    }

    #[test]
    fn test_set_speed_is_clamped() {
        let (mut bridge, pins) = rig();

        bridge.set_speed(150).unwrap();
        assert_eq!(bridge.state().speed, 100);
        assert_eq!(pins.enable.duty(), 255);

        bridge.set_speed(-5).unwrap();
        assert_eq!(bridge.state().speed, 0);
        assert!(!bridge.state().on);
        assert_eq!(pins.enable.duty(), 0);
    }

    #[test]
    fn test_turn_off_keeps_speed() {
        let (mut bridge, pins) = rig();
        bridge.set_speed(70).unwrap();
        bridge.turn_off().unwrap();

        let state = bridge.state();
        assert!(!state.on);
        assert_eq!(state.speed, 70);
        assert_eq!(pins.enable.duty(), 0);
        assert!(!pins.in1.is_high());
        assert!(!pins.in2.is_high());

        bridge.turn_on().unwrap();
        assert_eq!(bridge.state().speed, 70);
    }

    #[test]
    fn test_set_speed_after_off_restores_direction() {
        let (mut bridge, pins) = rig();
        bridge.set_direction(Direction::Reverse).unwrap();
        bridge.set_speed(40).unwrap();
        bridge.turn_off().unwrap();

        bridge.set_speed(60).unwrap();
        assert!(bridge.state().on);
        assert!(!pins.in1.is_high());
        assert!(pins.in2.is_high());
    }

    #[test]
    fn test_turn_off_attempts_every_output() {
        let (mut bridge, pins) = rig();
        bridge.turn_on().unwrap();

        pins.in1.set_failing(true);
        let result = bridge.turn_off();
        assert!(matches!(result, Err(MotorError::Output { output: "in1", .. })));

        // The outputs after the failing one were still driven low.
        assert_eq!(pins.enable.duty(), 0);
        assert!(!pins.in2.is_high());
        assert!(!pins.led.is_high());
        assert!(!bridge.state().on);
    }

    #[test]
    fn test_drop_brakes_motor() {
        let (mut bridge, pins) = rig();
        bridge.set_speed(80).unwrap();
        drop(bridge);

        assert_eq!(pins.enable.duty(), 0);
        assert!(!pins.in1.is_high());
        assert!(!pins.led.is_high());
    }
}
