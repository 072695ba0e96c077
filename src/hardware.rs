//! Pick the motor driver and beam sensor the controller runs against.

use rpmlink_control::SessionConfig;
use rpmlink_motor::MotorError;

use crate::config::Settings;

#[cfg(feature = "gpio-hardware")]
mod imp {
    use rpmlink_motor::devices::rpi::{self, RpiBridge, RpiInput};

    use super::*;

    pub type Motor = RpiBridge;
    pub type Sensor = RpiInput;

    pub fn open(settings: &Settings, control: &SessionConfig) -> Result<(Motor, Sensor), MotorError> {
        let (bridge, sensor) = rpi::open(&settings.motor)?;
        Ok((bridge.with_default_on_speed(control.on_default_speed), sensor))
    }
}

#[cfg(not(feature = "gpio-hardware"))]
mod imp {
    use rpmlink_motor::HBridge;
    use rpmlink_motor::devices::mock::MockPin;
    use rpmlink_motor::devices::sim::{SimPwm, SimRotor, SimSensor};
    use tracing::info;

    use super::*;

    pub type Motor = HBridge<SimPwm, MockPin, MockPin, MockPin>;
    pub type Sensor = SimSensor;

    pub fn open(settings: &Settings, control: &SessionConfig) -> Result<(Motor, Sensor), MotorError> {
        let rotor = SimRotor::new(settings.sim, settings.sensor.blades);
        let pins = &settings.motor;
        let bridge = HBridge::new(
            rotor.pwm(),
            MockPin::new(pins.in1_pin),
            MockPin::new(pins.in2_pin),
            MockPin::new(pins.led_pin),
        )?
        .with_default_on_speed(control.on_default_speed);
        info!(max_rpm = settings.sim.max_rpm, "running against the simulated fan");
        Ok((bridge, rotor.sensor()))
    }
}

pub use imp::{Motor, Sensor};

/// Claim the motor driver and the beam sensor.
pub fn open(settings: &Settings) -> Result<(Motor, Sensor), MotorError> {
    imp::open(settings, &settings.control)
}
