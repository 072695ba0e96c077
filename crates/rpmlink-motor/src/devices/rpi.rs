//! Raspberry Pi backend built on `rppal`.
//!
//! PWM on the enable line is software generated, which is plenty for a 1 kHz
//! carrier on a fan motor.

use rppal::gpio::{Gpio, InputPin, OutputPin};
use tracing::info;

use crate::devices::h_bridge::HBridge;
use crate::error::{HardwareError, MotorError};
use crate::hardware::PinMap;
use crate::hardware::gpio::{DigitalInput, DigitalOutput};
use crate::hardware::pwm::PwmOutput;

const RPI_MAX_DUTY: u16 = 255;

/// Bridge wired to Raspberry Pi pins.
pub type RpiBridge = HBridge<RpiPwm, RpiOutput, RpiOutput, RpiOutput>;

/// Push-pull GPIO output.
pub struct RpiOutput {
    pin: OutputPin,
}

impl DigitalOutput for RpiOutput {
    type Error = HardwareError;

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.pin.set_high();
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.pin.set_low();
        Ok(())
    }
}

/// Software PWM on a GPIO output.
pub struct RpiPwm {
    pin: OutputPin,
    frequency_hz: f64,
}

impl PwmOutput for RpiPwm {
    type Error = HardwareError;

    fn max_duty_cycle(&self) -> u16 {
        RPI_MAX_DUTY
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        let pin_number = self.pin.pin();
        let result = if duty == 0 {
            self.pin.clear_pwm().map(|()| self.pin.set_low())
        } else {
            let fraction = f64::from(duty.min(RPI_MAX_DUTY)) / f64::from(RPI_MAX_DUTY);
            self.pin.set_pwm_frequency(self.frequency_hz, fraction)
        };
        result.map_err(|e| HardwareError::Pwm {
            pin: pin_number,
            message: e.to_string(),
        })
    }
}

/// Floating GPIO input.
pub struct RpiInput {
    pin: InputPin,
}

impl DigitalInput for RpiInput {
    type Error = HardwareError;

    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.pin.is_high())
    }
}

fn output(gpio: &Gpio, pin: u8) -> Result<OutputPin, HardwareError> {
    gpio.get(pin)
        .map(|p| p.into_output_low())
        .map_err(|e| HardwareError::Gpio {
            pin,
            message: e.to_string(),
        })
}

/// Claim the bridge and sensor pins.
pub fn open(pins: &PinMap) -> Result<(RpiBridge, RpiInput), MotorError> {
    let gpio = Gpio::new().map_err(|e| MotorError::output("gpio", HardwareError::Unavailable(e.to_string())))?;

    let enable = RpiPwm {
        pin: output(&gpio, pins.enable_pin).map_err(|e| MotorError::output("enable", e))?,
        frequency_hz: f64::from(pins.pwm_frequency_hz),
    };
    let in1 = RpiOutput {
        pin: output(&gpio, pins.in1_pin).map_err(|e| MotorError::output("in1", e))?,
    };
    let in2 = RpiOutput {
        pin: output(&gpio, pins.in2_pin).map_err(|e| MotorError::output("in2", e))?,
    };
    let led = RpiOutput {
        pin: output(&gpio, pins.led_pin).map_err(|e| MotorError::output("indicator", e))?,
    };
    let sensor = gpio
        .get(pins.sensor_pin)
        .map(|p| RpiInput { pin: p.into_input() })
        .map_err(|e| {
            MotorError::output(
                "sensor",
                HardwareError::Gpio {
                    pin: pins.sensor_pin,
                    message: e.to_string(),
                },
            )
        })?;

    info!(?pins, "gpio pins claimed");
    Ok((HBridge::new(enable, in1, in2, led)?, sensor))
}
