//! Pin-level capabilities the motor driver is generic over.

use serde::Deserialize;

pub mod gpio;
pub mod pwm;

/// BCM pin assignment of the rig plus the PWM carrier frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PinMap {
    /// H-bridge enable line, driven with PWM.
    pub enable_pin: u8,
    /// H-bridge input 1.
    pub in1_pin: u8,
    /// H-bridge input 2.
    pub in2_pin: u8,
    /// Status LED, lit while the motor is powered.
    pub led_pin: u8,
    /// Break-beam sensor input.
    pub sensor_pin: u8,
    /// PWM carrier frequency on the enable line.
    pub pwm_frequency_hz: u32,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            enable_pin: 17,
            in1_pin: 23,
            in2_pin: 24,
            led_pin: 25,
            sensor_pin: 5,
            pwm_frequency_hz: 1000,
        }
    }
}
