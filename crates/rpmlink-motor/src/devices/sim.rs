//! Simulated fan for running the rig without hardware.
//!
//! The rotor speed follows the PWM duty through a first-order lag and the
//! break-beam input flips level each time a blade crosses the beam.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Deserialize;

use crate::error::HardwareError;
use crate::hardware::gpio::DigitalInput;
use crate::hardware::pwm::PwmOutput;

const SIM_MAX_DUTY: u16 = 255;

/// Physical parameters of the simulated fan.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimParams {
    /// Speed reached at 100% duty.
    pub max_rpm: f64,
    /// Time constant of the speed response.
    pub time_constant_ms: u64,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            max_rpm: 3000.0,
            time_constant_ms: 300,
        }
    }
}

#[derive(Debug)]
struct Rotor {
    params: SimParams,
    blades: u32,
    duty: f64,
    rpm: f64,
    turns: f64,
    updated: Instant,
}

impl Rotor {
    fn advance(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.updated).as_secs_f64();
        self.updated = now;
        if dt <= 0.0 {
            return;
        }

        let tau = (self.params.time_constant_ms as f64 / 1000.0).max(1e-3);
        let target = self.duty * self.params.max_rpm;
        let start = self.rpm;
        self.rpm = target + (start - target) * (-dt / tau).exp();
        self.turns += (start + self.rpm) * 0.5 / 60.0 * dt;
    }

    fn beam_level(&self) -> bool {
        let passes = (self.turns * f64::from(self.blades)).floor() as u64;
        passes % 2 == 1
    }
}

/// Shared rotor model. Hand out its [`SimPwm`] to the motor driver and its
/// [`SimSensor`] to the sampler.
#[derive(Debug, Clone)]
pub struct SimRotor {
    inner: Arc<Mutex<Rotor>>,
}

impl SimRotor {
    /// A stationary rotor with `blades` blades.
    pub fn new(params: SimParams, blades: u32) -> Self {
        Self::starting_at(params, blades, Instant::now())
    }

    fn starting_at(params: SimParams, blades: u32, now: Instant) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Rotor {
                params,
                blades: blades.max(1),
                duty: 0.0,
                rpm: 0.0,
                turns: 0.0,
                updated: now,
            })),
        }
    }

    /// PWM output that sets the rotor drive.
    pub fn pwm(&self) -> SimPwm {
        SimPwm {
            rotor: self.clone(),
        }
    }

    /// Break-beam input watching the blades.
    pub fn sensor(&self) -> SimSensor {
        SimSensor {
            rotor: self.clone(),
        }
    }

    /// True rotor speed right now.
    pub fn rpm(&self) -> f64 {
        self.rpm_at(Instant::now())
    }

    fn rpm_at(&self, now: Instant) -> f64 {
        let mut rotor = self.inner.lock();
        rotor.advance(now);
        rotor.rpm
    }

    fn set_duty_at(&self, fraction: f64, now: Instant) {
        let mut rotor = self.inner.lock();
        rotor.advance(now);
        rotor.duty = fraction.clamp(0.0, 1.0);
    }

    fn beam_at(&self, now: Instant) -> bool {
        let mut rotor = self.inner.lock();
        rotor.advance(now);
        rotor.beam_level()
    }
}

/// Drive input of a [`SimRotor`].
#[derive(Debug, Clone)]
pub struct SimPwm {
    rotor: SimRotor,
}

impl PwmOutput for SimPwm {
    type Error = HardwareError;

    fn max_duty_cycle(&self) -> u16 {
        SIM_MAX_DUTY
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        let fraction = f64::from(duty.min(SIM_MAX_DUTY)) / f64::from(SIM_MAX_DUTY);
        self.rotor.set_duty_at(fraction, Instant::now());
        Ok(())
    }
}

/// Break-beam output of a [`SimRotor`].
#[derive(Debug, Clone)]
pub struct SimSensor {
    rotor: SimRotor,
}

impl DigitalInput for SimSensor {
    type Error = HardwareError;

    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.rotor.beam_at(Instant::now()))
    }
}
