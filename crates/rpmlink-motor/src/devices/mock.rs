//! In-memory pins for tests and the simulated rig.
//!
//! Every mock is a cheap handle over shared state: clone it before handing it to
//! a driver and keep the clone to observe what the driver did.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::HardwareError;
use crate::hardware::gpio::{DigitalInput, DigitalOutput};
use crate::hardware::pwm::PwmOutput;

/// Output pin that records every level written to it.
#[derive(Debug, Clone, Default)]
pub struct MockPin {
    pin: u8,
    history: Arc<Mutex<Vec<bool>>>,
    failing: Arc<AtomicBool>,
}

impl MockPin {
    /// A pin labelled with `pin` in error messages.
    pub fn new(pin: u8) -> Self {
        Self {
            pin,
            ..Self::default()
        }
    }

    /// Last written level, `false` if never written.
    pub fn is_high(&self) -> bool {
        self.history.lock().last().copied().unwrap_or(false)
    }

    /// Every level written so far, oldest first.
    pub fn history(&self) -> Vec<bool> {
        self.history.lock().clone()
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn write(&mut self, high: bool) -> Result<(), HardwareError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(HardwareError::Gpio {
                pin: self.pin,
                message: "injected failure".into(),
            });
        }
        self.history.lock().push(high);
        Ok(())
    }
}

impl DigitalOutput for MockPin {
    type Error = HardwareError;

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write(true)
    }

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write(false)
    }
}

/// PWM output that remembers its duty value.
#[derive(Debug, Clone)]
pub struct MockPwm {
    max_duty: u16,
    duty: Arc<Mutex<u16>>,
}

impl MockPwm {
    /// A PWM with the given duty range.
    pub fn new(max_duty: u16) -> Self {
        Self {
            max_duty,
            duty: Arc::default(),
        }
    }

    /// Last duty value written.
    pub fn duty(&self) -> u16 {
        *self.duty.lock()
    }
}

impl Default for MockPwm {
    fn default() -> Self {
        Self::new(255)
    }
}

impl PwmOutput for MockPwm {
    type Error = HardwareError;

    fn max_duty_cycle(&self) -> u16 {
        self.max_duty
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        *self.duty.lock() = duty.min(self.max_duty);
        Ok(())
    }
}

/// Input pin whose level is set from the outside.
#[derive(Debug, Clone, Default)]
pub struct MockInput {
    level: Arc<AtomicBool>,
}

impl MockInput {
    /// Set the level the next read returns.
    pub fn set_level(&self, high: bool) {
        self.level.store(high, Ordering::SeqCst);
    }
}

impl DigitalInput for MockInput {
    type Error = HardwareError;

    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.level.load(Ordering::SeqCst))
    }
}
