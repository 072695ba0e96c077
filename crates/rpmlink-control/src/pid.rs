//! PID speed regulation.
//!
//! The controller nudges the motor speed towards a target RPM. Changes are rate
//! limited to a couple of percent per tick, and after every change the
//! controller holds off for a stabilization period so the rotor can settle
//! before it is measured again.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::trace;

/// `[pid]` configuration section.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct PidConfig {
    /// Proportional gain.
    pub kp: f64,
    /// Integral gain.
    pub ki: f64,
    /// Derivative gain.
    pub kd: f64,
    /// Bound on the accumulated integral, applied symmetrically.
    pub max_integral: f64,
    /// Errors at or beyond this magnitude are not accumulated.
    pub integral_band: f64,
    /// Largest speed change per tick, in percent.
    pub max_step: f64,
    /// Hold-off after a speed change.
    pub stabilize_ms: u64,
    /// Speed forced when starting from standstill with a small positive step.
    pub kickstart_speed: u8,
    /// Targets below this are treated as "stopped".
    pub min_target_rpm: f64,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 0.03,
            ki: 0.005,
            kd: 0.01,
            max_integral: 50.0,
            integral_band: 500.0,
            max_step: 2.0,
            stabilize_ms: 500,
            kickstart_speed: 20,
            min_target_rpm: 1.0,
        }
    }
}

/// Memory carried between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PidState {
    /// Accumulated error, within `±max_integral`.
    pub integral: f64,
    /// Error seen on the previous tick.
    pub last_error: f64,
    /// When the speed was last changed by the controller.
    pub last_change: Option<Instant>,
}

/// Rate-limited PID regulator producing a speed percentage.
#[derive(Debug, Clone)]
pub struct PidSpeedController {
    config: PidConfig,
    state: PidState,
}

impl PidSpeedController {
    /// A controller with empty memory.
    pub fn new(config: PidConfig) -> Self {
        Self {
            config,
            state: PidState::default(),
        }
    }

    /// Forget the integral, previous error and stabilization timestamp.
    pub fn reset(&mut self) {
        self.state = PidState::default();
    }

    /// Current memory.
    pub fn state(&self) -> PidState {
        self.state
    }

    /// Gains and limits in use.
    pub fn config(&self) -> &PidConfig {
        &self.config
    }

    /// Compute the speed for this tick.
    ///
    /// # Arguments
    ///
    /// * `current_rpm` - Latest estimate.
    /// * `desired_rpm` - Target.
    /// * `current_speed` - Speed the motor is running at, in percent.
    /// * `now` - Tick time.
    ///
    /// # Returns
    ///
    /// The new speed in `0..=100`. A target below `min_target_rpm` returns 0
    /// and clears the controller memory.
    pub fn update(&mut self, current_rpm: f64, desired_rpm: f64, current_speed: u8, now: Instant) -> u8 {
        if desired_rpm < self.config.min_target_rpm {
            self.reset();
            return 0;
        }

        if let Some(changed) = self.state.last_change {
            let settle = Duration::from_millis(self.config.stabilize_ms);
            if now.saturating_duration_since(changed) < settle {
                return current_speed;
            }
        }

        let error = desired_rpm - current_rpm;
        if error.abs() < self.config.integral_band {
            self.state.integral =
                (self.state.integral + error).clamp(-self.config.max_integral, self.config.max_integral);
        }

        let p = self.config.kp * error;
        let i = self.config.ki * self.state.integral;
        let d = self.config.kd * (error - self.state.last_error);
        self.state.last_error = error;

        let adjustment = (p + i + d).clamp(-self.config.max_step, self.config.max_step);
        let current = i32::from(current_speed);
        let mut new_speed = (current + adjustment.trunc() as i32).clamp(0, 100) as u8;

        // A stalled fan needs a real push to break static friction.
        let kickstart = self.config.kickstart_speed;
        if current_speed == 0 && adjustment > 0.0 && adjustment < f64::from(kickstart) {
            new_speed = kickstart.min(100);
        }

        if new_speed != current_speed {
            self.state.last_change = Some(now);
        }

        trace!(error, p, i, d, adjustment, current_speed, new_speed, "pid step");
        new_speed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-6;
    const TICK: Duration = Duration::from_millis(600);

    #[test]
    fn test_low_target_stops_and_resets() {
        let mut pid = PidSpeedController::new(PidConfig::default());
        let t0 = Instant::now();
        pid.update(500.0, 800.0, 40, t0);
        assert!(pid.state().integral.abs() > EPSILON);

        assert_eq!(pid.update(500.0, 0.5, 40, t0 + TICK), 0);
        assert_eq!(pid.state(), PidState::default());
    }

    #[test]
    fn test_integral_stays_bounded() {
        let mut pid = PidSpeedController::new(PidConfig::default());
        let mut now = Instant::now();
        for _ in 0..200 {
            pid.update(1000.0, 1400.0, 50, now);
            assert!(pid.state().integral.abs() <= 50.0 + EPSILON);
            now += TICK;
        }
        assert!((pid.state().integral - 50.0).abs() < EPSILON);

        for _ in 0..200 {
            pid.update(1400.0, 1000.0, 50, now);
            assert!(pid.state().integral.abs() <= 50.0 + EPSILON);
            now += TICK;
        }
        assert!((pid.state().integral + 50.0).abs() < EPSILON);
    }

    #[test]
    fn test_large_error_is_not_integrated() {
        let mut pid = PidSpeedController::new(PidConfig::default());
        pid.update(0.0, 3000.0, 50, Instant::now());
        assert!(pid.state().integral.abs() < EPSILON);
        assert!((pid.state().last_error - 3000.0).abs() < EPSILON);
    }

    #[test]
    fn test_step_is_rate_limited() {
        let mut pid = PidSpeedController::new(PidConfig::default());
        let mut now = Instant::now();
        let mut speed = 50u8;
        for (current, desired) in [(0.0, 9000.0), (9000.0, 10.0), (100.0, 5000.0), (4000.0, 200.0)] {
            let next = pid.update(current, desired, speed, now);
            assert!((i32::from(next) - i32::from(speed)).abs() <= 2);
            speed = next;
            now += TICK;
        }
    }

    #[test]
    fn test_fractional_step_truncates() {
        let mut pid = PidSpeedController::new(PidConfig::default());
        // P = 1.2, I = 0.2, D = 0.4; the 1.8 total truncates to a one percent step.
        assert_eq!(pid.update(960.0, 1000.0, 40, Instant::now()), 41);
    }

    #[test]
    fn test_kickstart_from_standstill() {
        let mut pid = PidSpeedController::new(PidConfig::default());
        assert_eq!(pid.update(0.0, 1000.0, 0, Instant::now()), 20);
    }

    #[test]
    fn test_no_kickstart_when_decelerating() {
        let mut pid = PidSpeedController::new(PidConfig::default());
        assert_eq!(pid.update(2000.0, 1000.0, 0, Instant::now()), 0);
    }

    #[test]
    fn test_holds_during_stabilization() {
        let mut pid = PidSpeedController::new(PidConfig::default());
        let t0 = Instant::now();
        let first = pid.update(0.0, 2000.0, 50, t0);
        assert_eq!(first, 52);

        let held = pid.update(0.0, 2000.0, first, t0 + Duration::from_millis(300));
        assert_eq!(held, first);

        let next = pid.update(0.0, 2000.0, first, t0 + Duration::from_millis(500));
        assert_eq!(next, 54);
    }

    #[test]
    fn test_unchanged_speed_does_not_restart_hold() {
        let mut pid = PidSpeedController::new(PidConfig::default());
        let t0 = Instant::now();
        // Already at full speed: the clamp swallows the step.
        assert_eq!(pid.update(0.0, 9000.0, 100, t0), 100);
        assert!(pid.state().last_change.is_none());
    }
}
