//! Command interpretation and mode handling.
//!
//! The session is the single owner of the motor driver, the PID memory and the
//! control mode. Nothing else mutates them.

use core::fmt;
use std::time::{Duration, Instant};

use rpmlink_ipc::Command;
use rpmlink_motor::{Direction, MotorControl, MotorError, MotorState};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::ControlError;
use crate::pid::{PidConfig, PidSpeedController, PidState};

/// Whether speed is set by the operator or regulated to a target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlMode {
    /// Speed commands apply directly.
    Manual,
    /// Speed is regulated towards `target_rpm`.
    Automatic {
        /// Target, within `0..=max_target_rpm`.
        target_rpm: f64,
    },
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMode::Manual => f.write_str("manual"),
            ControlMode::Automatic { target_rpm } => write!(f, "auto({target_rpm:.0})"),
        }
    }
}

/// `[control]` configuration section.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Control tick period.
    pub tick_ms: u64,
    /// Speed used when automatic mode starts a stopped motor with no speed set.
    pub auto_start_speed: u8,
    /// Speed `on` falls back to when no speed has been set.
    pub on_default_speed: u8,
    /// Change applied by `+` and `-`.
    pub speed_step: i32,
    /// Upper bound for automatic targets.
    pub max_target_rpm: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            auto_start_speed: 30,
            on_default_speed: 50,
            speed_step: 10,
            max_target_rpm: 10_000.0,
        }
    }
}

impl SessionConfig {
    /// Reject values the session cannot work with.
    pub fn validate(&self) -> Result<(), ControlError> {
        if self.tick_ms == 0 {
            return Err(ControlError::InvalidConfig("control.tick_ms must be non-zero".into()));
        }
        if !(self.max_target_rpm.is_finite() && self.max_target_rpm > 0.0) {
            return Err(ControlError::InvalidConfig(
                "control.max_target_rpm must be a positive number".into(),
            ));
        }
        for (field, speed) in [
            ("control.auto_start_speed", self.auto_start_speed),
            ("control.on_default_speed", self.on_default_speed),
        ] {
            if speed == 0 || speed > 100 {
                return Err(ControlError::InvalidConfig(format!("{field} must be within 1..=100")));
            }
        }
        Ok(())
    }

    /// Tick period as a [`Duration`].
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Why a command had no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// A manual speed command arrived while the speed is being regulated.
    AutomaticModeActive,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::AutomaticModeActive => {
                f.write_str("speed is regulated in automatic mode; send `manual` first")
            }
        }
    }
}

/// What handling a command did.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// State changed as requested.
    Applied,
    /// Answer to an RPM query.
    Rpm(f64),
    /// Refused; state unchanged.
    Rejected(RejectReason),
    /// Not understood; state unchanged.
    Ignored,
    /// Shutdown requested.
    Quit,
}

/// Mode state machine on top of a motor driver.
pub struct ControlSession<M> {
    motor: M,
    mode: ControlMode,
    pid: PidSpeedController,
    config: SessionConfig,
}

impl<M> ControlSession<M>
where
    M: MotorControl<Error = MotorError>,
{
    /// Start in manual mode. The motor is expected to be off.
    pub fn new(motor: M, pid: PidConfig, config: SessionConfig) -> Self {
        Self {
            motor,
            mode: ControlMode::Manual,
            pid: PidSpeedController::new(pid),
            config,
        }
    }

    /// Current mode.
    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    /// Current motor state.
    pub fn motor_state(&self) -> MotorState {
        self.motor.state()
    }

    /// Current PID memory.
    pub fn pid_state(&self) -> PidState {
        self.pid.state()
    }

    /// The driver.
    pub fn motor(&self) -> &M {
        &self.motor
    }

    /// Apply one command. `rpm` is the latest estimate, reported back for queries.
    pub fn handle(&mut self, command: Command, rpm: f64) -> Result<CommandOutcome, ControlError> {
        if command.is_manual_only() && matches!(self.mode, ControlMode::Automatic { .. }) {
            return Ok(CommandOutcome::Rejected(RejectReason::AutomaticModeActive));
        }

        match command {
            Command::SetAutoTarget(target) => self.enter_automatic(target)?,
            Command::SetManual => {
                self.mode = ControlMode::Manual;
                self.pid.reset();
                info!("manual mode");
            }
            Command::On => self.motor.turn_on()?,
            Command::Off => {
                self.motor.turn_off()?;
                info!("motor off");
            }
            Command::Forward => self.motor.set_direction(Direction::Forward)?,
            Command::Reverse => self.motor.set_direction(Direction::Reverse)?,
            Command::SetSpeed(speed) => self.motor.set_speed(speed)?,
            Command::Increase => {
                let speed = i32::from(self.motor.state().speed);
                self.motor.set_speed(speed.saturating_add(self.config.speed_step))?;
            }
            Command::Decrease => {
                let speed = i32::from(self.motor.state().speed);
                self.motor.set_speed(speed.saturating_sub(self.config.speed_step))?;
            }
            Command::QueryRpm => return Ok(CommandOutcome::Rpm(rpm)),
            Command::Quit => return Ok(CommandOutcome::Quit),
            Command::Unknown(text) => {
                warn!(command = %text, "unknown command ignored");
                return Ok(CommandOutcome::Ignored);
            }
        }
        Ok(CommandOutcome::Applied)
    }

    fn enter_automatic(&mut self, target: f64) -> Result<(), ControlError> {
        let target = if target.is_finite() {
            target.clamp(0.0, self.config.max_target_rpm)
        } else {
            0.0
        };
        self.mode = ControlMode::Automatic { target_rpm: target };
        self.pid.reset();
        info!(target_rpm = target, "automatic mode");

        if target > 0.0 {
            let state = self.motor.state();
            if !state.on {
                self.motor.set_direction(state.direction)?;
                let speed = if state.speed == 0 {
                    self.config.auto_start_speed
                } else {
                    state.speed
                };
                self.motor.set_speed(i32::from(speed))?;
            }
        } else {
            self.motor.turn_off()?;
        }
        Ok(())
    }

    /// One regulation step. Returns the new speed when the controller changed it.
    ///
    /// Does nothing unless the session is automatic and the motor is on.
    pub fn regulate(&mut self, rpm: f64, now: Instant) -> Result<Option<u8>, ControlError> {
        let ControlMode::Automatic { target_rpm } = self.mode else {
            return Ok(None);
        };
        let state = self.motor.state();
        if !state.on {
            return Ok(None);
        }

        let speed = self.pid.update(rpm, target_rpm, state.speed, now);
        if speed == state.speed {
            return Ok(None);
        }
        self.motor.set_speed(i32::from(speed))?;
        Ok(Some(speed))
    }

    /// Force the motor off and return to manual mode.
    ///
    /// Mode and PID memory are reset even when the driver reports an error.
    pub fn fail_safe(&mut self) -> Result<(), ControlError> {
        self.mode = ControlMode::Manual;
        self.pid.reset();
        self.motor.turn_off()?;
        warn!("fail-safe engaged: motor off, manual mode");
        Ok(())
    }

    /// Turn the motor off for process exit.
    pub fn shutdown(&mut self) -> Result<(), ControlError> {
        self.motor.turn_off()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpmlink_motor::HBridge;
    use rpmlink_motor::devices::mock::{MockPin, MockPwm};

    const EPSILON: f64 = 1e-6;

    type TestBridge = HBridge<MockPwm, MockPin, MockPin, MockPin>;

    fn session() -> ControlSession<TestBridge> {
        let bridge = HBridge::new(
            MockPwm::default(),
            MockPin::new(23),
            MockPin::new(24),
            MockPin::new(25),
        )
        .unwrap();
        ControlSession::new(bridge, PidConfig::default(), SessionConfig::default())
    }

    fn target(session: &ControlSession<TestBridge>) -> Option<f64> {
        match session.mode() {
            ControlMode::Automatic { target_rpm } => Some(target_rpm),
            ControlMode::Manual => None,
        }
    }

    #[test]
    fn test_starts_manual_and_off() {
        let session = session();
        assert_eq!(session.mode(), ControlMode::Manual);
        assert_eq!(session.motor_state(), MotorState::default());
    }

    #[test]
    fn test_auto_target_is_clamped() {
        let mut session = session();
        session.handle(Command::SetAutoTarget(25_000.0), 0.0).unwrap();
        assert!((target(&session).unwrap() - 10_000.0).abs() < EPSILON);

        session.handle(Command::SetAutoTarget(-40.0), 0.0).unwrap();
        assert!(target(&session).unwrap().abs() < EPSILON);
        assert!(!session.motor_state().on);
    }

    #[test]
    fn test_auto_starts_stopped_motor_at_safe_speed() {
        let mut session = session();
        session.handle(Command::Reverse, 0.0).unwrap();
        session.handle(Command::SetAutoTarget(1000.0), 0.0).unwrap();

        let state = session.motor_state();
        assert!(state.on);
        assert_eq!(state.speed, 30);
        assert_eq!(state.direction, Direction::Reverse);
    }

    #[test]
    fn test_auto_keeps_running_speed() {
        let mut session = session();
        session.handle(Command::SetSpeed(65), 0.0).unwrap();
        session.handle(Command::SetAutoTarget(1000.0), 0.0).unwrap();
        assert_eq!(session.motor_state().speed, 65);
    }

    #[test]
    fn test_auto_then_manual_then_speed() {
        let mut session = session();
        session.handle(Command::SetAutoTarget(1000.0), 0.0).unwrap();
        assert!(session.motor_state().on);
        assert!((target(&session).unwrap() - 1000.0).abs() < EPSILON);

        session.handle(Command::SetManual, 0.0).unwrap();
        assert_eq!(session.mode(), ControlMode::Manual);
        // Leaving automatic mode does not touch the motor by itself.
        assert_eq!(session.motor_state().speed, 30);

        assert_eq!(
            session.handle(Command::SetSpeed(80), 0.0).unwrap(),
            CommandOutcome::Applied
        );
        assert_eq!(session.motor_state().speed, 80);
    }

    #[test]
    fn test_manual_speed_rejected_in_automatic() {
        let mut session = session();
        session.handle(Command::SetAutoTarget(1000.0), 0.0).unwrap();
        let before = session.motor_state();

        for command in [Command::SetSpeed(80), Command::Increase, Command::Decrease] {
            let outcome = session.handle(command, 0.0).unwrap();
            assert_eq!(outcome, CommandOutcome::Rejected(RejectReason::AutomaticModeActive));
        }
        assert_eq!(session.motor_state(), before);
        assert!(target(&session).is_some());
    }

    #[test]
    fn test_off_keeps_automatic_mode() {
        let mut session = session();
        session.handle(Command::SetAutoTarget(800.0), 0.0).unwrap();
        session.handle(Command::Off, 0.0).unwrap();
        assert!(!session.motor_state().on);
        assert!(target(&session).is_some());
        // Regulation only runs while the motor is on.
        assert_eq!(session.regulate(0.0, Instant::now()).unwrap(), None);
    }

    #[test]
    fn test_step_commands_clamp() {
        let mut session = session();
        session.handle(Command::SetSpeed(95), 0.0).unwrap();
        session.handle(Command::Increase, 0.0).unwrap();
        assert_eq!(session.motor_state().speed, 100);

        session.handle(Command::SetSpeed(5), 0.0).unwrap();
        session.handle(Command::Decrease, 0.0).unwrap();
        assert_eq!(session.motor_state().speed, 0);
        assert!(!session.motor_state().on);
    }

    #[test]
    fn test_oversized_speed_line_saturates() {
        let mut session = session();
        let command = Command::parse("s 99999999999").unwrap();
        session.handle(command, 0.0).unwrap();
        assert_eq!(session.motor_state().speed, 100);
        assert!(session.motor_state().on);
    }

    #[test]
    fn test_query_and_unknown() {
        let mut session = session();
        match session.handle(Command::QueryRpm, 1234.5).unwrap() {
            CommandOutcome::Rpm(rpm) => assert!((rpm - 1234.5).abs() < EPSILON),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            session.handle(Command::Unknown("spin".into()), 0.0).unwrap(),
            CommandOutcome::Ignored
        );
        assert_eq!(session.motor_state(), MotorState::default());
        assert_eq!(session.handle(Command::Quit, 0.0).unwrap(), CommandOutcome::Quit);
    }

    #[test]
    fn test_regulate_moves_towards_target() {
        let mut session = session();
        session.handle(Command::SetAutoTarget(2000.0), 0.0).unwrap();
        assert_eq!(session.regulate(500.0, Instant::now()).unwrap(), Some(32));
        assert_eq!(session.motor_state().speed, 32);
    }

    #[test]
    fn test_regulate_idle_in_manual() {
        let mut session = session();
        session.handle(Command::SetSpeed(40), 0.0).unwrap();
        assert_eq!(session.regulate(0.0, Instant::now()).unwrap(), None);
        assert_eq!(session.motor_state().speed, 40);
    }

    #[test]
    fn test_fail_safe_forces_off_and_manual() {
        let mut session = session();
        session.handle(Command::SetAutoTarget(1500.0), 0.0).unwrap();
        session.regulate(200.0, Instant::now()).unwrap();

        session.fail_safe().unwrap();
        assert_eq!(session.mode(), ControlMode::Manual);
        assert!(!session.motor_state().on);
        assert_eq!(session.pid_state(), PidState::default());
    }

    #[test]
    fn test_config_validation() {
        assert!(SessionConfig::default().validate().is_ok());
        let config = SessionConfig {
            tick_ms: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(config.validate(), Err(ControlError::InvalidConfig(_))));

        for on_default_speed in [0, 101] {
            let config = SessionConfig {
                on_default_speed,
                ..SessionConfig::default()
            };
            assert!(matches!(config.validate(), Err(ControlError::InvalidConfig(_))));
        }
    }
}
