//! Text protocol carried by the pipes.
//!
//! Commands are single lines such as `on`, `s 80` or `auto 1500`. Telemetry is one
//! `rpm:<value>` line per control tick, with the value printed to two decimals.

use core::fmt;
use core::num::IntErrorKind;

use crate::error::ProtocolError;

const TELEMETRY_PREFIX: &str = "rpm:";

/// A command accepted by the control session.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `on`: power the motor.
    On,
    /// `off`: brake and remove power.
    Off,
    /// `f`: rotate forward.
    Forward,
    /// `r`: rotate in reverse.
    Reverse,
    /// `s N`: set the manual speed in percent.
    SetSpeed(i32),
    /// `+`: raise the manual speed by one step.
    Increase,
    /// `-`: lower the manual speed by one step.
    Decrease,
    /// `auto N`: regulate to N RPM.
    SetAutoTarget(f64),
    /// `manual`: leave closed-loop regulation.
    SetManual,
    /// `rpm`: report the current estimate.
    QueryRpm,
    /// `q`: stop the controller.
    Quit,
    /// Anything else, kept verbatim for logging.
    Unknown(String),
}

impl Command {
    /// Parse one line. Surrounding whitespace and line terminators are ignored;
    /// blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Command> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let command = match line {
            "on" => Command::On,
            "off" => Command::Off,
            "f" => Command::Forward,
            "r" => Command::Reverse,
            "+" => Command::Increase,
            "-" => Command::Decrease,
            "manual" => Command::SetManual,
            "rpm" => Command::QueryRpm,
            "q" => Command::Quit,
            _ => {
                if let Some(arg) = line.strip_prefix("s ") {
                    parse_speed(arg.trim())
                        .map(Command::SetSpeed)
                        .unwrap_or_else(|| Command::Unknown(line.to_owned()))
                } else if let Some(arg) = line.strip_prefix("auto ") {
                    match arg.trim().parse::<f64>() {
                        Ok(target) if target.is_finite() => Command::SetAutoTarget(target),
                        _ => Command::Unknown(line.to_owned()),
                    }
                } else {
                    Command::Unknown(line.to_owned())
                }
            }
        };
        Some(command)
    }

    /// Whether the command only applies in manual mode.
    pub fn is_manual_only(&self) -> bool {
        matches!(
            self,
            Command::SetSpeed(_) | Command::Increase | Command::Decrease
        )
    }
}

// Out-of-range integers saturate; the driver clamps them to 0..=100.
fn parse_speed(arg: &str) -> Option<i32> {
    match arg.parse::<i32>() {
        Ok(speed) => Some(speed),
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow => Some(i32::MAX),
            IntErrorKind::NegOverflow => Some(i32::MIN),
            _ => None,
        },
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::On => f.write_str("on"),
            Command::Off => f.write_str("off"),
            Command::Forward => f.write_str("f"),
            Command::Reverse => f.write_str("r"),
            Command::SetSpeed(speed) => write!(f, "s {speed}"),
            Command::Increase => f.write_str("+"),
            Command::Decrease => f.write_str("-"),
            Command::SetAutoTarget(target) => write!(f, "auto {target}"),
            Command::SetManual => f.write_str("manual"),
            Command::QueryRpm => f.write_str("rpm"),
            Command::Quit => f.write_str("q"),
            Command::Unknown(text) => f.write_str(text),
        }
    }
}

/// One telemetry sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryMessage {
    /// Estimated speed.
    pub rpm: f64,
}

impl TelemetryMessage {
    /// Wrap an RPM estimate.
    pub const fn new(rpm: f64) -> Self {
        Self { rpm }
    }

    /// Wire form, newline terminated: `rpm:1234.50\n`.
    pub fn to_line(&self) -> String {
        format!("{TELEMETRY_PREFIX}{:.2}\n", self.rpm)
    }

    /// Notification payload for the remote client: the value alone, newline terminated.
    pub fn notification_payload(&self) -> Vec<u8> {
        format!("{:.2}\n", self.rpm).into_bytes()
    }

    /// Decode a telemetry line, with or without its terminator.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        let value = line
            .strip_prefix(TELEMETRY_PREFIX)
            .ok_or_else(|| ProtocolError::MissingPrefix(line.to_owned()))?;
        match value.trim().parse::<f64>() {
            Ok(rpm) if rpm.is_finite() => Ok(Self { rpm }),
            _ => Err(ProtocolError::InvalidValue(value.to_owned())),
        }
    }
}

impl fmt::Display for TelemetryMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TELEMETRY_PREFIX}{:.2}", self.rpm)
    }
}
