//! Pipe locations and timing shared by both processes.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Default location of the command pipe.
pub const DEFAULT_COMMAND_PATH: &str = "/tmp/motor_pipe";
/// Default location of the telemetry pipe.
pub const DEFAULT_TELEMETRY_PATH: &str = "/tmp/rpm_pipe";

/// `[ipc]` configuration section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Pipe carrying commands to the controller.
    pub command_path: PathBuf,
    /// Pipe carrying telemetry from the controller.
    pub telemetry_path: PathBuf,
    /// Delay between attempts to open a missing peer.
    pub reconnect_interval_ms: u64,
    /// Longest a single write may block before the message is dropped.
    pub write_timeout_ms: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            command_path: PathBuf::from(DEFAULT_COMMAND_PATH),
            telemetry_path: PathBuf::from(DEFAULT_TELEMETRY_PATH),
            reconnect_interval_ms: 1000,
            write_timeout_ms: 50,
        }
    }
}

impl IpcConfig {
    /// Reconnect cadence as a [`Duration`].
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Write timeout as a [`Duration`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Returns the name of the first field that must be non-zero but is not.
    pub fn invalid_field(&self) -> Option<&'static str> {
        if self.reconnect_interval_ms == 0 {
            Some("ipc.reconnect_interval_ms")
        } else if self.write_timeout_ms == 0 {
            Some("ipc.write_timeout_ms")
        } else {
            None
        }
    }
}
