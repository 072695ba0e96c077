use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use rpmlink_ipc::IpcConfig;
use serde::Deserialize;
use tracing::{error, info};

use crate::server::Acknowledgment;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// `[peripheral]` configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PeripheralConfig {
    /// Advertised local name.
    pub device_name: String,
    /// Period of the telemetry notifier.
    pub notify_interval_ms: u64,
    /// Connection acknowledgment pulses; zero disables the acknowledgment.
    pub ack_pulses: u32,
    /// Speed set before the acknowledgment pulses.
    pub ack_speed: i32,
    /// On time of each pulse.
    pub ack_on_ms: u64,
    /// Gap between pulses.
    pub ack_gap_ms: u64,
    /// Pause after setting the acknowledgment speed.
    pub ack_settle_ms: u64,
    /// How often the BlueZ backend checks for connected devices.
    pub connection_poll_ms: u64,
    /// Command lines buffered ahead of the command pump.
    pub command_queue: usize,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            device_name: "RaspberryPi".into(),
            notify_interval_ms: 100,
            ack_pulses: 4,
            ack_speed: 50,
            ack_on_ms: 150,
            ack_gap_ms: 100,
            ack_settle_ms: 50,
            connection_poll_ms: 250,
            command_queue: 32,
        }
    }
}

impl PeripheralConfig {
    /// Notifier period.
    pub fn notify_interval(&self) -> Duration {
        Duration::from_millis(self.notify_interval_ms)
    }

    /// Connection poll period.
    pub fn connection_poll(&self) -> Duration {
        Duration::from_millis(self.connection_poll_ms)
    }

    /// Connection acknowledgment sequence.
    pub fn acknowledgment(&self) -> Acknowledgment {
        Acknowledgment {
            pulses: self.ack_pulses,
            speed: self.ack_speed,
            settle: Duration::from_millis(self.ack_settle_ms),
            on: Duration::from_millis(self.ack_on_ms),
            gap: Duration::from_millis(self.ack_gap_ms),
        }
    }
}

/// Everything the peripheral process reads from configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Pipe locations and timing.
    pub ipc: IpcConfig,
    /// GATT server behavior.
    pub peripheral: PeripheralConfig,
}

impl Settings {
    /// Reject values that would stall a timer or the command queue.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(field) = self.ipc.invalid_field() {
            return Err(ConfigError::Message(format!("{field} must be non-zero")));
        }
        let peripheral = &self.peripheral;
        for (field, value) in [
            ("peripheral.notify_interval_ms", peripheral.notify_interval_ms),
            ("peripheral.connection_poll_ms", peripheral.connection_poll_ms),
            ("peripheral.command_queue", peripheral.command_queue as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::Message(format!("{field} must be non-zero")));
            }
        }
        Ok(())
    }
}

/// Load `config/default.toml` (or the file named by `RPMLINK_CONFIG`), then
/// apply `RPMLINK__SECTION__KEY` environment overrides.
pub fn load_settings() -> Result<Settings, ConfigError> {
    let path = std::env::var("RPMLINK_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    info!("Attempting to load configuration from {}", path);

    let settings = Config::builder()
        .add_source(File::new(&path, FileFormat::Toml).required(false))
        .add_source(Environment::with_prefix("RPMLINK").separator("__").try_parsing(true))
        .build()
        .and_then(|config| config.try_deserialize::<Settings>())
        .and_then(|settings| settings.validate().map(|()| settings));

    match settings {
        Ok(settings) => {
            info!(?settings, "configuration loaded");
            Ok(settings)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            Err(e)
        }
    }
}
