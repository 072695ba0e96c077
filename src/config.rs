use config::{Config, ConfigError, Environment, File, FileFormat};
use rpmlink_control::{EstimatorConfig, PidConfig, SessionConfig};
use rpmlink_ipc::IpcConfig;
use rpmlink_motor::devices::sim::SimParams;
use rpmlink_motor::hardware::PinMap;
use serde::Deserialize;
use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Everything the controller reads from configuration. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ipc: IpcConfig,
    pub sensor: EstimatorConfig,
    pub pid: PidConfig,
    pub control: SessionConfig,
    pub motor: PinMap,
    pub sim: SimParams,
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(field) = self.ipc.invalid_field() {
            return Err(ConfigError::Message(format!("{field} must be non-zero")));
        }
        self.sensor
            .validate()
            .and_then(|()| self.control.validate())
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        if !(self.sim.max_rpm.is_finite() && self.sim.max_rpm >= 0.0) {
            return Err(ConfigError::Message("sim.max_rpm must be a non-negative number".into()));
        }
        if self.motor.pwm_frequency_hz == 0 {
            return Err(ConfigError::Message("motor.pwm_frequency_hz must be non-zero".into()));
        }
        Ok(())
    }
}

/// Load `config/default.toml` (or `RPMLINK_CONFIG`), then `RPMLINK__SECTION__KEY` overrides.
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

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Settings {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let settings = parse(
            r#"
            [sensor]
            blades = 5

            [pid]
            kp = 0.05

            [motor]
            enable_pin = 12
            "#,
        );

        assert_eq!(settings.sensor.blades, 5);
        assert_eq!(settings.sensor.window_ms, 500);
        assert!((settings.pid.kp - 0.05).abs() < f64::EPSILON);
        assert!((settings.pid.ki - 0.005).abs() < f64::EPSILON);
        assert_eq!(settings.motor.enable_pin, 12);
        assert_eq!(settings.motor.in1_pin, 23);
        assert_eq!(settings.control.tick_ms, 100);
    }

    #[test]
    fn test_zero_blades_is_rejected() {
        let settings = parse("[sensor]\nblades = 0\n");
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_negative_sim_speed_is_rejected() {
        let mut settings = Settings::default();
        settings.sim.max_rpm = -1.0;
        assert!(settings.validate().is_err());
    }
}
