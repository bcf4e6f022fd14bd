use std::env;
use std::path::PathBuf;

use crate::identity;

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub device: DeviceSettings,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub client_id: String,
    pub keep_alive_secs: u64,
}

#[derive(Debug, Clone)]
pub struct DeviceSettings {
    /// Uppercase hex identity; first segment of every topic.
    pub device_id: String,
    pub params_file: PathBuf,
    pub sensor_file: PathBuf,
    pub relay_output_file: PathBuf,
    pub indicator_output_file: PathBuf,
}

fn env_required(key: &str) -> Result<String, String> {
    env::var(key).map_err(|_| format!("{key} environment variable is required"))
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    env_optional(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let device_id = match env_optional("DEVICE_ID") {
            Some(id) => id.to_ascii_uppercase(),
            None => {
                let uid_file = env_or_default("DEVICE_UID_FILE", "/etc/machine-id".to_string());
                identity::from_file(&uid_file)?
            }
        };

        let config = Self {
            mqtt: MqttConfig {
                broker_host: env_required("MQTT_BROKER_HOST")?,
                broker_port: env_or_default("MQTT_BROKER_PORT", 1883),
                username: env_optional("MQTT_USERNAME"),
                password: env_optional("MQTT_PASSWORD"),
                use_tls: env_flag("MQTT_TLS"),
                client_id: env_or_default("MQTT_CLIENT_ID", format!("relay-{device_id}")),
                keep_alive_secs: env_or_default("MQTT_KEEP_ALIVE_SECS", 30),
            },
            device: DeviceSettings {
                params_file: env_or_default("PARAMS_FILE", "params.json".to_string()).into(),
                sensor_file: env_required("SENSOR_FILE")?.into(),
                relay_output_file: env_required("RELAY_OUTPUT_FILE")?.into(),
                indicator_output_file: env_required("INDICATOR_OUTPUT_FILE")?.into(),
                device_id,
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.mqtt.broker_host.is_empty() {
            return Err("MQTT_BROKER_HOST must not be empty".into());
        }
        if self.mqtt.keep_alive_secs < 5 {
            return Err("MQTT_KEEP_ALIVE_SECS must be >= 5".into());
        }
        if self.device.device_id.is_empty() {
            return Err("Device identity resolved to an empty string".into());
        }
        if self.device.device_id.contains(['/', '+', '#']) {
            return Err(format!(
                "Device identity {:?} is not a valid topic segment",
                self.device.device_id
            ));
        }
        Ok(())
    }
}
