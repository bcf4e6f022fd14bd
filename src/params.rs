//! Persisted device parameters and the store that keeps them on disk.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Mode value that enables thermostat control of the relay.
pub const AUTO_MODE: &str = "auto";

/// Shortest sampling period honoured by the control loop, in seconds.
pub const MIN_PERIOD_SECS: i64 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceParams {
    pub setpoint: i64,
    #[serde(rename = "periodo")]
    pub period: i64,
    #[serde(rename = "modo")]
    pub mode: String,
    #[serde(rename = "rele", with = "relay_bit")]
    pub relay: bool,
}

impl Default for DeviceParams {
    fn default() -> Self {
        Self {
            setpoint: 25,
            period: 10,
            mode: AUTO_MODE.to_string(),
            relay: false,
        }
    }
}

impl DeviceParams {
    /// Exact, case-sensitive match. Any other mode is manual.
    pub fn is_auto(&self) -> bool {
        self.mode == AUTO_MODE
    }

    pub fn effective_period_secs(&self) -> u64 {
        self.period.max(MIN_PERIOD_SECS) as u64
    }
}

/// The relay is stored as `0|1` on disk.
mod relay_bit {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(D::Error::custom(format!("rele must be 0 or 1, got {other}"))),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed params record: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Whole-record persistence for [`DeviceParams`].
pub trait ParamsStore: Send + 'static {
    /// Load the stored record, falling back to (and persisting) defaults when
    /// it is missing or unreadable.
    fn load(&mut self) -> DeviceParams;

    fn save(&mut self, params: &DeviceParams) -> Result<(), StoreError>;
}

pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> Result<DeviceParams, StoreError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl ParamsStore for JsonFileStore {
    fn load(&mut self) -> DeviceParams {
        match self.read() {
            Ok(params) => {
                info!("Loaded params from {}: {:?}", self.path.display(), params);
                params
            }
            Err(e) => {
                warn!("{}; restoring defaults", e);
                let params = DeviceParams::default();
                if let Err(e) = self.save(&params) {
                    warn!("Failed to persist default params: {}", e);
                }
                params
            }
        }
    }

    fn save(&mut self, params: &DeviceParams) -> Result<(), StoreError> {
        let body = serde_json::to_vec(params)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, body).map_err(|e| self.io_err(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))
    }
}
