pub mod file;

use thiserror::Error;

/// One temperature/humidity measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature: f64,
    pub humidity: f64,
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Sensor read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unparsable sensor sample: {0:?}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("Output write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Temperature/humidity sensor. Faults are transient; callers retry next cycle.
pub trait Sensor: Send + 'static {
    fn measure(&mut self) -> Result<Reading, SensorError>;
}

/// A single digital output (relay coil, indicator LED).
pub trait Output: Send + 'static {
    fn set(&mut self, on: bool) -> Result<(), HardwareError>;
}
