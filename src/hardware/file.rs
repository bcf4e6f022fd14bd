//! File-backed hardware adapters: a sensor sample file written by an external
//! driver and sysfs-style GPIO `value` files.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::debug;

use super::{HardwareError, Output, Reading, Sensor, SensorError};

#[derive(Deserialize)]
struct RawSample {
    temperature: f64,
    humidity: f64,
}

pub struct FileSensor {
    path: PathBuf,
}

impl FileSensor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Sensor for FileSensor {
    fn measure(&mut self) -> Result<Reading, SensorError> {
        let content = std::fs::read_to_string(&self.path)?;
        parse_sample(&content)
    }
}

/// Accepts `{"temperature": t, "humidity": h}` or `t h`.
fn parse_sample(content: &str) -> Result<Reading, SensorError> {
    let trimmed = content.trim();
    if trimmed.starts_with('{') {
        let raw: RawSample = serde_json::from_str(trimmed)
            .map_err(|e| SensorError::Parse(format!("{trimmed}: {e}")))?;
        return finite(raw.temperature, raw.humidity, trimmed);
    }

    let mut fields = trimmed.split_whitespace().map(str::parse::<f64>);
    match (fields.next(), fields.next(), fields.next()) {
        (Some(Ok(t)), Some(Ok(h)), None) => finite(t, h, trimmed),
        _ => Err(SensorError::Parse(trimmed.to_string())),
    }
}

fn finite(temperature: f64, humidity: f64, raw: &str) -> Result<Reading, SensorError> {
    if !temperature.is_finite() || !humidity.is_finite() {
        return Err(SensorError::Parse(raw.to_string()));
    }
    Ok(Reading {
        temperature,
        humidity,
    })
}

/// Writes `1`/`0` to a value file.
pub struct ValueFileOutput {
    path: PathBuf,
}

impl ValueFileOutput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Output for ValueFileOutput {
    fn set(&mut self, on: bool) -> Result<(), HardwareError> {
        debug!("{} <- {}", self.path.display(), u8::from(on));
        std::fs::write(&self.path, if on { "1" } else { "0" })?;
        Ok(())
    }
}
