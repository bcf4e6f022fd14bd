//! Command mediation and control-loop coordination.
//!
//! The [`dispatcher::Dispatcher`] task owns the only copy of the device
//! parameters and the relay output. Everything else (the sensor loop, the
//! relay worker) reaches them through a [`ControllerHandle`], so every
//! mutation is applied one at a time.

pub mod actuation;
pub mod dispatcher;
pub mod sensor_loop;

use std::fmt;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::hardware::Reading;
use crate::params::DeviceParams;

/// Depth of the inbound command queue.
pub const COMMAND_QUEUE_CAPACITY: usize = 100;
/// Depth of the internal request channel.
pub const REQUEST_QUEUE_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Setpoint,
    Period,
    Mode,
    Relay,
    Flash,
}

impl CommandKind {
    pub const ALL: [CommandKind; 5] = [
        CommandKind::Setpoint,
        CommandKind::Period,
        CommandKind::Mode,
        CommandKind::Relay,
        CommandKind::Flash,
    ];

    /// Topic suffix this command arrives on.
    pub fn suffix(self) -> &'static str {
        match self {
            CommandKind::Setpoint => "setpoint",
            CommandKind::Period => "periodo",
            CommandKind::Mode => "modo",
            CommandKind::Relay => "rele",
            CommandKind::Flash => "destello",
        }
    }

    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.suffix() == suffix)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// One inbound command, consumed exactly once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEvent {
    pub kind: CommandKind,
    pub payload: String,
}

/// Telemetry record published every control cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Telemetry {
    #[serde(rename = "temperatura")]
    pub temperature: f64,
    #[serde(rename = "humedad")]
    pub humidity: f64,
    pub setpoint: i64,
    #[serde(rename = "periodo")]
    pub period: i64,
    #[serde(rename = "modo")]
    pub mode: String,
    #[serde(rename = "rele")]
    pub relay: u8,
}

impl Telemetry {
    pub fn new(reading: &Reading, params: &DeviceParams) -> Self {
        Self {
            temperature: reading.temperature,
            humidity: reading.humidity,
            setpoint: params.setpoint,
            period: params.period,
            mode: params.mode.clone(),
            relay: u8::from(params.relay),
        }
    }
}

/// Requests served by the dispatcher on behalf of other tasks.
#[derive(Debug)]
pub enum Request {
    /// Apply the automatic policy for a fresh reading; replies with the
    /// parameters as they stand afterwards.
    Sample {
        reading: Reading,
        reply: oneshot::Sender<DeviceParams>,
    },
    Snapshot {
        reply: oneshot::Sender<DeviceParams>,
    },
    /// Flip the relay. Replies with the new level, or `None` when refused
    /// because the device is in auto mode.
    FlipRelay {
        reply: oneshot::Sender<Option<bool>>,
    },
}

/// Cloneable access to the dispatcher. Every method returns `None` once the
/// dispatcher has stopped.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Request>,
}

impl ControllerHandle {
    pub fn new(tx: mpsc::Sender<Request>) -> Self {
        Self { tx }
    }

    pub async fn sample(&self, reading: Reading) -> Option<DeviceParams> {
        self.call(|reply| Request::Sample { reading, reply }).await
    }

    pub async fn snapshot(&self) -> Option<DeviceParams> {
        self.call(|reply| Request::Snapshot { reply }).await
    }

    pub async fn flip_relay(&self) -> Option<Option<bool>> {
        self.call(|reply| Request::FlipRelay { reply }).await
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Request) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).await.ok()?;
        rx.await.ok()
    }
}
