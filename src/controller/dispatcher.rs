use rumqttc::QoS;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::hardware::{Output, Reading};
use crate::mqtt::{Outbound, Topics};
use crate::params::{DeviceParams, ParamsStore};

use super::actuation::Actuators;
use super::{CommandEvent, CommandKind, Request};

/// Commands applied back to back before a waiting request gets a turn.
pub const COMMAND_BURST: usize = 16;

/// Sole owner of the device parameters and the relay output.
pub struct Dispatcher {
    params: DeviceParams,
    store: Box<dyn ParamsStore>,
    relay: Box<dyn Output>,
    topics: Topics,
    outbound: mpsc::Sender<Outbound>,
    actuators: Actuators,
}

impl Dispatcher {
    /// Load the persisted parameters and drive the relay to the stored level.
    pub fn new(
        mut store: Box<dyn ParamsStore>,
        relay: Box<dyn Output>,
        topics: Topics,
        outbound: mpsc::Sender<Outbound>,
        actuators: Actuators,
    ) -> Self {
        let params = store.load();
        let mut dispatcher = Self {
            params,
            store,
            relay,
            topics,
            outbound,
            actuators,
        };
        dispatcher.write_relay();
        dispatcher
    }

    /// Serve commands and requests until the command queue closes.
    ///
    /// Queued commands take priority, so a request observes every command
    /// received before it. After [`COMMAND_BURST`] commands in a row a waiting
    /// request is served, so a command flood cannot stall the sensor loop or
    /// the relay worker.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<CommandEvent>,
        mut requests: mpsc::Receiver<Request>,
    ) {
        info!("Dispatcher started with {:?}", self.params);
        let mut burst = 0;
        loop {
            if burst >= COMMAND_BURST {
                burst = 0;
                if let Ok(request) = requests.try_recv() {
                    self.handle_request(request);
                    continue;
                }
            }
            tokio::select! {
                biased;
                event = commands.recv() => match event {
                    Some(event) => {
                        burst += 1;
                        self.handle_command(event);
                    }
                    None => {
                        info!("Command queue closed, dispatcher stopping");
                        return;
                    }
                },
                Some(request) = requests.recv() => {
                    burst = 0;
                    self.handle_request(request);
                }
            }
        }
    }

    pub fn handle_command(&mut self, event: CommandEvent) {
        info!("Processing {} -> {:?}", event.kind, event.payload);
        match event.kind {
            CommandKind::Setpoint => match parse_int(&event.payload) {
                Some(value) => {
                    self.params.setpoint = value;
                    self.persist();
                }
                None => warn!("Ignoring non-numeric setpoint {:?}", event.payload),
            },
            CommandKind::Period => match parse_int(&event.payload) {
                Some(value) => {
                    self.params.period = value;
                    self.persist();
                }
                None => warn!("Ignoring non-numeric period {:?}", event.payload),
            },
            CommandKind::Mode => {
                self.params.mode = event.payload;
                self.persist();
            }
            CommandKind::Relay => {
                if self.params.is_auto() {
                    info!("Ignoring relay command in auto mode");
                } else {
                    self.actuators.request_toggle();
                }
            }
            CommandKind::Flash => {
                if event.payload == "true" {
                    self.actuators.request_blink();
                }
                let echo = Outbound {
                    topic: self.topics.status(),
                    payload: event.payload,
                    qos: QoS::AtMostOnce,
                    retain: false,
                };
                if let Err(e) = self.outbound.try_send(echo) {
                    warn!("Dropping status echo: {}", e);
                }
            }
        }
    }

    pub fn handle_request(&mut self, request: Request) {
        match request {
            Request::Sample { reading, reply } => {
                self.apply_auto(&reading);
                let _ = reply.send(self.params.clone());
            }
            Request::Snapshot { reply } => {
                let _ = reply.send(self.params.clone());
            }
            Request::FlipRelay { reply } => {
                let _ = reply.send(self.flip_relay());
            }
        }
    }

    /// Thermostat policy. The level is rewritten every cycle so drift from
    /// any other path is corrected.
    fn apply_auto(&mut self, reading: &Reading) {
        if !self.params.is_auto() {
            return;
        }
        let on = reading.temperature < self.params.setpoint as f64;
        if self.params.relay != on {
            info!(
                "Auto: {:.1} vs setpoint {} -> relay {}",
                reading.temperature,
                self.params.setpoint,
                if on { "on" } else { "off" }
            );
            self.params.relay = on;
            self.persist();
        }
        self.write_relay();
    }

    /// The mode is checked again here: a toggle queued in manual mode must not
    /// fight the thermostat if the device has since gone back to auto.
    fn flip_relay(&mut self) -> Option<bool> {
        if self.params.is_auto() {
            return None;
        }
        self.params.relay = !self.params.relay;
        self.write_relay();
        self.persist();
        Some(self.params.relay)
    }

    fn write_relay(&mut self) {
        if let Err(e) = self.relay.set(self.params.relay) {
            error!("Relay write failed: {}", e);
        }
    }

    fn persist(&mut self) {
        if let Err(e) = self.store.save(&self.params) {
            error!("Failed to persist params: {}", e);
        }
    }
}

/// Integer payloads may carry surrounding whitespace; anything else is rejected.
fn parse_int(payload: &str) -> Option<i64> {
    payload.trim().parse().ok()
}
