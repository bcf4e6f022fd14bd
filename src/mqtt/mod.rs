pub mod client;

use rumqttc::QoS;

use crate::controller::CommandKind;

/// Periodic sensor telemetry.
pub const TELEMETRY_SUFFIX: &str = "mediciones";
/// Echo of `destello` payloads.
pub const STATUS_SUFFIX: &str = "estado";

/// Topic namespace rooted at the device identity.
#[derive(Debug, Clone)]
pub struct Topics {
    device_id: String,
}

impl Topics {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }

    pub fn command(&self, kind: CommandKind) -> String {
        format!("{}/{}", self.device_id, kind.suffix())
    }

    pub fn subscriptions(&self) -> Vec<String> {
        CommandKind::ALL.iter().map(|k| self.command(*k)).collect()
    }

    pub fn telemetry(&self) -> String {
        format!("{}/{}", self.device_id, TELEMETRY_SUFFIX)
    }

    pub fn status(&self) -> String {
        format!("{}/{}", self.device_id, STATUS_SUFFIX)
    }

    /// Parse an inbound topic: `{device_id}/{suffix}`.
    pub fn parse_command(&self, topic: &str) -> Option<CommandKind> {
        let suffix = topic.strip_prefix(&self.device_id)?.strip_prefix('/')?;
        CommandKind::from_suffix(suffix)
    }
}

/// A publish request handed from the controller to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}
