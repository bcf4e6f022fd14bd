use std::time::Duration;

use rumqttc::{
    AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS, SubscribeFilter, Transport,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;
use crate::controller::CommandEvent;

use super::{Outbound, Topics};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Depth of rumqttc's request buffer between `AsyncClient` and the event loop.
const REQUEST_CAPACITY: usize = 100;

pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
    topics: Topics,
    reconnect_delay: Duration,
}

impl MqttClient {
    pub fn new(config: &MqttConfig, topics: Topics) -> Self {
        let mut mqttopts =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        mqttopts.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            mqttopts.set_credentials(user, pass);
        }
        if config.use_tls {
            mqttopts.set_transport(Transport::tls_with_default_config());
        }

        let (client, eventloop) = AsyncClient::new(mqttopts, REQUEST_CAPACITY);

        Self {
            client,
            eventloop,
            topics,
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    /// Handle for the publisher task.
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    /// Run the MQTT event loop. Subscribes to command topics on every connect,
    /// reports connection state through `connected`, and forwards incoming
    /// command publishes to the command queue in arrival order.
    ///
    /// The client is never awaited from here: only `poll()` frees space in the
    /// request buffer, so a blocking call would stall the loop for good.
    /// Returns only once the command queue has been closed.
    pub async fn run(mut self, command_tx: mpsc::Sender<CommandEvent>, connected: watch::Sender<bool>) {
        let filters: Vec<SubscribeFilter> = self
            .topics
            .subscriptions()
            .into_iter()
            .map(|topic| SubscribeFilter::new(topic, QoS::AtLeastOnce))
            .collect();
        let mut subscribe_pending = false;

        loop {
            if subscribe_pending {
                subscribe_pending = !self.try_subscribe(&filters);
            }

            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("Connected to MQTT broker");
                    connected.send_replace(true);
                    subscribe_pending = !self.try_subscribe(&filters);
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    let payload = String::from_utf8_lossy(&publish.payload).to_string();
                    let Some(kind) = self.topics.parse_command(&publish.topic) else {
                        warn!("Ignoring publish on unexpected topic {}", publish.topic);
                        continue;
                    };
                    debug!("Received {}: {:?} (retain={})", publish.topic, payload, publish.retain);
                    if command_tx.send(CommandEvent { kind, payload }).await.is_err() {
                        warn!("Command queue closed");
                        return;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    connected.send_replace(false);
                    error!("MQTT connection error: {}. Reconnecting...", e);
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }
        }
    }

    /// Queue the command subscriptions. Returns `false` when the request
    /// buffer is full; the caller retries after the next poll.
    fn try_subscribe(&self, filters: &[SubscribeFilter]) -> bool {
        match self.client.try_subscribe_many(filters.to_vec()) {
            Ok(()) => {
                info!("Subscribed to {} command topics", filters.len());
                true
            }
            Err(e) => {
                warn!("Subscribe deferred: {}", e);
                false
            }
        }
    }
}

/// Drain publish requests from the controller into the MQTT client.
///
/// Runs apart from the event loop, and only hands messages over while the
/// broker is connected so an outage cannot fill the request buffer.
pub async fn run_publisher(
    client: AsyncClient,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    mut connected: watch::Receiver<bool>,
) {
    while let Some(msg) = outbound_rx.recv().await {
        if connected.wait_for(|up| *up).await.is_err() {
            info!("Connection watch closed, publisher stopping");
            return;
        }
        debug!("Publishing {}: {}", msg.topic, msg.payload);
        if let Err(e) = client
            .publish(&msg.topic, msg.qos, msg.retain, msg.payload.into_bytes())
            .await
        {
            warn!("Failed to publish {}: {}", msg.topic, e);
        }
    }
    info!("Outbound channel closed, publisher stopping");
}
