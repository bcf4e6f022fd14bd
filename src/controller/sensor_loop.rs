use std::time::Duration;

use rumqttc::QoS;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::hardware::Sensor;
use crate::mqtt::{Outbound, Topics};

use super::{ControllerHandle, Telemetry};

/// Pause between the first broker connection and the first sample.
pub const STARTUP_DELAY: Duration = Duration::from_secs(2);

pub struct SensorLoop {
    sensor: Box<dyn Sensor>,
    controller: ControllerHandle,
    outbound: mpsc::Sender<Outbound>,
    topics: Topics,
}

impl SensorLoop {
    pub fn new(
        sensor: Box<dyn Sensor>,
        controller: ControllerHandle,
        outbound: mpsc::Sender<Outbound>,
        topics: Topics,
    ) -> Self {
        Self {
            sensor,
            controller,
            outbound,
            topics,
        }
    }

    /// Wait for the broker, then sample forever. Returns only when the
    /// dispatcher or the publisher has gone away.
    pub async fn run(mut self, mut connected: watch::Receiver<bool>) {
        if connected.wait_for(|up| *up).await.is_err() {
            warn!("Connection watch closed before first connect");
            return;
        }
        sleep(STARTUP_DELAY).await;
        info!("Sensor loop started");

        while let Some(pause) = self.cycle().await {
            sleep(pause).await;
        }
        warn!("Sensor loop stopping");
    }

    /// One sample/actuate/publish pass. Returns the pause before the next one.
    async fn cycle(&mut self) -> Option<Duration> {
        let params = match self.sensor.measure() {
            Ok(reading) => {
                let params = self.controller.sample(reading).await?;
                self.publish(Telemetry::new(&reading, &params))?;
                params
            }
            Err(e) => {
                warn!("Sensor read failed: {}", e);
                self.controller.snapshot().await?
            }
        };
        Some(Duration::from_secs(params.effective_period_secs()))
    }

    /// Queue telemetry without waiting, so the control policy keeps running
    /// while the broker is unreachable. Returns `None` once the publisher is gone.
    fn publish(&self, telemetry: Telemetry) -> Option<()> {
        let payload = match serde_json::to_string(&telemetry) {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to encode telemetry: {}", e);
                return Some(());
            }
        };
        info!("Publishing telemetry: {}", payload);
        let msg = Outbound {
            topic: self.topics.telemetry(),
            payload,
            qos: QoS::AtLeastOnce,
            retain: false,
        };
        match self.outbound.try_send(msg) {
            Ok(()) => Some(()),
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue full, dropping telemetry");
                Some(())
            }
            Err(TrySendError::Closed(_)) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::actuation::Actuators;
    use crate::controller::dispatcher::Dispatcher;
    use crate::controller::{CommandEvent, CommandKind};
    use crate::hardware::fakes::{reading, RecordingOutput, ScriptedSensor};
    use crate::params::tests::MemoryStore;
    use crate::params::DeviceParams;
    use tokio::time::Instant;

    struct Rig {
        commands: mpsc::Sender<CommandEvent>,
        outbound_rx: mpsc::Receiver<Outbound>,
        relay: RecordingOutput,
        connected: watch::Sender<bool>,
    }

    type Script = Vec<Result<crate::hardware::Reading, String>>;

    fn rig(params: DeviceParams, script: Script) -> Rig {
        rig_with_outbound(params, script, 32)
    }

    fn rig_with_outbound(params: DeviceParams, script: Script, outbound_capacity: usize) -> Rig {
        let topics = Topics::new("DEV01");
        let relay = RecordingOutput::default();
        let (outbound, outbound_rx) = mpsc::channel(outbound_capacity);
        let (relay_tx, _relay_rx) = mpsc::channel(1);
        let (blink_tx, _blink_rx) = mpsc::channel(1);
        let (commands, command_rx) = mpsc::channel(8);
        let (request_tx, request_rx) = mpsc::channel(8);
        let (connected, connected_rx) = watch::channel(false);

        let dispatcher = Dispatcher::new(
            Box::new(MemoryStore::with(params)),
            Box::new(relay.clone()),
            topics.clone(),
            outbound.clone(),
            Actuators {
                relay: relay_tx,
                blink: blink_tx,
            },
        );
        tokio::spawn(dispatcher.run(command_rx, request_rx));

        let sensor_loop = SensorLoop::new(
            Box::new(ScriptedSensor::new(script)),
            ControllerHandle::new(request_tx),
            outbound,
            topics,
        );
        tokio::spawn(sensor_loop.run(connected_rx));

        Rig {
            commands,
            outbound_rx,
            relay,
            connected,
        }
    }

    fn telemetry(msg: &Outbound) -> serde_json::Value {
        assert_eq!(msg.topic, "DEV01/mediciones");
        assert_eq!(msg.qos, QoS::AtLeastOnce);
        serde_json::from_str(&msg.payload).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_connection_then_startup_delay() {
        let mut rig = rig(DeviceParams::default(), vec![Ok(reading(20.0))]);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rig.outbound_rx.try_recv().is_err());

        let connected_at = Instant::now();
        rig.connected.send_replace(true);
        rig.outbound_rx.recv().await.unwrap();
        assert!(connected_at.elapsed() >= STARTUP_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn cold_reading_turns_relay_on_in_auto() {
        let mut rig = rig(DeviceParams::default(), vec![Ok(reading(20.0))]);
        rig.connected.send_replace(true);

        let first = telemetry(&rig.outbound_rx.recv().await.unwrap());
        assert_eq!(first["rele"], 1);
        assert_eq!(first["temperatura"], 20.0);
        assert_eq!(first["modo"], "auto");
        assert_eq!(rig.relay.level(), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn lowered_setpoint_turns_relay_off_next_cycle() {
        let mut rig = rig(DeviceParams::default(), vec![Ok(reading(20.0))]);
        rig.connected.send_replace(true);
        assert_eq!(telemetry(&rig.outbound_rx.recv().await.unwrap())["rele"], 1);

        rig.commands
            .send(CommandEvent {
                kind: CommandKind::Setpoint,
                payload: "18".into(),
            })
            .await
            .unwrap();

        let next = telemetry(&rig.outbound_rx.recv().await.unwrap());
        assert_eq!(next["setpoint"], 18);
        assert_eq!(next["rele"], 0);
        assert_eq!(rig.relay.level(), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn sensor_faults_skip_the_cycle_only() {
        let mut rig = rig(
            DeviceParams::default(),
            vec![Err("checksum".into()), Err("timeout".into()), Ok(reading(30.0))],
        );
        rig.connected.send_replace(true);

        let started = Instant::now();
        let msg = telemetry(&rig.outbound_rx.recv().await.unwrap());
        assert_eq!(msg["temperatura"], 30.0);
        // Two failed cycles, each followed by the default 10 s period.
        assert!(started.elapsed() >= STARTUP_DELAY + Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_mode_leaves_relay_alone() {
        let params = DeviceParams {
            mode: "manual".into(),
            relay: true,
            ..DeviceParams::default()
        };
        let mut rig = rig(params, vec![Ok(reading(40.0))]);
        rig.connected.send_replace(true);

        let msg = telemetry(&rig.outbound_rx.recv().await.unwrap());
        assert_eq!(msg["rele"], 1);
        assert_eq!(rig.relay.writes(), vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn short_period_is_floored() {
        let params = DeviceParams {
            period: 0,
            ..DeviceParams::default()
        };
        let mut rig = rig(params, vec![Ok(reading(20.0))]);
        rig.connected.send_replace(true);

        rig.outbound_rx.recv().await.unwrap();
        let first = Instant::now();
        rig.outbound_rx.recv().await.unwrap();
        assert!(first.elapsed() >= Duration::from_secs(2));
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn run_future_is_send() {
        let (request_tx, _request_rx) = mpsc::channel(1);
        let (outbound, _outbound_rx) = mpsc::channel(1);
        let (_connected, connected_rx) = watch::channel(false);
        let sensor_loop = SensorLoop::new(
            Box::new(ScriptedSensor::new(vec![])),
            ControllerHandle::new(request_tx),
            outbound,
            Topics::new("DEV01"),
        );
        assert_send(&sensor_loop.run(connected_rx));
    }

    #[tokio::test(start_paused = true)]
    async fn control_continues_while_outbound_is_backed_up() {
        let rig = rig_with_outbound(
            DeviceParams::default(),
            vec![Ok(reading(20.0)), Ok(reading(30.0)), Ok(reading(20.0))],
            1,
        );
        rig.connected.send_replace(true);

        // Nobody drains the outbound queue: cycles at 2 s, 12 s and 22 s.
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(rig.relay.writes(), vec![false, true, false, true]);
    }
}
