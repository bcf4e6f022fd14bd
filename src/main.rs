mod config;
mod controller;
mod hardware;
mod identity;
mod mqtt;
mod params;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info};

use controller::actuation::{self, Actuators, JOB_QUEUE_CAPACITY};
use controller::dispatcher::Dispatcher;
use controller::sensor_loop::SensorLoop;
use controller::{COMMAND_QUEUE_CAPACITY, ControllerHandle, REQUEST_QUEUE_CAPACITY};
use hardware::file::{FileSensor, ValueFileOutput};
use params::JsonFileStore;

const OUTBOUND_QUEUE_CAPACITY: usize = 32;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting relay controller (device={}, mqtt={}:{}, params={})",
        config.device.device_id,
        config.mqtt.broker_host,
        config.mqtt.broker_port,
        config.device.params_file.display(),
    );

    let topics = mqtt::Topics::new(config.device.device_id.clone());

    // Channels
    let (command_tx, command_rx) = mpsc::channel::<controller::CommandEvent>(COMMAND_QUEUE_CAPACITY);
    let (request_tx, request_rx) = mpsc::channel::<controller::Request>(REQUEST_QUEUE_CAPACITY);
    let (outbound_tx, outbound_rx) = mpsc::channel::<mqtt::Outbound>(OUTBOUND_QUEUE_CAPACITY);
    let (relay_job_tx, relay_job_rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
    let (blink_job_tx, blink_job_rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
    let (connected_tx, connected_rx) = watch::channel(false);

    let controller = ControllerHandle::new(request_tx);

    // Loads params and restores the relay before anything else runs.
    let dispatcher = Dispatcher::new(
        Box::new(JsonFileStore::new(&config.device.params_file)),
        Box::new(ValueFileOutput::new(&config.device.relay_output_file)),
        topics.clone(),
        outbound_tx.clone(),
        Actuators {
            relay: relay_job_tx,
            blink: blink_job_tx,
        },
    );

    let sensor_loop = SensorLoop::new(
        Box::new(FileSensor::new(&config.device.sensor_file)),
        controller.clone(),
        outbound_tx,
        topics.clone(),
    );
    let indicator = Box::new(ValueFileOutput::new(&config.device.indicator_output_file));

    let mqtt_client = mqtt::client::MqttClient::new(&config.mqtt, topics);
    let publisher = mqtt_client.client();
    let publisher_connected = connected_rx.clone();

    // Every task here is expected to run for the life of the process.
    let mut tasks = JoinSet::new();
    tasks.spawn(async move {
        mqtt_client.run(command_tx, connected_tx).await;
        "mqtt event loop"
    });
    tasks.spawn(async move {
        mqtt::client::run_publisher(publisher, outbound_rx, publisher_connected).await;
        "mqtt publisher"
    });
    tasks.spawn(async move {
        dispatcher.run(command_rx, request_rx).await;
        "dispatcher"
    });
    tasks.spawn(async move {
        actuation::run_relay_worker(controller, relay_job_rx).await;
        "relay worker"
    });
    tasks.spawn(async move {
        actuation::run_blink_worker(indicator, blink_job_rx).await;
        "blink worker"
    });
    tasks.spawn(async move {
        sensor_loop.run(connected_rx).await;
        "sensor loop"
    });

    let exit_code = tokio::select! {
        Some(joined) = tasks.join_next() => {
            match joined {
                Ok(name) => error!("Task {} exited unexpectedly", name),
                Err(e) => error!("Task failed: {}", e),
            }
            1
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down");
            0
        }
        _ = async {
            let mut sigterm = tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate()
            ).expect("Failed to register SIGTERM handler");
            sigterm.recv().await;
        } => {
            info!("Received SIGTERM, shutting down");
            0
        }
    };

    tasks.shutdown().await;
    info!("relay controller stopped");
    std::process::exit(exit_code);
}
