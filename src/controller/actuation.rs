//! Relay toggle and indicator blink workers.
//!
//! Each worker drains its own job queue one job at a time, so jobs never
//! overlap and their lifetimes are bounded by the worker task.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::hardware::Output;

use super::ControllerHandle;

/// Hold after a relay flip before the next one is taken.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);
/// Length of each on and off phase of a blink.
pub const BLINK_PHASE: Duration = Duration::from_millis(500);
pub const BLINK_CYCLES: usize = 5;

/// Depth of each worker's job queue. Jobs beyond this are dropped.
pub const JOB_QUEUE_CAPACITY: usize = 16;

#[derive(Debug)]
pub struct RelayJob;

#[derive(Debug)]
pub struct BlinkJob;

/// Senders the dispatcher uses to hand off actuation work.
#[derive(Debug, Clone)]
pub struct Actuators {
    pub relay: mpsc::Sender<RelayJob>,
    pub blink: mpsc::Sender<BlinkJob>,
}

impl Actuators {
    pub fn request_toggle(&self) {
        if let Err(e) = self.relay.try_send(RelayJob) {
            warn!("Dropping relay toggle: {}", e);
        }
    }

    pub fn request_blink(&self) {
        if let Err(e) = self.blink.try_send(BlinkJob) {
            warn!("Dropping blink: {}", e);
        }
    }
}

/// Serially flip the relay through the dispatcher, holding [`SETTLE_DELAY`]
/// after each flip.
pub async fn run_relay_worker(controller: ControllerHandle, mut jobs: mpsc::Receiver<RelayJob>) {
    while let Some(RelayJob) = jobs.recv().await {
        match controller.flip_relay().await {
            Some(Some(level)) => {
                info!("Relay toggled {}", if level { "on" } else { "off" });
                sleep(SETTLE_DELAY).await;
            }
            Some(None) => info!("Relay toggle refused, device is in auto mode"),
            None => {
                warn!("Dispatcher stopped, relay worker exiting");
                return;
            }
        }
    }
}

pub async fn run_blink_worker(mut indicator: Box<dyn Output>, mut jobs: mpsc::Receiver<BlinkJob>) {
    while let Some(BlinkJob) = jobs.recv().await {
        blink(indicator.as_mut()).await;
    }
}

async fn blink(indicator: &mut dyn Output) {
    for _ in 0..BLINK_CYCLES {
        for level in [true, false] {
            if let Err(e) = indicator.set(level) {
                warn!("Indicator write failed: {}", e);
            }
            sleep(BLINK_PHASE).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Request;
    use crate::hardware::fakes::RecordingOutput;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn blink_runs_five_cycles() {
        let indicator = RecordingOutput::default();
        let (tx, rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
        let worker = tokio::spawn(run_blink_worker(Box::new(indicator.clone()), rx));

        let start = Instant::now();
        tx.send(BlinkJob).await.unwrap();
        drop(tx);
        worker.await.unwrap();

        assert_eq!(indicator.writes(), [true, false].repeat(BLINK_CYCLES));
        let expected = BLINK_PHASE * 2 * BLINK_CYCLES as u32;
        let elapsed = start.elapsed();
        assert!(elapsed >= expected && elapsed < expected + Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn relay_worker_spaces_flips_by_settle_delay() {
        let (req_tx, mut req_rx) = mpsc::channel(4);
        let (job_tx, job_rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
        let worker = tokio::spawn(run_relay_worker(ControllerHandle::new(req_tx), job_rx));

        job_tx.send(RelayJob).await.unwrap();
        job_tx.send(RelayJob).await.unwrap();
        drop(job_tx);

        let mut flip_times = Vec::new();
        let start = Instant::now();
        let mut level = false;
        while let Some(req) = req_rx.recv().await {
            let reply = match req {
                Request::FlipRelay { reply } => reply,
                other => panic!("unexpected request {other:?}"),
            };
            flip_times.push(start.elapsed());
            level = !level;
            reply.send(Some(level)).unwrap();
        }
        worker.await.unwrap();

        assert_eq!(flip_times.len(), 2);
        assert!(flip_times[0] < Duration::from_millis(10));
        assert!(flip_times[1] - flip_times[0] >= SETTLE_DELAY);
    }

    #[test]
    fn jobs_beyond_capacity_are_dropped() {
        let (relay, mut relay_rx) = mpsc::channel(1);
        let (blink, mut blink_rx) = mpsc::channel(1);
        let actuators = Actuators { relay, blink };
        actuators.request_toggle();
        actuators.request_toggle();
        actuators.request_blink();
        actuators.request_blink();

        assert!(relay_rx.try_recv().is_ok());
        assert!(relay_rx.try_recv().is_err());
        assert!(blink_rx.try_recv().is_ok());
        assert!(blink_rx.try_recv().is_err());
    }
}
