//! Single-consumer observation queue.
//!
//! Any number of producers hold an [`ObservationQueue`]; exactly one worker
//! task owns the [`RelocEngine`] and drains the queue in arrival order, so the
//! correction for observation *N* is emitted (or abandoned) before *N + 1*
//! is looked at.  The worker exits once every queue handle is dropped and the
//! backlog is empty.

use reloc_middleware::PoseSink;
use reloc_perception::TransformProvider;
use reloc_types::{MarkerObservation, RelocError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::engine::{Outcome, RelocEngine};

pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Producer handle for the relocalization worker.  Clone freely.
#[derive(Clone, Debug)]
pub struct ObservationQueue {
    tx: mpsc::Sender<MarkerObservation>,
}

impl ObservationQueue {
    /// Enqueue `observation`, waiting for room when the queue is full.
    pub async fn submit(&self, observation: MarkerObservation) -> Result<(), RelocError> {
        self.tx
            .send(observation)
            .await
            .map_err(|_| RelocError::Channel("relocalization worker has stopped".to_string()))
    }

    /// Enqueue without waiting; a full queue drops the observation.
    pub fn try_submit(&self, observation: MarkerObservation) -> Result<(), RelocError> {
        match self.tx.try_send(observation) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(dropped)) => {
                warn!(marker_id = dropped.marker_id, "observation queue full; dropping observation");
                Err(RelocError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(RelocError::Channel(
                "relocalization worker has stopped".to_string(),
            )),
        }
    }
}

/// Per-outcome counters reported when the worker stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub received: u64,
    pub emitted: u64,
    pub discarded: u64,
    pub dropped: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: &Outcome) {
        self.received += 1;
        match outcome {
            Outcome::Emitted(_) => self.emitted += 1,
            Outcome::Discarded { .. } => self.discarded += 1,
            Outcome::Dropped(_) => self.dropped += 1,
        }
    }
}

/// Move `engine` onto its own task behind a queue of `capacity` observations.
pub fn spawn_worker<P, S>(
    engine: RelocEngine<P, S>,
    capacity: usize,
) -> (ObservationQueue, JoinHandle<WorkerStats>)
where
    P: TransformProvider + 'static,
    S: PoseSink + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::spawn(run(engine, rx));
    (ObservationQueue { tx }, handle)
}

async fn run<P, S>(engine: RelocEngine<P, S>, mut rx: mpsc::Receiver<MarkerObservation>) -> WorkerStats
where
    P: TransformProvider,
    S: PoseSink,
{
    info!(
        markers = engine.config().calibration.len(),
        body_frame = %engine.config().body_frame,
        "relocalization worker ready"
    );
    let mut stats = WorkerStats::default();
    while let Some(observation) = rx.recv().await {
        let outcome = engine.on_marker_observed(observation).await;
        stats.record(&outcome);
    }
    info!(
        received = stats.received,
        emitted = stats.emitted,
        discarded = stats.discarded,
        dropped = stats.dropped,
        "relocalization worker stopped"
    );
    stats
}
