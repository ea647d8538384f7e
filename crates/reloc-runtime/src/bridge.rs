//! Bus bridges feeding the relocalization pipeline.
//!
//! - [`spawn_observation_pump`] moves `MarkerObserved` events from the bus
//!   into the single-consumer [`ObservationQueue`].
//! - [`spawn_transform_listener`] keeps a [`SharedTfBuffer`] up to date from
//!   `TransformUpdate` events.
//!
//! Both stop when the shutdown flag flips to `true` (or its sender is
//! dropped), after handling whatever was already buffered, or when the bus
//! itself closes.  Each returns the number of events it consumed.

use std::future::Future;

use reloc_middleware::{EventBus, Topic, TopicReceiver};
use reloc_perception::SharedTfBuffer;
use reloc_types::{Event, EventPayload};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::worker::ObservationQueue;

pub fn spawn_observation_pump(
    bus: &EventBus,
    queue: ObservationQueue,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<u64> {
    let rx = bus.subscribe_to(Topic::MarkerObservations);
    tokio::spawn(consume(rx, shutdown, move |event| {
        let queue = queue.clone();
        async move {
            match event.payload {
                EventPayload::MarkerObserved(observation) => queue.submit(observation).await.is_ok(),
                _ => true,
            }
        }
    }))
}

pub fn spawn_transform_listener(
    bus: &EventBus,
    buffer: SharedTfBuffer,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<u64> {
    let rx = bus.subscribe_to(Topic::Transforms);
    tokio::spawn(consume(rx, shutdown, move |event| {
        let buffer = buffer.clone();
        async move {
            if let EventPayload::TransformUpdate { transform, is_static } = event.payload
                && let Err(e) = buffer.insert(&transform, is_static).await
            {
                warn!(
                    error = %e,
                    source_frame = %transform.source_frame,
                    target_frame = %transform.target_frame,
                    "rejected transform update"
                );
            }
            true
        }
    }))
}

/// Feed every event on `rx` to `handle` until shutdown, bus closure, or
/// `handle` returning `false`.
async fn consume<F, Fut>(mut rx: TopicReceiver, mut shutdown: watch::Receiver<bool>, mut handle: F) -> u64
where
    F: FnMut(Event) -> Fut,
    Fut: Future<Output = bool>,
{
    let topic = rx.topic();
    let mut consumed = 0;
    loop {
        tokio::select! {
            biased;
            received = rx.recv() => match received {
                Ok(event) => {
                    consumed += 1;
                    if !handle(event).await {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(?topic, lagged_by = n, "bridge fell behind; events lost");
                }
                Err(RecvError::Closed) => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    loop {
                        match rx.try_recv() {
                            Ok(event) => {
                                consumed += 1;
                                if !handle(event).await {
                                    break;
                                }
                            }
                            Err(TryRecvError::Lagged(n)) => {
                                warn!(?topic, lagged_by = n, "bridge fell behind; events lost");
                            }
                            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                        }
                    }
                    break;
                }
            }
        }
    }
    debug!(?topic, consumed, "bridge stopped");
    consumed
}
