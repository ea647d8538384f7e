//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::MarkerObservations`] | Marker detections from the vision pipeline |
//! | [`Topic::Transforms`] | Frame-graph updates (odometry, extrinsics, corrections) |
//! | [`Topic::PoseCorrections`] | Relocalization commands for the pose estimator |

use reloc_types::{Event, RelocError};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    MarkerObservations,
    Transforms,
    PoseCorrections,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    marker_observations: broadcast::Sender<Event>,
    transforms: broadcast::Sender<Event>,
    pose_corrections: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus; `capacity` applies to every topic independently.
    pub fn new(capacity: usize) -> Self {
        let (marker_observations, _) = broadcast::channel(capacity);
        let (transforms, _) = broadcast::channel(capacity);
        let (pose_corrections, _) = broadcast::channel(capacity);
        Self {
            marker_observations,
            transforms,
            pose_corrections,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event, or
    /// [`RelocError::Channel`] when nobody is listening on the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, RelocError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| RelocError::Channel(format!("no subscribers for topic {topic:?}")))
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::MarkerObservations => &self.marker_observations,
            Topic::Transforms => &self.transforms,
            Topic::PoseCorrections => &self.pose_corrections,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(RecvError::Lagged(n))` – the subscriber fell behind and `n`
    ///   messages were dropped.
    /// * `Err(RecvError::Closed)` – every bus handle has been dropped.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Take an already-buffered event without waiting.
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reloc_types::{EventPayload, MarkerObservation};

    fn make_event(marker_id: u32) -> Event {
        Event::new(
            "reloc-middleware::test",
            EventPayload::MarkerObserved(MarkerObservation {
                marker_id,
                frame_id: format!("marker_{marker_id}"),
                timestamp: Utc::now(),
            }),
        )
    }

    #[test]
    fn publish_without_subscribers_returns_error() {
        let bus = EventBus::default();
        let result = bus.publish_to(Topic::PoseCorrections, make_event(11));
        assert!(matches!(result, Err(RelocError::Channel(_))));
    }

    #[tokio::test]
    async fn topic_multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut subscriber1 = bus.subscribe_to(Topic::MarkerObservations);
        let mut subscriber2 = bus.subscribe_to(Topic::MarkerObservations);
        assert_eq!(bus.subscriber_count(Topic::MarkerObservations), 2);

        let event = make_event(11);
        assert_eq!(bus.publish_to(Topic::MarkerObservations, event.clone())?, 2);

        assert_eq!(subscriber1.recv().await?.id, event.id);
        assert_eq!(subscriber2.recv().await?.id, event.id);
        assert_eq!(subscriber1.topic(), Topic::MarkerObservations);
        Ok(())
    }

    /// A subscriber on `PoseCorrections` must not receive marker events.
    #[tokio::test]
    async fn topic_subscriber_does_not_receive_other_topic_events() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut corrections = bus.subscribe_to(Topic::PoseCorrections);
        let _markers = bus.subscribe_to(Topic::MarkerObservations);

        bus.publish_to(Topic::MarkerObservations, make_event(13))?;

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            corrections.recv(),
        )
        .await;
        assert!(result.is_err(), "PoseCorrections subscriber must not see marker events");
        Ok(())
    }

    #[tokio::test]
    async fn try_recv_drains_buffered_events() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Transforms);
        bus.publish_to(Topic::Transforms, make_event(1))?;
        bus.publish_to(Topic::Transforms, make_event(2))?;

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn receiver_sees_closed_after_bus_dropped() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::PoseCorrections);
        drop(bus);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    /// Flooding a small channel while a subscriber sleeps produces `Lagged`.
    #[tokio::test]
    async fn topic_channel_lag_on_slow_subscriber() {
        let bus = EventBus::new(16);
        let mut slow_sub = bus.subscribe_to(Topic::Transforms);
        for i in 0..1_000 {
            let _ = bus.publish_to(Topic::Transforms, make_event(i));
        }
        let result = slow_sub.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged error, got: {result:?}"
        );
    }
}
