// src/services/broadcast_service.rs
use std::collections::HashMap;
use tokio::sync::{RwLock, broadcast};
use tracing;

use crate::models::events::RideEvent;

pub type EventSender = broadcast::Sender<RideEvent>;
pub type EventReceiver = broadcast::Receiver<RideEvent>;

/// Per-topic fan-out for live ride events. Delivery is fire-and-forget:
/// a topic with no subscribers simply drops what is published to it.
/// A ride topic is dropped after its closing event, which ends its streams
/// once they drain.
pub struct EventHub {
    capacity: usize,
    topics: RwLock<HashMap<String, EventSender>>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: RwLock::new(HashMap::new()),
        }
    }

    pub fn ride_topic(ride_id: &str) -> String {
        format!("ride:{ride_id}")
    }

    pub fn driver_topic(driver_id: &str) -> String {
        format!("driver:{driver_id}")
    }

    pub async fn subscribe(&self, topic: &str) -> EventReceiver {
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Sends to the ride topic, and to the driver topic for events the driver
    /// must see before joining the ride. Returns how many receivers got it.
    pub async fn publish(&self, event: RideEvent, driver_id: &str) -> usize {
        let ride_topic = Self::ride_topic(event.ride_id());
        let mut delivered = self.publish_to(&ride_topic, event.clone()).await;
        if event.closes_ride() && self.topics.write().await.remove(&ride_topic).is_some() {
            tracing::debug!("Closed {}", ride_topic);
        }
        if event.concerns_driver() {
            delivered += self.publish_to(&Self::driver_topic(driver_id), event).await;
        }
        delivered
    }

    async fn publish_to(&self, topic: &str, event: RideEvent) -> usize {
        let sender = self.topics.read().await.get(topic).cloned();
        let Some(sender) = sender else {
            return 0;
        };

        let name = event.name();
        match sender.send(event) {
            Ok(receivers) => {
                tracing::debug!("Published {} to {} ({} receivers)", name, topic, receivers);
                receivers
            }
            Err(_) => {
                self.release(topic).await;
                0
            }
        }
    }

    /// Drops the topic once its last subscriber is gone. Call after dropping
    /// the receiver.
    pub async fn release(&self, topic: &str) {
        let mut topics = self.topics.write().await;
        if topics.get(topic).is_some_and(|s| s.receiver_count() == 0) {
            topics.remove(topic);
        }
    }

    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ride_request::Party;

    fn cancelled(ride_id: &str) -> RideEvent {
        RideEvent::RideCancelled {
            ride_id: ride_id.to_string(),
            cancelled_by: Party::Rider,
            reason: None,
        }
    }

    #[tokio::test]
    async fn test_subscribers_only_see_their_ride() {
        let hub = EventHub::new(8);
        let mut ride_a = hub.subscribe(&EventHub::ride_topic("req-a")).await;
        let mut ride_b = hub.subscribe(&EventHub::ride_topic("req-b")).await;

        hub.publish(cancelled("req-a"), "drv-1").await;

        assert_eq!(ride_a.recv().await.unwrap(), cancelled("req-a"));
        assert!(matches!(ride_b.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_driver_topic_receives_cancellations() {
        let hub = EventHub::new(8);
        let mut driver = hub.subscribe(&EventHub::driver_topic("drv-1")).await;
        assert_eq!(hub.publish(cancelled("req-a"), "drv-1").await, 1);
        assert_eq!(driver.recv().await.unwrap().name(), "ride_cancelled");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let hub = EventHub::new(8);
        assert_eq!(hub.publish(cancelled("req-a"), "drv-1").await, 0);

        let receiver = hub.subscribe(&EventHub::ride_topic("req-a")).await;
        drop(receiver);
        assert_eq!(hub.publish(cancelled("req-a"), "drv-1").await, 0);
        assert_eq!(hub.topic_count().await, 0);
    }

    #[tokio::test]
    async fn test_released_topics_are_dropped() {
        let hub = EventHub::new(8);
        for i in 0..100 {
            let topic = EventHub::driver_topic(&format!("drv-{i}"));
            drop(hub.subscribe(&topic).await);
            hub.release(&topic).await;
        }
        assert_eq!(hub.topic_count().await, 0);

        let topic = EventHub::ride_topic("req-a");
        let _first = hub.subscribe(&topic).await;
        drop(hub.subscribe(&topic).await);
        hub.release(&topic).await;
        assert_eq!(hub.topic_count().await, 1);
    }

    #[tokio::test]
    async fn test_closing_event_ends_the_ride_topic() {
        let hub = EventHub::new(8);
        let mut watcher = hub.subscribe(&EventHub::ride_topic("req-a")).await;

        hub.publish(cancelled("req-a"), "drv-1").await;
        assert_eq!(hub.topic_count().await, 0);
        assert_eq!(watcher.recv().await.unwrap(), cancelled("req-a"));
        assert!(matches!(watcher.recv().await, Err(broadcast::error::RecvError::Closed)));
    }
}
