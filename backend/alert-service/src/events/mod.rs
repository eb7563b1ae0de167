//! Redis-backed event bus: typed envelopes, publisher with fallback mode,
//! subscriber with reconnect/resubscribe, and a combined facade.

pub mod event;
pub mod publisher;
pub mod subscriber;

pub use event::{Event, EventType};
pub use publisher::{EventPublisher, PublisherMetrics};
pub use subscriber::{handler, EventHandler, EventSubscriber, SubscriberMetrics};

use std::sync::Arc;

use serde::Serialize;

use crate::config::Config;

#[derive(Debug, Clone, Serialize)]
pub struct EventBusMetrics {
    pub service_name: String,
    pub publisher: PublisherMetrics,
    pub subscriber: SubscriberMetrics,
}

/// Publisher + subscriber pair owned by one service.
pub struct EventBus {
    pub service_name: String,
    pub publisher: Arc<EventPublisher>,
    pub subscriber: Arc<EventSubscriber>,
}

impl EventBus {
    pub fn new(service_name: impl Into<String>, config: &Config) -> Self {
        Self {
            service_name: service_name.into(),
            publisher: Arc::new(EventPublisher::from_config(config)),
            subscriber: Arc::new(EventSubscriber::from_config(config)),
        }
    }

    /// Connect both halves; each side degrades (or declines) independently.
    pub async fn connect(&self) -> (bool, bool) {
        let publisher_up = self.publisher.connect().await;
        let subscriber_up = self.subscriber.connect().await;
        (publisher_up, subscriber_up)
    }

    pub async fn stop(&self) {
        self.subscriber.stop_listening().await;
    }

    pub async fn get_metrics(&self) -> EventBusMetrics {
        EventBusMetrics {
            service_name: self.service_name.clone(),
            publisher: self.publisher.get_metrics().await,
            subscriber: self.subscriber.get_metrics(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bus_reports_combined_metrics() {
        let config = Config::test_defaults();
        let bus = EventBus::new("alert-service", &config);

        let metrics = bus.get_metrics().await;

        assert_eq!(metrics.service_name, "alert-service");
        assert_eq!(metrics.publisher.events_published, 0);
        assert!(!metrics.subscriber.running);
    }
}
