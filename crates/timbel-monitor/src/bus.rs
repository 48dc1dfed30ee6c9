//! In-process event bus on top of `tokio::sync::broadcast`.

use async_trait::async_trait;
use std::sync::Arc;
use timbel_core::events::{Event, Topic};
use timbel_core::ports::{EventBus, EventStream};
use timbel_core::{Error, Result};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::metrics::BusMetrics;

/// Topic-filtered broadcast bus with at-most-once delivery.
///
/// Every subscriber gets its own receiver on a bounded channel. Publishing
/// never blocks; a subscriber that falls more than `capacity` events behind
/// skips the oldest ones.
#[derive(Clone)]
pub struct BroadcastEventBus {
    sender: broadcast::Sender<Arc<Event>>,
    metrics: Arc<BusMetrics>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            metrics: BusMetrics::new(),
        }
    }

    /// Get metrics.
    pub fn metrics(&self) -> &Arc<BusMetrics> {
        &self.metrics
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Keeps the subscriber gauge accurate when a stream is dropped.
struct SubscriptionGuard {
    metrics: Arc<BusMetrics>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.metrics.subscriber_closed();
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        debug!(
            event = event.name(),
            pipeline_id = %event.pipeline_id(),
            "Publishing event"
        );

        // `send` only fails when there are no receivers, which is not an error here.
        let receivers = self.sender.send(Arc::new(event)).unwrap_or(0);
        self.metrics.record_publish(receivers);
        Ok(())
    }

    async fn subscribe(&self, topics: Vec<Topic>) -> Result<EventStream> {
        if topics.is_empty() {
            return Err(Error::Validation(
                "subscription needs at least one topic".to_string(),
            ));
        }

        debug!(?topics, "Opening subscription");
        let receiver = self.sender.subscribe();
        self.metrics.subscriber_opened();
        let guard = SubscriptionGuard {
            metrics: self.metrics.clone(),
        };

        let stream = futures::stream::unfold(
            (receiver, topics, guard),
            |(mut receiver, topics, guard)| async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) => {
                            if topics.iter().any(|topic| event.matches(topic)) {
                                guard.metrics.record_delivery();
                                let event = Event::clone(&event);
                                return Some((event, (receiver, topics, guard)));
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Subscriber lagged, events dropped");
                            guard.metrics.record_lag(skipped);
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}
