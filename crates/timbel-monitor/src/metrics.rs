//! Counters for the event bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for the broadcast event bus.
#[derive(Debug, Default)]
pub struct BusMetrics {
    /// Total events published.
    pub events_published: AtomicU64,
    /// Events published while nobody was subscribed.
    pub events_unobserved: AtomicU64,
    /// Events delivered to subscribers (counted per subscriber).
    pub events_delivered: AtomicU64,
    /// Events skipped by subscribers that fell behind.
    pub events_lagged: AtomicU64,
    /// Currently open subscriptions.
    pub subscribers: AtomicU64,
}

impl BusMetrics {
    /// Create new metrics instance.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_publish(&self, receivers: usize) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        if receivers == 0 {
            self.events_unobserved.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_delivery(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lag(&self, skipped: u64) {
        self.events_lagged.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn subscriber_opened(&self) {
        self.subscribers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscriber_closed(&self) {
        self.subscribers.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_unobserved: self.events_unobserved.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_lagged: self.events_lagged.load(Ordering::Relaxed),
            subscribers: self.subscribers.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of bus metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub events_published: u64,
    pub events_unobserved: u64,
    pub events_delivered: u64,
    pub events_lagged: u64,
    pub subscribers: u64,
}
