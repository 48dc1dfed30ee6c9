//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the monitor and its adapters.

use crate::events::{Event, Topic};
use crate::ids::PipelineId;
use crate::logs::LogEntry;
use crate::pipeline::Pipeline;
use crate::query::{HistoryFilter, LogQuery, Page, PipelineSummary};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::pin::Pin;

/// Stream of events delivered to one subscriber.
pub type EventStream = Pin<Box<dyn Stream<Item = Event> + Send>>;

/// Publish/subscribe fan-out of monitor events.
///
/// Delivery is at-most-once: publishing never waits for subscribers, and a
/// subscriber that falls behind misses events rather than slowing the
/// publisher down.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event to every matching subscriber.
    async fn publish(&self, event: Event) -> Result<()>;

    /// Subscribe to events matching any of `topics`.
    async fn subscribe(&self, topics: Vec<Topic>) -> Result<EventStream>;
}

/// Storage for pipelines and their logs.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Persist a newly registered pipeline.
    async fn insert(&self, pipeline: &Pipeline) -> Result<()>;

    /// Get a pipeline by ID.
    async fn get(&self, id: PipelineId) -> Result<Option<Pipeline>>;

    /// Write back a mutated pipeline.
    ///
    /// `pipeline.version` must still match the stored version, otherwise
    /// `Error::Conflict` is returned. Returns the new version.
    async fn update(&self, pipeline: &Pipeline) -> Result<u64>;

    /// Pipelines that are queued, running or paused, newest first.
    async fn list_active(&self) -> Result<Vec<Pipeline>>;

    /// Filtered, paginated history, newest first.
    async fn history(&self, filter: &HistoryFilter) -> Result<Page<Pipeline>>;

    /// Every pipeline queued at or after `since`.
    async fn queued_since(&self, since: DateTime<Utc>) -> Result<Vec<Pipeline>>;

    /// Counts by status and environment.
    async fn summary(&self) -> Result<PipelineSummary>;

    /// Append log entries, assigning their sequence numbers in order.
    async fn append_logs(&self, entries: Vec<LogEntry>) -> Result<Vec<LogEntry>>;

    /// Read back logs in sequence order.
    async fn logs(&self, query: &LogQuery) -> Result<Vec<LogEntry>>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<()>;
}
