//! Real-time pipeline monitor for Timbel.
//!
//! [`PipelineMonitor`] owns the state transitions of registered pipelines,
//! persists them through a [`PipelineStore`](timbel_core::ports::PipelineStore)
//! and fans updates out through an [`EventBus`](timbel_core::ports::EventBus).

mod bus;
pub mod config;
pub mod health;
pub mod metrics;
mod monitor;
mod store;

pub use bus::BroadcastEventBus;
pub use config::MonitorConfig;
pub use health::{HealthCheck, HealthStatus};
pub use metrics::{BusMetrics, MetricsSnapshot};
pub use monitor::{
    LogsAccepted, PipelineMonitor, PipelineStatusView, StageUpdate, StatusUpdate,
};
pub use store::InMemoryPipelineStore;
