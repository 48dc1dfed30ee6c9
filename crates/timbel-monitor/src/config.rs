//! Configuration for the pipeline monitor.

use serde::{Deserialize, Serialize};
use timbel_core::{Error, Result};

/// Configuration for the pipeline monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Capacity of the broadcast channel. Subscribers lagging further than
    /// this behind skip the missed events.
    pub channel_capacity: usize,
    /// Log entries retained per pipeline by the in-memory store.
    pub log_retention: usize,
    /// Page size used when a history query gives none.
    pub history_default_limit: u32,
    /// Upper bound on the history page size.
    pub history_max_limit: u32,
    /// Upper bound on log entries returned by one read.
    pub log_read_limit: u32,
    /// Metrics window used when a request gives none.
    pub metrics_window_hours: u32,
    /// Largest metrics window a request may ask for.
    pub metrics_max_window_hours: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            log_retention: 10_000,
            history_default_limit: 20,
            history_max_limit: 100,
            log_read_limit: 1000,
            metrics_window_hours: 24,
            metrics_max_window_hours: 24 * 90,
        }
    }
}

impl MonitorConfig {
    /// Reject settings the monitor cannot run with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("channel_capacity", self.channel_capacity as u64),
            ("log_retention", self.log_retention as u64),
            ("history_default_limit", u64::from(self.history_default_limit)),
            ("history_max_limit", u64::from(self.history_max_limit)),
            ("log_read_limit", u64::from(self.log_read_limit)),
            ("metrics_window_hours", u64::from(self.metrics_window_hours)),
            ("metrics_max_window_hours", u64::from(self.metrics_max_window_hours)),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(Error::Validation(format!("monitor.{} must be at least 1", name)));
        }

        if self.history_default_limit > self.history_max_limit {
            return Err(Error::Validation(
                "monitor.history_default_limit exceeds monitor.history_max_limit".to_string(),
            ));
        }
        if self.metrics_window_hours > self.metrics_max_window_hours {
            return Err(Error::Validation(
                "monitor.metrics_window_hours exceeds monitor.metrics_max_window_hours"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
