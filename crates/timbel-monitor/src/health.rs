//! Health check for the monitor and its collaborators.

use serde::Serialize;
use timbel_core::Result;

use crate::metrics::MetricsSnapshot;

/// Health status of the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HealthStatus {
    /// Healthy and connected.
    Healthy,
    /// Degraded but functional.
    Degraded { reason: String },
    /// Store unreachable.
    Unhealthy { reason: String },
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// Healthy or degraded.
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded { .. })
    }
}

/// Health check result with details.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub store_reachable: bool,
    pub bus: Option<MetricsSnapshot>,
}

impl HealthCheck {
    pub fn evaluate(store: &Result<()>, bus: Option<MetricsSnapshot>) -> Self {
        let status = match store {
            Err(e) => HealthStatus::Unhealthy {
                reason: format!("pipeline store unreachable: {}", e),
            },
            Ok(()) => match bus {
                Some(snapshot) if snapshot.events_lagged > 0 => HealthStatus::Degraded {
                    reason: format!(
                        "{} events dropped by slow subscribers",
                        snapshot.events_lagged
                    ),
                },
                _ => HealthStatus::Healthy,
            },
        };

        Self {
            status,
            store_reachable: store.is_ok(),
            bus,
        }
    }
}
