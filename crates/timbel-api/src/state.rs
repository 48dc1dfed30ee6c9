//! Application state shared across handlers.

use std::sync::Arc;
use timbel_auth::TokenVerifier;
use timbel_core::ports::EventBus;
use timbel_monitor::PipelineMonitor;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<PipelineMonitor>,
    pub event_bus: Arc<dyn EventBus>,
    /// `None` disables bearer authentication.
    pub verifier: Option<Arc<TokenVerifier>>,
}

impl AppState {
    pub fn new(monitor: Arc<PipelineMonitor>) -> Self {
        let event_bus = monitor.bus().clone();
        Self {
            monitor,
            event_bus,
            verifier: None,
        }
    }

    pub fn with_verifier(mut self, verifier: TokenVerifier) -> Self {
        self.verifier = Some(Arc::new(verifier));
        self
    }
}
