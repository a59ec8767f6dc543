use std::sync::Arc;

use conveyor_core::{BroadcastPublisher, Config, Orchestrator, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    orchestrator: Arc<Orchestrator>,
    events: Arc<BroadcastPublisher>,
}

impl AppState {
    pub fn new(
        config: Config,
        orchestrator: Arc<Orchestrator>,
        events: Arc<BroadcastPublisher>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            events,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        self.orchestrator.as_ref()
    }

    /// Run events fanned out to WebSocket subscribers.
    pub fn events(&self) -> &BroadcastPublisher {
        self.events.as_ref()
    }
}
