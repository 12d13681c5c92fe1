//! Dependency Injection Container
//!
//! Everything the gateway needs from its host application, injected
//! explicitly so tests can swap the backend for a mock.

use std::sync::Arc;

use sessionmux_core::{create_shared_event_bus, RemoteClient, SharedEventBus};

use crate::config::GatewayConfig;

/// Dependency container for the gateway
#[derive(Clone)]
pub struct GatewayDependencies {
    /// Backend client library
    pub client: Arc<dyn RemoteClient>,
    /// Bus receiving gateway lifecycle events
    pub event_bus: SharedEventBus,
    pub config: GatewayConfig,
}

impl GatewayDependencies {
    pub fn new(client: Arc<dyn RemoteClient>, event_bus: SharedEventBus, config: GatewayConfig) -> Self {
        Self {
            client,
            event_bus,
            config,
        }
    }
}

/// Builder for GatewayDependencies
#[derive(Default)]
pub struct DependenciesBuilder {
    client: Option<Arc<dyn RemoteClient>>,
    event_bus: Option<SharedEventBus>,
    config: Option<GatewayConfig>,
}

impl DependenciesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, client: Arc<dyn RemoteClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_event_bus(mut self, event_bus: SharedEventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the container. The client is required; the event bus and
    /// config fall back to defaults. The config is validated.
    pub fn build(self) -> Result<GatewayDependencies, String> {
        let client = self.client.ok_or("client is required")?;
        let config = self.config.unwrap_or_default();
        config.validate().map_err(|e| e.to_string())?;

        Ok(GatewayDependencies {
            client,
            event_bus: self.event_bus.unwrap_or_else(create_shared_event_bus),
            config,
        })
    }
}
