//! Startup Orchestrator - login and background tasks
//!
//! Keeps the order of startup steps out of the gateway itself: log in and
//! warm the requested contexts, then start the keep-alive sweep when the
//! configuration asks for it.

use std::sync::Arc;

use sessionmux_core::{Credentials, GatewayResult, SecurityContext};
use tracing::{info, warn};

use super::{SessionGateway, WarmupResult};

pub struct StartupOrchestrator {
    gateway: Arc<SessionGateway>,
}

impl StartupOrchestrator {
    pub fn new(gateway: Arc<SessionGateway>) -> Self {
        Self { gateway }
    }

    /// Log in, warm `contexts`, and start keep-alive if enabled.
    pub async fn run(
        &self,
        credentials: Credentials,
        contexts: &[SecurityContext],
    ) -> GatewayResult<WarmupResult> {
        info!(contexts = contexts.len(), "[Startup] Logging in...");
        let result = self.gateway.login(credentials, contexts).await?;

        if !result.failed.is_empty() {
            warn!(
                failed = result.failed.len(),
                "[Startup] Some contexts could not be warmed"
            );
        }

        if self.gateway.config().keep_alive_enabled {
            self.gateway.start_keep_alive();
        }

        info!(
            connected = result.connected.len(),
            server_version = result.server_version.as_deref().unwrap_or("unknown"),
            "[Startup] Ready"
        );
        Ok(result)
    }

    /// Stop background tasks and log out.
    pub async fn shutdown(&self) {
        self.gateway.stop_keep_alive().await;
        self.gateway.logout().await;
        info!("[Startup] Shut down");
    }
}
