//! Service Factory - pool service wiring
//!
//! Centralizes creation of the pool services so the facade, tests and any
//! embedding application wire them the same way.

use std::sync::Arc;

use sessionmux_core::{EventSender, RemoteClient};

use super::{ConnectionPool, KeepAliveScheduler, SessionService};
use crate::config::GatewayConfig;
use crate::services::LookupCache;

/// Bundle of all pool services
#[derive(Clone)]
pub struct PoolServices {
    pub session_service: Arc<SessionService>,
    pub lookup_cache: Arc<LookupCache>,
    pub pool: Arc<ConnectionPool>,
    pub keep_alive: Arc<KeepAliveScheduler>,
}

pub struct ServiceFactory;

impl ServiceFactory {
    /// Create all pool services
    ///
    /// # Arguments
    /// * `client` - Backend client used to open sessions
    /// * `config` - Gateway configuration (agent, keep-alive interval)
    /// * `events` - Sender for gateway lifecycle events
    pub fn create_pool_services(
        client: Arc<dyn RemoteClient>,
        config: &GatewayConfig,
        events: EventSender,
    ) -> PoolServices {
        let session_service = Arc::new(SessionService::new(client, config.agent.clone()));
        let lookup_cache = Arc::new(LookupCache::new());

        let pool = Arc::new(ConnectionPool::new(
            session_service.clone(),
            lookup_cache.clone(),
            events,
        ));

        let keep_alive = Arc::new(KeepAliveScheduler::new(
            pool.clone(),
            config.keep_alive_interval(),
        ));

        PoolServices {
            session_service,
            lookup_cache,
            pool,
            keep_alive,
        }
    }
}
