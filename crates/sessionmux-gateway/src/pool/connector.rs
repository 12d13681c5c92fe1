//! Connector - one authenticated session bound to one security context
//!
//! Only the pool creates connectors, one per distinct context. A connector
//! owns its proxy cache; closing it releases every stateful resource before
//! the session itself is closed.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde_json::Value;
use sessionmux_core::backend::ops;
use sessionmux_core::{
    RemoteResult, RemoteSession, SecurityContext, ServiceKind, StatefulKind,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::proxy_cache::{CacheStats, ServiceHandle, ServiceProxyCache, StatefulHandle};

/// Connector lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    /// Session open, serving requests
    Active,
    /// Shutting down its services and session
    Closing,
    /// Session closed; the connector is no longer in the pool
    Closed,
}

/// Statistics for a connector.
#[derive(Debug, Clone)]
pub struct ConnectorStats {
    pub state: ConnectorState,
    pub created_at: Instant,
    pub last_used: Option<Instant>,
    pub last_keep_alive: Option<Instant>,
    pub requests_served: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub cache: CacheStats,
}

#[derive(Debug)]
struct Counters {
    state: ConnectorState,
    created_at: Instant,
    last_used: Option<Instant>,
    last_keep_alive: Option<Instant>,
    requests_served: u64,
    consecutive_failures: u32,
    last_error: Option<String>,
}

pub struct Connector {
    id: Uuid,
    context: SecurityContext,
    session: Arc<dyn RemoteSession>,
    proxies: ServiceProxyCache,
    counters: RwLock<Counters>,
}

impl Connector {
    pub(crate) fn new(context: SecurityContext, session: Arc<dyn RemoteSession>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            context,
            session,
            proxies: ServiceProxyCache::new(id),
            counters: RwLock::new(Counters {
                state: ConnectorState::Active,
                created_at: Instant::now(),
                last_used: None,
                last_keep_alive: None,
                requests_served: 0,
                consecutive_failures: 0,
                last_error: None,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn context(&self) -> &SecurityContext {
        &self.context
    }

    pub fn is_encrypted(&self) -> bool {
        self.context.encrypted
    }

    pub fn state(&self) -> ConnectorState {
        self.counters.read().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectorState::Active
    }

    pub fn proxies(&self) -> &ServiceProxyCache {
        &self.proxies
    }

    pub fn stats(&self) -> ConnectorStats {
        let c = self.counters.read();
        ConnectorStats {
            state: c.state,
            created_at: c.created_at,
            last_used: c.last_used,
            last_keep_alive: c.last_keep_alive,
            requests_served: c.requests_served,
            consecutive_failures: c.consecutive_failures,
            last_error: c.last_error.clone(),
            cache: self.proxies.stats(),
        }
    }

    pub fn record_success(&self) {
        let mut c = self.counters.write();
        c.requests_served += 1;
        c.consecutive_failures = 0;
        c.last_used = Some(Instant::now());
    }

    pub fn record_failure(&self, error: &str) {
        let mut c = self.counters.write();
        c.consecutive_failures += 1;
        c.last_error = Some(error.to_string());
    }

    /// Cached stateless proxy, created and pinged on first use.
    pub async fn get_stateless(&self, kind: ServiceKind) -> RemoteResult<ServiceHandle> {
        self.proxies.get_stateless(&self.session, kind).await
    }

    /// Stateful resource for `(kind, id)`. An exhausted thumbnail store is
    /// closed and replaced.
    pub async fn get_stateful(&self, kind: StatefulKind, id: i64) -> RemoteResult<Arc<StatefulHandle>> {
        loop {
            let handle = self
                .proxies
                .get_stateful(&self.session, &self.context, kind, id)
                .await?;
            if id > 0 && handle.is_exhausted() {
                debug!(
                    connector_id = %self.id,
                    batch = id,
                    "[Connector] Thumbnail store exhausted, replacing"
                );
                self.proxies.close(&handle).await;
                continue;
            }
            return Ok(handle);
        }
    }

    /// Unshared stateful resource for a single caller.
    pub async fn open_stateful(&self, kind: StatefulKind, id: i64) -> RemoteResult<Arc<StatefulHandle>> {
        self.proxies
            .open_stateful(&self.session, &self.context, kind, id)
            .await
    }

    /// Close one stateful resource. Never fails.
    pub async fn close(&self, handle: &Arc<StatefulHandle>) {
        self.proxies.close(handle).await;
    }

    /// Close every stateful resource; rendering engines only when asked.
    pub async fn shutdown_services(&self, include_rendering: bool) -> usize {
        let closed = self.proxies.shutdown_services(include_rendering).await;
        if closed > 0 {
            debug!(
                connector_id = %self.id,
                closed = closed,
                include_rendering = include_rendering,
                "[Connector] Shut down stateful services"
            );
        }
        closed
    }

    /// Release all services then close the session. Idempotent.
    pub async fn close_session(&self) {
        {
            let mut c = self.counters.write();
            if c.state != ConnectorState::Active {
                return;
            }
            c.state = ConnectorState::Closing;
        }

        let closed = self.proxies.seal().await;
        if let Err(e) = self.session.close().await {
            warn!(
                connector_id = %self.id,
                group_id = self.context.group_id,
                error = %e,
                "[Connector] Failed to close session"
            );
        }

        self.counters.write().state = ConnectorState::Closed;
        info!(
            connector_id = %self.id,
            group_id = self.context.group_id,
            host = %self.context.host,
            services_closed = closed,
            "[Connector] Session closed"
        );
    }

    /// Touch the session with a no-op admin call.
    pub async fn keep_alive(&self) -> RemoteResult<()> {
        let admin = self.get_stateless(ServiceKind::Admin).await?;
        admin.invoke(ops::GET_EVENT_CONTEXT, Value::Null).await?;
        self.counters.write().last_keep_alive = Some(Instant::now());
        Ok(())
    }

    /// Pixels ids with an open rendering engine on this connector.
    pub fn rendering_engines(&self) -> Vec<i64> {
        self.proxies.rendering_engine_ids()
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("id", &self.id)
            .field("context", &self.context)
            .field("state", &self.state())
            .finish()
    }
}
