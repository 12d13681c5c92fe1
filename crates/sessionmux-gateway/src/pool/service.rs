//! Connection Pool - Orchestrator for per-context sessions
//!
//! ConnectionPool is the main entry point for acquiring remote services.
//! It owns the list of live connectors and is the single synchronization
//! point for creating them.
//!
//! Key responsibilities:
//! - Resolving a security context to its connector (creating it once)
//! - Acquiring proxies with one rebuild-and-retry on broken transport
//! - Logout, bulk reconnect and keep-alive across all connectors
//!
//! `resolve`, `logout`, `reconnect_all` and `keep_alive` all run under one
//! async mutex, so they never interleave.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use sessionmux_core::{
    ContextEngines, Credentials, EventSender, GatewayError, GatewayEvent, GatewayResult,
    RemoteFailure, RemoteResult, SecurityContext, ServiceKind, StatefulKind,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::connector::Connector;
use super::proxy_cache::{ServiceHandle, StatefulHandle};
use super::session::SessionService;
use crate::classifier::{ExceptionClassifier, Outcome};
use crate::services::LookupCache;

pub const NOT_LOGGED_IN_MESSAGE: &str = "Not logged in.";
pub const RETRY_FAILED_MESSAGE: &str = "Cannot reconnect to the server.";

/// Pool statistics
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub total_connectors: usize,
    pub active_connectors: usize,
    pub stateless_proxies: usize,
    pub stateful_handles: usize,
    pub rendering_engines: usize,
    pub requests_served: u64,
    pub connected: bool,
    pub reconnecting: bool,
}

/// Result of one keep-alive sweep
#[derive(Debug, Clone, Default)]
pub struct KeepAliveReport {
    /// Contexts touched successfully
    pub touched: Vec<SecurityContext>,
    /// Contexts whose touch failed, with the failure message
    pub failed: Vec<(SecurityContext, String)>,
}

impl KeepAliveReport {
    pub fn total(&self) -> usize {
        self.touched.len() + self.failed.len()
    }

    pub fn all_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

struct PoolState {
    connectors: Vec<Arc<Connector>>,
    credentials: Option<Credentials>,
}

/// Clears the reconnecting flag on every exit path, including panics.
struct ReconnectGuard<'a>(&'a AtomicBool);

impl<'a> ReconnectGuard<'a> {
    fn set(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for ReconnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ConnectionPool {
    state: Mutex<PoolState>,
    sessions: Arc<SessionService>,
    classifier: ExceptionClassifier,
    reconnecting: Arc<AtomicBool>,
    connected: AtomicBool,
    /// Rendering engines open before the last successful reconnect
    reactivation: parking_lot::Mutex<Vec<ContextEngines>>,
    lookups: Arc<LookupCache>,
    events: EventSender,
}

impl ConnectionPool {
    pub fn new(sessions: Arc<SessionService>, lookups: Arc<LookupCache>, events: EventSender) -> Self {
        let reconnecting = Arc::new(AtomicBool::new(false));
        Self {
            state: Mutex::new(PoolState {
                connectors: Vec::new(),
                credentials: None,
            }),
            sessions,
            classifier: ExceptionClassifier::new(reconnecting.clone()),
            reconnecting,
            connected: AtomicBool::new(false),
            reactivation: parking_lot::Mutex::new(Vec::new()),
            lookups,
            events,
        }
    }

    pub fn classifier(&self) -> &ExceptionClassifier {
        &self.classifier
    }

    pub fn lookups(&self) -> Arc<LookupCache> {
        self.lookups.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    /// Store the credentials used for every session this pool opens.
    pub async fn set_credentials(&self, credentials: Credentials) {
        self.state.lock().await.credentials = Some(credentials);
    }

    pub async fn has_credentials(&self) -> bool {
        self.state.lock().await.credentials.is_some()
    }

    /// Connector for `ctx`, created (with its session) on first use.
    pub async fn resolve(&self, ctx: &SecurityContext) -> GatewayResult<Arc<Connector>> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.connectors.iter().find(|c| c.context() == ctx) {
            return Ok(existing.clone());
        }

        let credentials = state
            .credentials
            .clone()
            .ok_or_else(|| GatewayError::connection(NOT_LOGGED_IN_MESSAGE))?;

        let connector = Arc::new(self.sessions.open(ctx, &credentials).await?);
        state.connectors.push(connector.clone());
        self.connected.store(true, Ordering::SeqCst);

        self.events.emit(GatewayEvent::ConnectorCreated {
            connector_id: connector.id(),
            context: ctx.clone(),
        });
        Ok(connector)
    }

    /// Existing connector for `ctx`; never creates one.
    pub async fn find(&self, ctx: &SecurityContext) -> Option<Arc<Connector>> {
        let state = self.state.lock().await;
        state.connectors.iter().find(|c| c.context() == ctx).cloned()
    }

    /// Snapshot of the live connectors
    pub async fn connectors(&self) -> Vec<Arc<Connector>> {
        self.state.lock().await.connectors.clone()
    }

    /// Stateless service of `kind` under `ctx`.
    pub async fn get_service(&self, ctx: &SecurityContext, kind: ServiceKind) -> GatewayResult<ServiceHandle> {
        self.acquire(ctx, kind.as_str(), move |connector| {
            async move { connector.get_stateless(kind).await }.boxed()
        })
        .await
    }

    /// Stateful resource `(kind, id)` under `ctx`.
    pub async fn get_stateful(
        &self,
        ctx: &SecurityContext,
        kind: StatefulKind,
        id: i64,
    ) -> GatewayResult<Arc<StatefulHandle>> {
        self.acquire(ctx, kind.as_str(), move |connector| {
            async move { connector.get_stateful(kind, id).await }.boxed()
        })
        .await
    }

    /// Unshared stateful resource `(kind, id)` under `ctx`. The caller owns
    /// it and closes it with `close_service`.
    pub async fn open_stateful(
        &self,
        ctx: &SecurityContext,
        kind: StatefulKind,
        id: i64,
    ) -> GatewayResult<Arc<StatefulHandle>> {
        self.acquire(ctx, kind.as_str(), move |connector| {
            async move { connector.open_stateful(kind, id).await }.boxed()
        })
        .await
    }

    /// Acquire something from a connector, rebuilding the connector and
    /// trying exactly once more when the transport turns out to be broken.
    /// The fetch is only ever a proxy acquisition, never a business call.
    async fn acquire<T, F>(&self, ctx: &SecurityContext, operation: &str, fetch: F) -> GatewayResult<T>
    where
        F: Fn(Arc<Connector>) -> BoxFuture<'static, RemoteResult<T>>,
    {
        let connector = self.resolve(ctx).await?;
        let failure = match fetch(connector.clone()).await {
            Ok(value) => {
                connector.record_success();
                return Ok(value);
            }
            Err(failure) => failure,
        };
        connector.record_failure(&failure.to_string());

        match self.classifier.classify(&failure, operation) {
            Outcome::Surface(err) => return Err(err),
            Outcome::ConnectionBroken(_) => {
                warn!(
                    group_id = ctx.group_id,
                    host = %ctx.host,
                    operation = operation,
                    error = %failure,
                    "[ConnectionPool] Connection broken, rebuilding connector"
                );
                self.connection_lost(ctx, connector.id(), &failure).await;
            }
            Outcome::Suppressed => {
                debug!(
                    group_id = ctx.group_id,
                    operation = operation,
                    "[ConnectionPool] Failure during reconnect, retrying after it completes"
                );
                self.discard(connector.id(), "reconnecting").await;
            }
        }

        let connector = self.resolve(ctx).await?;
        match fetch(connector.clone()).await {
            Ok(value) => {
                connector.record_success();
                info!(
                    group_id = ctx.group_id,
                    operation = operation,
                    "[ConnectionPool] Retry succeeded"
                );
                Ok(value)
            }
            Err(failure) => {
                connector.record_failure(&failure.to_string());
                warn!(
                    group_id = ctx.group_id,
                    operation = operation,
                    error = %failure,
                    "[ConnectionPool] Retry failed"
                );
                if self.classifier.classify(&failure, operation).is_broken() {
                    self.connection_lost(ctx, connector.id(), &failure).await;
                }
                Err(GatewayError::connection(RETRY_FAILED_MESSAGE).with_cause(failure))
            }
        }
    }

    /// Classify a failure raised by a business call on a connector's proxy.
    ///
    /// `Ok(())` means the failure was suppressed by an ongoing reconnect and
    /// the call should be treated as abandoned. A broken transport discards
    /// the connector; the call itself is never replayed.
    pub async fn handle_failure(
        &self,
        ctx: &SecurityContext,
        connector_id: Uuid,
        failure: &RemoteFailure,
        operation: &str,
    ) -> GatewayResult<()> {
        match self.classifier.classify(failure, operation) {
            Outcome::Surface(err) => Err(err),
            Outcome::ConnectionBroken(err) => {
                self.connection_lost(ctx, connector_id, failure).await;
                Err(err)
            }
            Outcome::Suppressed => Ok(()),
        }
    }

    async fn connection_lost(&self, ctx: &SecurityContext, connector_id: Uuid, failure: &RemoteFailure) {
        if self.discard(connector_id, "connection broken").await {
            self.events.emit(GatewayEvent::ConnectionLost {
                context: ctx.clone(),
                message: failure.to_string(),
            });
        }
    }

    /// Shut down and remove one connector. False if it was already gone.
    pub async fn discard(&self, connector_id: Uuid, reason: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some(pos) = state.connectors.iter().position(|c| c.id() == connector_id) else {
            return false;
        };
        let connector = state.connectors.remove(pos);
        connector.close_session().await;
        if state.connectors.is_empty() {
            self.connected.store(false, Ordering::SeqCst);
        }

        self.events.emit(GatewayEvent::ConnectorDropped {
            connector_id,
            context: connector.context().clone(),
            reason: reason.to_string(),
        });
        true
    }

    /// Close one stateful resource. Never opens a session to do so.
    pub async fn close_service(&self, ctx: &SecurityContext, handle: &Arc<StatefulHandle>) {
        let owner = {
            let state = self.state.lock().await;
            state
                .connectors
                .iter()
                .find(|c| c.id() == handle.connector_id())
                .cloned()
        };

        match owner {
            Some(connector) => connector.close(handle).await,
            None => {
                debug!(
                    group_id = ctx.group_id,
                    resource = %handle.key(),
                    "[ConnectionPool] Owner connector already gone"
                );
                handle.release().await;
            }
        }
    }

    /// Close stateful resources on every connector.
    pub async fn shutdown_services(&self, include_rendering: bool) -> usize {
        let connectors = self.connectors().await;
        let mut closed = 0;
        for connector in connectors {
            closed += connector.shutdown_services(include_rendering).await;
        }
        closed
    }

    async fn close_all(&self, state: &mut PoolState, reason: &str) -> usize {
        let connectors: Vec<_> = state.connectors.drain(..).collect();
        self.connected.store(false, Ordering::SeqCst);

        for connector in &connectors {
            connector.close_session().await;
            self.events.emit(GatewayEvent::ConnectorDropped {
                connector_id: connector.id(),
                context: connector.context().clone(),
                reason: reason.to_string(),
            });
        }
        connectors.len()
    }

    /// Close every session and forget the credentials. Idempotent.
    pub async fn logout(&self) {
        let mut state = self.state.lock().await;
        let had_session = !state.connectors.is_empty() || state.credentials.is_some();

        let closed = self.close_all(&mut state, "logout").await;
        state.credentials = None;
        self.lookups.invalidate();
        self.reactivation.lock().clear();

        if had_session {
            info!(connectors = closed, "[ConnectionPool] Logged out");
            self.events.emit(GatewayEvent::LoggedOut { connectors: closed });
        }
    }

    /// Re-authenticate and rebuild a session for every known context.
    ///
    /// True only if every context reconnected. On failure every new session
    /// is closed and the pool is left logged out, credentials included.
    /// With no known contexts there is nothing to authenticate against, so
    /// the stored credentials are left as they were.
    pub async fn reconnect_all(&self, username: &str, password: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some(previous) = state.credentials.clone() else {
            warn!("[ConnectionPool] Reconnect requested without credentials");
            return false;
        };
        if state.connectors.is_empty() {
            info!("[ConnectionPool] No contexts to reconnect, keeping current login");
            self.reactivation.lock().clear();
            self.events.emit(GatewayEvent::Reconnected {
                contexts: 0,
                engines: Vec::new(),
            });
            return true;
        }
        let credentials = previous.with_login(username, password);
        let _guard = ReconnectGuard::set(&self.reconnecting);

        let engines: Vec<ContextEngines> = state
            .connectors
            .iter()
            .map(|c| ContextEngines {
                context: c.context().clone(),
                pixels_ids: c.rendering_engines(),
            })
            .filter(|e| !e.pixels_ids.is_empty())
            .collect();
        let contexts: Vec<SecurityContext> =
            state.connectors.iter().map(|c| c.context().clone()).collect();

        info!(contexts = contexts.len(), "[ConnectionPool] Reconnecting all contexts");

        self.close_all(&mut state, "reconnect").await;
        self.lookups.invalidate();

        let mut rebuilt: Vec<Arc<Connector>> = Vec::with_capacity(contexts.len());
        for ctx in &contexts {
            match self.sessions.open(ctx, &credentials).await {
                Ok(connector) => rebuilt.push(Arc::new(connector)),
                Err(e) => {
                    warn!(
                        group_id = ctx.group_id,
                        host = %ctx.host,
                        error = %e,
                        "[ConnectionPool] Reconnect failed, logging out"
                    );
                    for connector in &rebuilt {
                        connector.close_session().await;
                    }
                    state.credentials = None;
                    self.lookups.invalidate();
                    self.reactivation.lock().clear();
                    self.events.emit(GatewayEvent::ReconnectFailed {
                        message: e.to_string(),
                    });
                    return false;
                }
            }
        }

        for connector in &rebuilt {
            self.events.emit(GatewayEvent::ConnectorCreated {
                connector_id: connector.id(),
                context: connector.context().clone(),
            });
        }
        state.connectors = rebuilt;
        state.credentials = Some(credentials);
        self.connected.store(!state.connectors.is_empty(), Ordering::SeqCst);
        *self.reactivation.lock() = engines.clone();

        info!(
            contexts = contexts.len(),
            engines = engines.len(),
            "[ConnectionPool] Reconnect complete"
        );
        self.events.emit(GatewayEvent::Reconnected {
            contexts: contexts.len(),
            engines,
        });
        true
    }

    /// Touch every connector. One failure never stops the sweep.
    pub async fn keep_alive(&self) -> KeepAliveReport {
        let state = self.state.lock().await;
        let mut report = KeepAliveReport::default();

        for connector in &state.connectors {
            let ctx = connector.context().clone();
            match connector.keep_alive().await {
                Ok(()) => report.touched.push(ctx),
                Err(failure) => {
                    if self.classifier.classify(&failure, "keep_alive").is_suppressed() {
                        continue;
                    }
                    connector.record_failure(&failure.to_string());
                    warn!(
                        group_id = ctx.group_id,
                        host = %ctx.host,
                        error = %failure,
                        "[ConnectionPool] Keep-alive failed"
                    );
                    self.events.emit(GatewayEvent::KeepAliveFailed {
                        context: ctx.clone(),
                        message: failure.to_string(),
                    });
                    report.failed.push((ctx, failure.to_string()));
                }
            }
        }

        report
    }

    /// Open rendering engines per context
    pub async fn rendering_engines(&self) -> Vec<ContextEngines> {
        let state = self.state.lock().await;
        state
            .connectors
            .iter()
            .map(|c| ContextEngines {
                context: c.context().clone(),
                pixels_ids: c.rendering_engines(),
            })
            .filter(|e| !e.pixels_ids.is_empty())
            .collect()
    }

    /// Engines that were open before the last reconnect; empties the list.
    pub fn take_rendering_engines_to_reactivate(&self) -> Vec<ContextEngines> {
        std::mem::take(&mut *self.reactivation.lock())
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        let mut stats = PoolStats {
            connected: self.is_connected(),
            reconnecting: self.is_reconnecting(),
            ..Default::default()
        };

        for connector in &state.connectors {
            let s = connector.stats();
            stats.total_connectors += 1;
            if connector.is_active() {
                stats.active_connectors += 1;
            }
            stats.stateless_proxies += s.cache.stateless;
            stats.stateful_handles += s.cache.stateful;
            stats.rendering_engines += s.cache.rendering_engines;
            stats.requests_served += s.requests_served;
        }

        stats
    }
}
