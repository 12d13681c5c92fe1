//! Service proxy cache
//!
//! Per-connector memo of remote proxies:
//! - Stateless kinds: one proxy per kind, created on first use, pinged
//!   before it is cached, never closed individually.
//! - Stateful kinds: one handle per `(kind, id)`, created atomically per key
//!   and closed explicitly. Rendering engines are also indexed by pixels id.
//! - Leases: stateful handles opened for a single caller and never shared,
//!   tracked only so a shutdown can close them.
//!
//! Initialization cells are `tokio::sync::OnceCell`s so concurrent callers
//! for one key share a single remote creation. A failed creation leaves the
//! cell empty and the next caller tries again.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use sessionmux_core::{
    FailureKind, RemoteFailure, RemoteResult, RemoteSession, ResourceKey, SecurityContext,
    ServiceKind, ServiceProxy, StatefulKind, StatefulProxy,
};
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use uuid::Uuid;

/// Process-wide handle id counter
static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Cached stateless proxy.
#[derive(Clone)]
pub struct ServiceHandle {
    kind: ServiceKind,
    connector_id: Uuid,
    proxy: Arc<dyn ServiceProxy>,
}

impl ServiceHandle {
    pub(crate) fn new(kind: ServiceKind, connector_id: Uuid, proxy: Arc<dyn ServiceProxy>) -> Self {
        Self {
            kind,
            connector_id,
            proxy,
        }
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    /// Connector that owns this proxy
    pub fn connector_id(&self) -> Uuid {
        self.connector_id
    }

    pub fn proxy(&self) -> &Arc<dyn ServiceProxy> {
        &self.proxy
    }

    /// Run one remote operation on the proxy. Failures are raw; callers
    /// that expose results publicly run them through the classifier.
    pub async fn invoke(&self, operation: &str, args: Value) -> RemoteResult<Value> {
        self.proxy.invoke(operation, args).await
    }
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("kind", &self.kind)
            .field("connector_id", &self.connector_id)
            .finish()
    }
}

/// Explicitly managed stateful resource.
pub struct StatefulHandle {
    handle_id: u64,
    key: ResourceKey,
    connector_id: Uuid,
    context: SecurityContext,
    proxy: Arc<dyn StatefulProxy>,
    /// Remaining retrievals; only thumbnail stores are budgeted
    retrievals_left: AtomicU32,
    prepared: OnceCell<()>,
    closed: AtomicBool,
}

impl StatefulHandle {
    fn new(
        key: ResourceKey,
        connector_id: Uuid,
        context: SecurityContext,
        proxy: Arc<dyn StatefulProxy>,
    ) -> Self {
        let budget = match key.kind {
            StatefulKind::ThumbnailStore => u32::try_from(key.id.max(0)).unwrap_or(u32::MAX),
            _ => u32::MAX,
        };
        Self {
            handle_id: HANDLE_COUNTER.fetch_add(1, Ordering::Relaxed),
            key,
            connector_id,
            context,
            proxy,
            retrievals_left: AtomicU32::new(budget),
            prepared: OnceCell::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn handle_id(&self) -> u64 {
        self.handle_id
    }

    pub fn key(&self) -> ResourceKey {
        self.key
    }

    pub fn kind(&self) -> StatefulKind {
        self.key.kind
    }

    /// Resource id (pixels id, file id, image id or batch size)
    pub fn resource_id(&self) -> i64 {
        self.key.id
    }

    pub fn connector_id(&self) -> Uuid {
        self.connector_id
    }

    pub fn context(&self) -> &SecurityContext {
        &self.context
    }

    pub fn proxy(&self) -> &Arc<dyn StatefulProxy> {
        &self.proxy
    }

    pub async fn invoke(&self, operation: &str, args: Value) -> RemoteResult<Value> {
        if self.is_closed() {
            return Err(RemoteFailure::new(
                FailureKind::ObjectNotExist,
                format!("{} was closed", self.key),
            ));
        }
        self.proxy.invoke(operation, args).await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Consume one unit of retrieval budget. False once exhausted.
    pub fn take_retrieval(&self) -> bool {
        self.retrievals_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    pub fn retrievals_left(&self) -> u32 {
        self.retrievals_left.load(Ordering::SeqCst)
    }

    /// A thumbnail store whose batch budget is spent.
    pub fn is_exhausted(&self) -> bool {
        self.key.kind == StatefulKind::ThumbnailStore && self.retrievals_left() == 0
    }

    /// Run one-time preparation. Concurrent callers wait for the first;
    /// a failed preparation may be retried.
    pub async fn prepare_with<F, Fut, E>(&self, init: F) -> Result<(), E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(), E>>,
    {
        self.prepared.get_or_try_init(init).await.map(|_| ())
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.initialized()
    }

    /// Mark closed and release the server resource. Only the first call
    /// reaches the server; close failures are logged, never returned.
    pub(crate) async fn release(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Err(e) = self.proxy.close().await {
            warn!(
                resource = %self.key,
                error = %e,
                "[ProxyCache] Failed to close stateful service"
            );
        }
        true
    }
}

impl std::fmt::Debug for StatefulHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatefulHandle")
            .field("handle_id", &self.handle_id)
            .field("key", &self.key)
            .field("connector_id", &self.connector_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

type StatelessCell = Arc<OnceCell<ServiceHandle>>;
type StatefulCell = Arc<OnceCell<Arc<StatefulHandle>>>;

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub stateless: usize,
    pub stateful: usize,
    pub rendering_engines: usize,
}

pub struct ServiceProxyCache {
    connector_id: Uuid,
    stateless: DashMap<ServiceKind, StatelessCell>,
    stateful: DashMap<ResourceKey, StatefulCell>,
    /// pixels id -> rendering engine
    rendering: DashMap<i64, Arc<StatefulHandle>>,
    /// handle id -> unshared handle
    leases: DashMap<u64, Arc<StatefulHandle>>,
    sealed: AtomicBool,
}

impl ServiceProxyCache {
    pub fn new(connector_id: Uuid) -> Self {
        Self {
            connector_id,
            stateless: DashMap::new(),
            stateful: DashMap::new(),
            rendering: DashMap::new(),
            leases: DashMap::new(),
            sealed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> RemoteResult<()> {
        if self.sealed.load(Ordering::SeqCst) {
            return Err(RemoteFailure::new(
                FailureKind::CommunicatorDestroyed,
                "connector is closed",
            ));
        }
        Ok(())
    }

    /// Cached proxy for `kind`, or create, ping and cache a new one.
    pub async fn get_stateless(
        &self,
        session: &Arc<dyn RemoteSession>,
        kind: ServiceKind,
    ) -> RemoteResult<ServiceHandle> {
        self.check_open()?;
        let cell = self.stateless.entry(kind).or_default().clone();

        let handle = cell
            .get_or_try_init(|| async {
                let proxy = session.stateless_service(kind).await?;
                proxy.ping().await?;
                debug!(kind = %kind, "[ProxyCache] Cached stateless proxy");
                Ok::<_, RemoteFailure>(ServiceHandle::new(kind, self.connector_id, proxy))
            })
            .await?;

        Ok(handle.clone())
    }

    /// Create and ping a stateful proxy, closing it again if the ping fails.
    async fn open_handle(
        &self,
        session: &Arc<dyn RemoteSession>,
        context: &SecurityContext,
        key: ResourceKey,
    ) -> RemoteResult<Arc<StatefulHandle>> {
        let proxy = session.stateful_service(key.kind, key.id).await?;
        if let Err(e) = proxy.ping().await {
            if let Err(close_err) = proxy.close().await {
                debug!(resource = %key, error = %close_err, "[ProxyCache] Close after failed ping");
            }
            return Err(e);
        }
        debug!(resource = %key, "[ProxyCache] Opened stateful service");
        Ok(Arc::new(StatefulHandle::new(
            key,
            self.connector_id,
            context.clone(),
            proxy,
        )))
    }

    /// Handle for `(kind, id)`, created once per key.
    pub async fn get_stateful(
        &self,
        session: &Arc<dyn RemoteSession>,
        context: &SecurityContext,
        kind: StatefulKind,
        id: i64,
    ) -> RemoteResult<Arc<StatefulHandle>> {
        let key = ResourceKey::new(kind, id);

        loop {
            self.check_open()?;
            let cell = self.stateful.entry(key).or_default().clone();

            let handle = cell
                .get_or_try_init(|| self.open_handle(session, context, key))
                .await?
                .clone();

            // The cell may have been evicted by a close or shutdown while we
            // were waiting on it. Never hand out an orphaned handle. Engines
            // are indexed under the entry guard, so a close evicting the
            // cell always runs after the index insert and undoes it.
            let registered = match self.stateful.get(&key) {
                Some(entry) if Arc::ptr_eq(entry.value(), &cell) && !handle.is_closed() => {
                    if kind.is_rendering() {
                        self.rendering.insert(id, handle.clone());
                    }
                    true
                }
                _ => false,
            };

            if !registered {
                handle.release().await;
                continue;
            }

            return Ok(handle);
        }
    }

    /// Fresh handle for `(kind, id)` owned by one caller. Never shared with
    /// `get_stateful` callers; closed through `close` like any other handle.
    pub async fn open_stateful(
        &self,
        session: &Arc<dyn RemoteSession>,
        context: &SecurityContext,
        kind: StatefulKind,
        id: i64,
    ) -> RemoteResult<Arc<StatefulHandle>> {
        self.check_open()?;
        let handle = self
            .open_handle(session, context, ResourceKey::new(kind, id))
            .await?;
        self.leases.insert(handle.handle_id(), handle.clone());

        // Sealed while opening: the seal's sweep may have missed this lease
        if let Err(e) = self.check_open() {
            self.leases.remove(&handle.handle_id());
            handle.release().await;
            return Err(e);
        }
        Ok(handle)
    }

    /// Untrack and close one handle.
    pub async fn close(&self, handle: &Arc<StatefulHandle>) {
        let key = handle.key();
        self.leases.remove(&handle.handle_id());
        self.stateful.remove_if(&key, |_, cell| {
            cell.get().map(|h| Arc::ptr_eq(h, handle)).unwrap_or(false)
        });
        if key.kind.is_rendering() {
            self.rendering
                .remove_if(&key.id, |_, tracked| Arc::ptr_eq(tracked, handle));
        }
        handle.release().await;
    }

    /// Close every stateful handle, optionally sparing rendering engines.
    /// Returns the number of handles closed.
    pub async fn shutdown_services(&self, include_rendering: bool) -> usize {
        let keys: Vec<ResourceKey> = self
            .stateful
            .iter()
            .map(|entry| *entry.key())
            .filter(|key| include_rendering || !key.kind.is_rendering())
            .collect();

        let mut closed = 0;
        for key in keys {
            if let Some((_, cell)) = self.stateful.remove(&key) {
                if let Some(handle) = cell.get() {
                    if key.kind.is_rendering() {
                        self.rendering
                            .remove_if(&key.id, |_, tracked| Arc::ptr_eq(tracked, handle));
                    }
                    if handle.release().await {
                        closed += 1;
                    }
                }
            }
        }

        let leased: Vec<u64> = self
            .leases
            .iter()
            .filter(|entry| include_rendering || !entry.value().kind().is_rendering())
            .map(|entry| *entry.key())
            .collect();
        for handle_id in leased {
            if let Some((_, handle)) = self.leases.remove(&handle_id) {
                if handle.release().await {
                    closed += 1;
                }
            }
        }
        closed
    }

    /// Refuse further acquisitions and drop everything cached.
    pub(crate) async fn seal(&self) -> usize {
        self.sealed.store(true, Ordering::SeqCst);
        let closed = self.shutdown_services(true).await;
        self.stateless.clear();
        self.rendering.clear();
        closed
    }

    /// Pixels ids with an open rendering engine.
    pub fn rendering_engine_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.rendering.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn rendering_engine(&self, pixels_id: i64) -> Option<Arc<StatefulHandle>> {
        self.rendering.get(&pixels_id).map(|entry| entry.value().clone())
    }

    /// Number of open handles tracked for `(kind, id)` (0 or 1).
    pub fn tracked(&self, kind: StatefulKind, id: i64) -> usize {
        self.stateful
            .get(&ResourceKey::new(kind, id))
            .filter(|cell| cell.initialized())
            .map(|_| 1)
            .unwrap_or(0)
    }

    /// Number of open unshared handles
    pub fn leased(&self) -> usize {
        self.leases.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            stateless: self.stateless.iter().filter(|e| e.value().initialized()).count(),
            stateful: self.stateful.iter().filter(|e| e.value().initialized()).count()
                + self.leases.len(),
            rendering_engines: self.rendering.len(),
        }
    }
}
