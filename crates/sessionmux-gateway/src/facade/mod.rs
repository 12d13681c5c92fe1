//! Session gateway facade
//!
//! The surface the application talks to. Wraps the pool with the calls an
//! image client actually makes: login and warm-up, classified business
//! calls, rendering engines with their one-time preparation, thumbnail
//! stores, file download/upload, script jobs and cached lookups.
//!
//! Value-returning calls answer `Ok(None)` when a failure was swallowed
//! because the pool was reconnecting at the time.

mod dependencies;
mod startup;

pub use dependencies::{DependenciesBuilder, GatewayDependencies};
pub use startup::StartupOrchestrator;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use sessionmux_core::backend::ops;
use sessionmux_core::{
    ContextEngines, Credentials, EventReceiver, FailureKind, GatewayError, GatewayResult,
    RemoteDescriptor, RemoteFailure, RemoteResult, SecurityContext, ServiceKind,
    SharedEventBus, StatefulKind,
};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::logging::{CallSpan, TraceContext};
use crate::pool::{
    ConnectionPool, KeepAliveReport, PoolServices, PoolStats, ServiceFactory, ServiceHandle,
    StatefulHandle,
};
use crate::services::{SystemGroup, SYSTEM_GROUP_NAMES};
use crate::transfer::{ChunkedTransfer, TransferError};

pub const NO_CONTEXT_MESSAGE: &str = "No security context to log in with.";
pub const LOCAL_IO_MESSAGE: &str = "Cannot access the local file.";
pub const NOT_A_FILE_STORE_MESSAGE: &str = "The service does not expose file data.";
pub const PREPARE_ABANDONED_MESSAGE: &str = "Rendering engine preparation was interrupted.";
pub const SCRIPT_NOT_FOUND_MESSAGE: &str = "Script not found.";
pub const SCRIPT_FAILED_MESSAGE: &str = "Cannot start the script.";

/// Outcome of login and context warm-up
#[derive(Debug, Clone, Default)]
pub struct WarmupResult {
    /// Contexts with a live session, primary first
    pub connected: Vec<SecurityContext>,
    /// Contexts that could not be warmed, with the reason
    pub failed: Vec<(SecurityContext, String)>,
    pub server_version: Option<String>,
}

impl WarmupResult {
    pub fn primary(&self) -> Option<&SecurityContext> {
        self.connected.first()
    }
}

pub struct SessionGateway {
    config: GatewayConfig,
    services: PoolServices,
    transfer: ChunkedTransfer,
    event_bus: SharedEventBus,
}

impl SessionGateway {
    pub fn new(deps: GatewayDependencies) -> Self {
        let services = ServiceFactory::create_pool_services(
            deps.client.clone(),
            &deps.config,
            deps.event_bus.sender(),
        );
        Self {
            transfer: ChunkedTransfer::new(deps.config.chunk_size),
            config: deps.config,
            services,
            event_bus: deps.event_bus,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn pool(&self) -> Arc<ConnectionPool> {
        self.services.pool.clone()
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }

    /// Context for `group_id` on `host` with the configured port and transfer settings.
    pub fn context_for(&self, group_id: i64, host: impl Into<String>) -> SecurityContext {
        SecurityContext::new(group_id, host, self.config.default_port).with_encrypted(self.config.encrypted)
    }

    async fn traced<T, Fut>(&self, operation: &str, ctx: &SecurityContext, fut: Fut) -> GatewayResult<T>
    where
        Fut: Future<Output = GatewayResult<T>>,
    {
        let trace = TraceContext::new(operation).with_context(ctx);
        let result = fut.instrument(CallSpan::enter(&trace)).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind_name(),
        };
        CallSpan::log_exit(&trace, outcome);
        result
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    /// Log in and warm `contexts`.
    ///
    /// The first context must connect, otherwise the pool is logged out and
    /// the error returned. The others are warmed best-effort.
    pub async fn login(&self, credentials: Credentials, contexts: &[SecurityContext]) -> GatewayResult<WarmupResult> {
        let Some((primary, rest)) = contexts.split_first() else {
            return Err(GatewayError::connection(NO_CONTEXT_MESSAGE));
        };
        let pool = &self.services.pool;

        if pool.has_credentials().await {
            pool.logout().await;
        }
        pool.set_credentials(credentials).await;

        if let Err(e) = pool.resolve(primary).await {
            pool.logout().await;
            return Err(e);
        }

        let mut result = WarmupResult {
            connected: vec![primary.clone()],
            ..Default::default()
        };
        for ctx in rest {
            match pool.resolve(ctx).await {
                Ok(_) => result.connected.push(ctx.clone()),
                Err(e) => {
                    warn!(group_id = ctx.group_id, error = %e, "[Gateway] Warm-up failed");
                    result.failed.push((ctx.clone(), e.to_string()));
                }
            }
        }

        result.server_version = match self.server_version(primary).await {
            Ok(version) => version,
            Err(e) => {
                warn!(error = %e, "[Gateway] Cannot read server version");
                None
            }
        };

        info!(
            connected = result.connected.len(),
            failed = result.failed.len(),
            "[Gateway] Logged in"
        );
        Ok(result)
    }

    pub async fn logout(&self) {
        self.services.pool.logout().await;
    }

    /// Re-authenticate every known context. See [`ConnectionPool::reconnect_all`].
    pub async fn reconnect(&self, username: &str, password: &str) -> bool {
        self.services.pool.reconnect_all(username, password).await
    }

    pub fn start_keep_alive(&self) -> bool {
        self.services.keep_alive.start()
    }

    pub async fn stop_keep_alive(&self) {
        self.services.keep_alive.stop().await;
    }

    pub async fn keep_alive_now(&self) -> KeepAliveReport {
        self.services.keep_alive.sweep_now().await
    }

    pub async fn is_server_running(&self, ctx: &SecurityContext) -> bool {
        match self.services.pool.get_service(ctx, ServiceKind::Admin).await {
            Ok(handle) => handle.proxy().ping().await.is_ok(),
            Err(_) => false,
        }
    }

    pub async fn stats(&self) -> PoolStats {
        self.services.pool.stats().await
    }

    // ========================================================================
    // Services
    // ========================================================================

    pub async fn get_service(&self, ctx: &SecurityContext, kind: ServiceKind) -> GatewayResult<ServiceHandle> {
        self.services.pool.get_service(ctx, kind).await
    }

    pub async fn get_stateful(
        &self,
        ctx: &SecurityContext,
        kind: StatefulKind,
        id: i64,
    ) -> GatewayResult<Arc<StatefulHandle>> {
        self.services.pool.get_stateful(ctx, kind, id).await
    }

    pub async fn close_service(&self, ctx: &SecurityContext, handle: &Arc<StatefulHandle>) {
        self.services.pool.close_service(ctx, handle).await;
    }

    pub async fn shutdown_services(&self, include_rendering: bool) -> usize {
        self.services.pool.shutdown_services(include_rendering).await
    }

    /// Run one remote operation on a stateless service.
    pub async fn invoke(
        &self,
        ctx: &SecurityContext,
        kind: ServiceKind,
        operation: &str,
        args: Value,
    ) -> GatewayResult<Option<Value>> {
        self.traced(operation, ctx, self.call(ctx, kind, operation, args)).await
    }

    async fn call(
        &self,
        ctx: &SecurityContext,
        kind: ServiceKind,
        operation: &str,
        args: Value,
    ) -> GatewayResult<Option<Value>> {
        let handle = self.services.pool.get_service(ctx, kind).await?;
        match handle.invoke(operation, args).await {
            Ok(value) => Ok(Some(value)),
            Err(failure) => {
                self.services
                    .pool
                    .handle_failure(ctx, handle.connector_id(), &failure, operation)
                    .await?;
                Ok(None)
            }
        }
    }

    // ========================================================================
    // Rendering and thumbnails
    // ========================================================================

    /// Rendering engine for `pixels_id`, prepared on first acquisition.
    pub async fn rendering_engine(&self, ctx: &SecurityContext, pixels_id: i64) -> GatewayResult<Arc<StatefulHandle>> {
        let pool = &self.services.pool;
        let handle = pool
            .get_stateful(ctx, StatefulKind::RenderingEngine, pixels_id)
            .await?;

        if let Err(failure) = handle
            .prepare_with(|| prepare_rendering(&handle, pixels_id))
            .await
        {
            pool.close_service(ctx, &handle).await;
            let err = match pool
                .handle_failure(ctx, handle.connector_id(), &failure, ops::LOOKUP_RENDERING_DEF)
                .await
            {
                Err(err) => err,
                Ok(()) => GatewayError::connection(PREPARE_ABANDONED_MESSAGE).with_cause(failure),
            };
            return Err(err);
        }
        Ok(handle)
    }

    /// Thumbnail store leased for one configured batch of retrievals.
    pub async fn thumbnail_store(&self, ctx: &SecurityContext) -> GatewayResult<Arc<StatefulHandle>> {
        self.services
            .pool
            .get_stateful(ctx, StatefulKind::ThumbnailStore, i64::from(self.config.thumbnail_batch))
            .await
    }

    pub async fn rendering_engines(&self) -> Vec<ContextEngines> {
        self.services.pool.rendering_engines().await
    }

    /// Engines to reload after the last reconnect; empties the list.
    pub fn take_rendering_engines_to_reactivate(&self) -> Vec<ContextEngines> {
        self.services.pool.take_rendering_engines_to_reactivate()
    }

    // ========================================================================
    // Files
    // ========================================================================

    /// Descriptor of an original file.
    pub async fn file_descriptor(&self, ctx: &SecurityContext, file_id: i64) -> GatewayResult<Option<RemoteDescriptor>> {
        let Some(value) = self
            .call(ctx, ServiceKind::Query, ops::FIND_ORIGINAL_FILE, json!({ "id": file_id }))
            .await?
        else {
            return Ok(None);
        };
        if value.is_null() {
            return Err(GatewayError::access(format!("File {} not found.", file_id)));
        }
        decode(value, ops::FIND_ORIGINAL_FILE).map(Some)
    }

    /// Download an original file to `dest`. The size is looked up when not given.
    pub async fn download_file(
        &self,
        ctx: &SecurityContext,
        file_id: i64,
        size: Option<u64>,
        dest: &Path,
    ) -> GatewayResult<Option<PathBuf>> {
        self.traced("download_file", ctx, async {
            let size = match size {
                Some(size) => size,
                None => match self.file_descriptor(ctx, file_id).await? {
                    Some(descriptor) => descriptor.size,
                    None => return Ok(None),
                },
            };

            let pool = &self.services.pool;
            let handle = pool.open_stateful(ctx, StatefulKind::RawFileStore, file_id).await?;
            let result = match handle.proxy().as_file_store() {
                Some(store) => self.transfer.download_to_path(store, size, dest).await,
                None => Err(TransferError::NotAFileStore),
            };
            pool.close_service(ctx, &handle).await;

            match result {
                Ok(_) => Ok(Some(dest.to_path_buf())),
                Err(e) => self
                    .transfer_failure(ctx, handle.connector_id(), e, "download_file")
                    .await
                    .map(|()| None),
            }
        })
        .await
    }

    /// Upload `source`, into `existing` when given, otherwise into a new
    /// remote file that is deleted again if the transfer fails.
    pub async fn upload_file(
        &self,
        ctx: &SecurityContext,
        source: &Path,
        existing: Option<RemoteDescriptor>,
    ) -> GatewayResult<Option<RemoteDescriptor>> {
        self.traced("upload_file", ctx, async {
            let (descriptor, created) = match existing {
                Some(descriptor) => (descriptor, false),
                None => match self.create_descriptor(ctx, source).await? {
                    Some(descriptor) => (descriptor, true),
                    None => return Ok(None),
                },
            };

            let pool = &self.services.pool;
            let handle = match pool.open_stateful(ctx, StatefulKind::RawFileStore, descriptor.id).await {
                Ok(handle) => handle,
                Err(e) => {
                    if created {
                        self.delete_descriptor(ctx, descriptor.id).await;
                    }
                    return Err(e);
                }
            };

            let result = match handle.proxy().as_file_store() {
                Some(store) => self.transfer.upload_from_path(store, source).await,
                None => Err(TransferError::NotAFileStore),
            };
            pool.close_service(ctx, &handle).await;

            match result {
                Ok(saved) => Ok(Some(saved)),
                Err(e) => {
                    if created {
                        self.delete_descriptor(ctx, descriptor.id).await;
                    }
                    self.transfer_failure(ctx, handle.connector_id(), e, "upload_file")
                        .await
                        .map(|()| None)
                }
            }
        })
        .await
    }

    async fn create_descriptor(&self, ctx: &SecurityContext, source: &Path) -> GatewayResult<Option<RemoteDescriptor>> {
        let metadata = tokio::fs::metadata(source)
            .await
            .map_err(|e| GatewayError::access(LOCAL_IO_MESSAGE).with_cause(e))?;
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = source
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let draft = RemoteDescriptor::new(0, name, metadata.len()).with_path(path);

        let args = json!({
            "name": draft.name,
            "path": draft.path,
            "size": draft.size,
            "mimetype": draft.mimetype,
        });
        match self
            .call(ctx, ServiceKind::Update, ops::SAVE_AND_RETURN_OBJECT, args)
            .await?
        {
            Some(value) => decode(value, ops::SAVE_AND_RETURN_OBJECT).map(Some),
            None => Ok(None),
        }
    }

    /// Best-effort removal of a descriptor created for a failed upload.
    async fn delete_descriptor(&self, ctx: &SecurityContext, file_id: i64) {
        if let Err(e) = self
            .call(ctx, ServiceKind::Update, ops::DELETE_OBJECT, json!({ "id": file_id }))
            .await
        {
            warn!(file_id = file_id, error = %e, "[Gateway] Cannot delete file after failed upload");
        }
    }

    async fn transfer_failure(
        &self,
        ctx: &SecurityContext,
        connector_id: Uuid,
        error: TransferError,
        operation: &str,
    ) -> GatewayResult<()> {
        warn!(group_id = ctx.group_id, error = %error, "[Gateway] Transfer failed");
        match error {
            TransferError::Remote { source, .. } => {
                self.services
                    .pool
                    .handle_failure(ctx, connector_id, &source, operation)
                    .await
            }
            TransferError::Io(e) => Err(GatewayError::access(LOCAL_IO_MESSAGE).with_cause(e)),
            TransferError::NotAFileStore => Err(GatewayError::access(NOT_A_FILE_STORE_MESSAGE)),
            other @ TransferError::ShortRead { .. } => Err(GatewayError::access(other.to_string())),
        }
    }

    // ========================================================================
    // Scripts
    // ========================================================================

    /// Launch the script called `name` with `params`. Returns the job description.
    pub async fn run_script(&self, ctx: &SecurityContext, name: &str, params: Value) -> GatewayResult<Option<Value>> {
        self.traced("run_script", ctx, async {
            let handle = self.services.pool.get_service(ctx, ServiceKind::Script).await?;

            let script_id = match handle.invoke(ops::GET_SCRIPT_ID, json!({ "name": name })).await {
                Ok(value) => value.as_i64().filter(|id| *id >= 0),
                Err(failure) => return self.script_failure(ctx, &handle, name, failure).await,
            };
            let Some(script_id) = script_id else {
                return Err(GatewayError::process(name, SCRIPT_NOT_FOUND_MESSAGE));
            };

            let args = json!({ "script_id": script_id, "params": params });
            match handle.invoke(ops::RUN_SCRIPT, args).await {
                Ok(job) => {
                    info!(script = name, script_id = script_id, "[Gateway] Script launched");
                    Ok(Some(job))
                }
                Err(failure) => self.script_failure(ctx, &handle, name, failure).await,
            }
        })
        .await
    }

    async fn script_failure(
        &self,
        ctx: &SecurityContext,
        handle: &ServiceHandle,
        name: &str,
        failure: RemoteFailure,
    ) -> GatewayResult<Option<Value>> {
        match self
            .services
            .pool
            .handle_failure(ctx, handle.connector_id(), &failure, ops::RUN_SCRIPT)
            .await
        {
            Ok(()) => Ok(None),
            Err(_) => Err(GatewayError::process(name, SCRIPT_FAILED_MESSAGE).with_cause(failure)),
        }
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub async fn server_version(&self, ctx: &SecurityContext) -> GatewayResult<Option<String>> {
        let cache = self.services.pool.lookups();
        if let Some(version) = cache.server_version() {
            return Ok(Some(version));
        }
        let Some(value) = self.call(ctx, ServiceKind::Config, ops::GET_VERSION, Value::Null).await? else {
            return Ok(None);
        };
        let version: String = decode(value, ops::GET_VERSION)?;
        cache.set_server_version(version.clone());
        Ok(Some(version))
    }

    /// The built-in groups (system, user, guest).
    pub async fn system_groups(&self, ctx: &SecurityContext) -> GatewayResult<Option<Vec<SystemGroup>>> {
        let cache = self.services.pool.lookups();
        if let Some(groups) = cache.system_groups() {
            return Ok(Some(groups));
        }
        let args = json!({ "names": SYSTEM_GROUP_NAMES });
        let Some(value) = self.call(ctx, ServiceKind::Admin, ops::LIST_SYSTEM_GROUPS, args).await? else {
            return Ok(None);
        };
        cache.set_system_groups(decode(value, ops::LIST_SYSTEM_GROUPS)?);
        Ok(cache.system_groups())
    }

    /// All values of the enumeration `kind`.
    pub async fn enumerations(&self, ctx: &SecurityContext, kind: &str) -> GatewayResult<Option<Vec<Value>>> {
        let cache = self.services.pool.lookups();
        if let Some(values) = cache.enumerations(kind) {
            return Ok(Some(values));
        }
        let Some(value) = self
            .call(ctx, ServiceKind::Pixels, ops::GET_ENUMERATIONS, json!({ "type": kind }))
            .await?
        else {
            return Ok(None);
        };
        let values: Vec<Value> = decode(value, ops::GET_ENUMERATIONS)?;
        cache.set_enumerations(kind, values.clone());
        Ok(Some(values))
    }
}

/// Look up the rendering settings, creating defaults when there are none,
/// then load them into the engine.
async fn prepare_rendering(handle: &StatefulHandle, pixels_id: i64) -> RemoteResult<()> {
    let args = json!({ "pixels_id": pixels_id });
    let lookup = move |args: Value| async move {
        handle
            .invoke(ops::LOOKUP_RENDERING_DEF, args)
            .await
            .map(|v| v.as_bool().unwrap_or(false))
    };

    if !lookup(args.clone()).await? {
        handle.invoke(ops::RESET_DEFAULTS, args.clone()).await?;
        if !lookup(args).await? {
            return Err(RemoteFailure::new(
                FailureKind::ApiUsage,
                format!("no rendering settings for pixels {}", pixels_id),
            ));
        }
    }
    handle.invoke(ops::LOAD_RENDERING_DEF, Value::Null).await?;
    Ok(())
}

fn decode<T: DeserializeOwned>(value: Value, operation: &str) -> GatewayResult<T> {
    serde_json::from_value(value).map_err(|e| {
        warn!(operation = operation, error = %e, "[Gateway] Unexpected reply");
        GatewayError::access(format!("Unexpected reply to {}.", operation))
    })
}
