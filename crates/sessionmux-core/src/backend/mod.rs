//! Backend contracts
//!
//! Traits the remote object-service client library must satisfy. The
//! gateway never speaks the wire protocol itself; it only drives these
//! seams, which keeps the pool testable against in-memory mocks.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{RemoteDescriptor, ServiceKind, StatefulKind};
use crate::error::RemoteResult;

/// Operation names understood by the object service.
pub mod ops {
    /// Admin: fetch the caller's event context (used as a no-op keep-alive)
    pub const GET_EVENT_CONTEXT: &str = "getEventContext";
    /// Config: server version string
    pub const GET_VERSION: &str = "getVersion";
    /// Query: original file descriptor by id
    pub const FIND_ORIGINAL_FILE: &str = "findOriginalFile";
    /// Update: create or update an object, returning it
    pub const SAVE_AND_RETURN_OBJECT: &str = "saveAndReturnObject";
    /// Update: delete an object
    pub const DELETE_OBJECT: &str = "deleteObject";
    /// Script: id of a script by name
    pub const GET_SCRIPT_ID: &str = "getScriptID";
    /// Script: launch a script as a job
    pub const RUN_SCRIPT: &str = "runScript";
    /// RenderingEngine: look up the rendering definition for the pixels set
    pub const LOOKUP_RENDERING_DEF: &str = "lookupRenderingDef";
    /// RenderingEngine: create default rendering settings
    pub const RESET_DEFAULTS: &str = "resetDefaults";
    /// RenderingEngine: load the current rendering definition
    pub const LOAD_RENDERING_DEF: &str = "load";
    /// Admin: list the built-in groups
    pub const LIST_SYSTEM_GROUPS: &str = "lookupGroups";
    /// Pixels: all values of an enumeration
    pub const GET_ENUMERATIONS: &str = "getAllEnumerations";
}

/// Entry point of the client library: authenticates and opens sessions.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// `agent` names this client to the server for its session listings.
    async fn create_session(
        &self,
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        agent: &str,
    ) -> RemoteResult<Arc<dyn RemoteSession>>;
}

/// One authenticated session on the object service.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Bind the session to a group.
    async fn set_security_context(&self, group_id: i64) -> RemoteResult<()>;

    async fn stateless_service(&self, kind: ServiceKind) -> RemoteResult<Arc<dyn ServiceProxy>>;

    /// Open a stateful service holding server memory for `id`.
    async fn stateful_service(
        &self,
        kind: StatefulKind,
        id: i64,
    ) -> RemoteResult<Arc<dyn StatefulProxy>>;

    async fn close(&self) -> RemoteResult<()>;
}

/// Remote service proxy.
#[async_trait]
pub trait ServiceProxy: Send + Sync {
    /// Cheap liveness check on the proxy's transport.
    async fn ping(&self) -> RemoteResult<()>;

    /// Run one remote operation.
    async fn invoke(&self, operation: &str, args: Value) -> RemoteResult<Value>;
}

/// Proxy for a resource that must be closed explicitly.
#[async_trait]
pub trait StatefulProxy: ServiceProxy {
    async fn close(&self) -> RemoteResult<()>;

    /// Byte-level access when the resource is a file store.
    fn as_file_store(&self) -> Option<&dyn FileStore> {
        None
    }
}

/// Random-access byte store backed by a remote file.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Read up to `len` bytes starting at `offset`.
    async fn read(&self, offset: u64, len: usize) -> RemoteResult<Vec<u8>>;

    async fn write(&self, offset: u64, data: &[u8]) -> RemoteResult<()>;

    /// Commit written bytes and return the stored descriptor.
    async fn save(&self) -> RemoteResult<RemoteDescriptor>;
}
