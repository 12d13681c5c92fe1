//! Mock backend for testing
//!
//! In-memory implementation of the client library traits. One
//! [`MockBackend`] holds the canned replies, injected failures, stored
//! files and call counters shared by every session it opens.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use sessionmux_core::backend::ops;
use sessionmux_core::{
    FailureKind, FileStore, RemoteClient, RemoteDescriptor, RemoteFailure, RemoteResult,
    RemoteSession, ServiceKind, ServiceProxy, StatefulKind, StatefulProxy,
};

/// Version string the mock server reports
pub const SERVER_VERSION: &str = "5.6.3";

/// First id handed out for files created through the mock
pub const FIRST_CREATED_FILE_ID: i64 = 1000;

/// Failure of `kind` with a recognizable message.
pub fn failure(kind: FailureKind) -> RemoteFailure {
    let message = format!("injected {}", kind);
    RemoteFailure::new(kind, message)
}

// ============================================================================
// MockBackend
// ============================================================================

#[derive(Default)]
pub struct MockBackend {
    replies: Mutex<HashMap<String, Value>>,
    queued_replies: Mutex<HashMap<String, VecDeque<Value>>>,
    invoke_failures: Mutex<HashMap<String, VecDeque<RemoteFailure>>>,
    acquire_failures: Mutex<VecDeque<RemoteFailure>>,
    bind_failures: Mutex<VecDeque<RemoteFailure>>,
    /// create_session attempt number -> failure
    login_failures: Mutex<HashMap<usize, RemoteFailure>>,
    refuse_logins: AtomicBool,
    login_delay: Mutex<Duration>,
    open_delay: Mutex<Duration>,

    files: Mutex<HashMap<i64, Vec<u8>>>,
    next_file_id: AtomicI64,
    read_failure: Mutex<Option<(usize, RemoteFailure)>>,
    write_failure: Mutex<Option<(usize, RemoteFailure)>>,
    reads: Mutex<Vec<(u64, usize)>>,
    writes: Mutex<Vec<(u64, usize)>>,
    deleted: Mutex<Vec<i64>>,

    calls: Mutex<Vec<String>>,
    logins: Mutex<Vec<String>>,
    /// Agent reported by each successful login
    agents: Mutex<Vec<String>>,
    login_attempts: AtomicUsize,
    sessions_created: AtomicUsize,
    sessions_closed: AtomicUsize,
    stateless_created: AtomicUsize,
    stateful_requested: AtomicUsize,
    stateful_opened: AtomicUsize,
    stateful_closed: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        let backend = Self {
            next_file_id: AtomicI64::new(FIRST_CREATED_FILE_ID),
            ..Default::default()
        };
        {
            let mut replies = backend.replies.lock();
            replies.insert(ops::GET_VERSION.into(), json!(SERVER_VERSION));
            replies.insert(ops::GET_EVENT_CONTEXT.into(), json!({ "user": "alice" }));
            replies.insert(ops::LOOKUP_RENDERING_DEF.into(), json!(true));
            replies.insert(ops::GET_SCRIPT_ID.into(), json!(42));
            replies.insert(ops::RUN_SCRIPT.into(), json!({ "job_id": 7, "status": "queued" }));
            replies.insert(
                ops::LIST_SYSTEM_GROUPS.into(),
                json!([
                    { "id": 0, "name": "system" },
                    { "id": 1, "name": "user" },
                    { "id": 2, "name": "guest" },
                ]),
            );
            replies.insert(ops::GET_ENUMERATIONS.into(), json!(["uint8", "uint16", "float"]));
        }
        Arc::new(backend)
    }

    pub fn client(self: &Arc<Self>) -> Arc<dyn RemoteClient> {
        Arc::new(MockRemoteClient {
            backend: self.clone(),
        })
    }

    // --- canned behavior ----------------------------------------------------

    /// Reply to every later `operation` with `value`.
    pub fn reply(&self, operation: &str, value: Value) {
        self.replies.lock().insert(operation.to_string(), value);
    }

    /// Reply to the next `operation` only; later calls fall back to `reply`.
    pub fn reply_once(&self, operation: &str, value: Value) {
        self.queued_replies
            .lock()
            .entry(operation.to_string())
            .or_default()
            .push_back(value);
    }

    /// Fail the next invocation of `operation`.
    pub fn fail_invoke(&self, operation: &str, failure: RemoteFailure) {
        self.invoke_failures
            .lock()
            .entry(operation.to_string())
            .or_default()
            .push_back(failure);
    }

    /// Fail the next proxy acquisition (stateless or stateful).
    pub fn fail_next_acquire(&self, failure: RemoteFailure) {
        self.acquire_failures.lock().push_back(failure);
    }

    /// Fail the next attempt to bind a session to its group.
    pub fn fail_next_bind(&self, failure: RemoteFailure) {
        self.bind_failures.lock().push_back(failure);
    }

    /// Fail the `attempt`-th create_session call (0-based, counting all calls).
    pub fn fail_login_at(&self, attempt: usize, failure: RemoteFailure) {
        self.login_failures.lock().insert(attempt, failure);
    }

    pub fn refuse_logins(&self, refuse: bool) {
        self.refuse_logins.store(refuse, Ordering::SeqCst);
    }

    pub fn set_login_delay(&self, delay: Duration) {
        *self.login_delay.lock() = delay;
    }

    /// Delay before each stateful service opens.
    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock() = delay;
    }

    // --- files ----------------------------------------------------------------

    pub fn put_file(&self, id: i64, bytes: Vec<u8>) {
        self.files.lock().insert(id, bytes);
    }

    pub fn file(&self, id: i64) -> Option<Vec<u8>> {
        self.files.lock().get(&id).cloned()
    }

    /// Fail the `index`-th read (0-based, counting all reads).
    pub fn fail_read_at(&self, index: usize, failure: RemoteFailure) {
        *self.read_failure.lock() = Some((index, failure));
    }

    /// Fail the `index`-th write (0-based, counting all writes).
    pub fn fail_write_at(&self, index: usize, failure: RemoteFailure) {
        *self.write_failure.lock() = Some((index, failure));
    }

    /// Every read as `(offset, len)`
    pub fn reads(&self) -> Vec<(u64, usize)> {
        self.reads.lock().clone()
    }

    /// Every write as `(offset, len)`
    pub fn writes(&self) -> Vec<(u64, usize)> {
        self.writes.lock().clone()
    }

    /// Ids removed through `deleteObject`
    pub fn deleted(&self) -> Vec<i64> {
        self.deleted.lock().clone()
    }

    // --- counters -------------------------------------------------------------

    /// Number of times `operation` was invoked
    pub fn calls(&self, operation: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == operation).count()
    }

    /// Usernames of successful logins, in order
    pub fn agents(&self) -> Vec<String> {
        self.agents.lock().clone()
    }

    pub fn logins(&self) -> Vec<String> {
        self.logins.lock().clone()
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions_created.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.sessions_closed.load(Ordering::SeqCst)
    }

    pub fn stateless_created(&self) -> usize {
        self.stateless_created.load(Ordering::SeqCst)
    }

    /// Stateful opens started, including those still in flight
    pub fn stateful_requested(&self) -> usize {
        self.stateful_requested.load(Ordering::SeqCst)
    }

    pub fn stateful_opened(&self) -> usize {
        self.stateful_opened.load(Ordering::SeqCst)
    }

    pub fn stateful_closed(&self) -> usize {
        self.stateful_closed.load(Ordering::SeqCst)
    }

    // --- server side ------------------------------------------------------------

    fn pop_acquire_failure(&self) -> RemoteResult<()> {
        match self.acquire_failures.lock().pop_front() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    fn invoke(&self, operation: &str, args: Value) -> RemoteResult<Value> {
        self.calls.lock().push(operation.to_string());

        let injected = self
            .invoke_failures
            .lock()
            .get_mut(operation)
            .and_then(|queue| queue.pop_front());
        if let Some(failure) = injected {
            return Err(failure);
        }

        let queued = self
            .queued_replies
            .lock()
            .get_mut(operation)
            .and_then(|queue| queue.pop_front());
        if let Some(value) = queued {
            return Ok(value);
        }

        if let Some(value) = self.replies.lock().get(operation).cloned() {
            return Ok(value);
        }

        match operation {
            ops::FIND_ORIGINAL_FILE => {
                let id = args["id"].as_i64().unwrap_or_default();
                Ok(match self.files.lock().get(&id) {
                    Some(bytes) => descriptor_json(id, &format!("file-{}", id), bytes.len() as u64),
                    None => Value::Null,
                })
            }
            ops::SAVE_AND_RETURN_OBJECT => {
                let id = self.next_file_id.fetch_add(1, Ordering::SeqCst);
                let name = args["name"].as_str().unwrap_or("unnamed").to_string();
                let size = args["size"].as_u64().unwrap_or_default();
                Ok(descriptor_json(id, &name, size))
            }
            ops::DELETE_OBJECT => {
                if let Some(id) = args["id"].as_i64() {
                    self.deleted.lock().push(id);
                    self.files.lock().remove(&id);
                }
                Ok(Value::Null)
            }
            _ => Ok(Value::Null),
        }
    }
}

fn descriptor_json(id: i64, name: &str, size: u64) -> Value {
    serde_json::to_value(RemoteDescriptor::new(id, name, size)).expect("descriptor serializes")
}

// ============================================================================
// MockRemoteClient
// ============================================================================

pub struct MockRemoteClient {
    backend: Arc<MockBackend>,
}

#[async_trait]
impl RemoteClient for MockRemoteClient {
    async fn create_session(
        &self,
        _host: &str,
        _port: u16,
        username: &str,
        _password: &str,
        agent: &str,
    ) -> RemoteResult<Arc<dyn RemoteSession>> {
        let attempt = self.backend.login_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.backend.login_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.backend.refuse_logins.load(Ordering::SeqCst) {
            return Err(failure(FailureKind::AuthenticationFailed));
        }
        if let Some(failure) = self.backend.login_failures.lock().remove(&attempt) {
            return Err(failure);
        }

        self.backend.sessions_created.fetch_add(1, Ordering::SeqCst);
        self.backend.logins.lock().push(username.to_string());
        self.backend.agents.lock().push(agent.to_string());
        Ok(Arc::new(MockSession {
            backend: self.backend.clone(),
            group_id: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }
}

// ============================================================================
// MockSession
// ============================================================================

pub struct MockSession {
    backend: Arc<MockBackend>,
    group_id: Mutex<Option<i64>>,
    closed: AtomicBool,
}

impl MockSession {
    fn check_open(&self) -> RemoteResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(failure(FailureKind::CommunicatorDestroyed));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn set_security_context(&self, group_id: i64) -> RemoteResult<()> {
        if let Some(failure) = self.backend.bind_failures.lock().pop_front() {
            return Err(failure);
        }
        *self.group_id.lock() = Some(group_id);
        Ok(())
    }

    async fn stateless_service(&self, kind: ServiceKind) -> RemoteResult<Arc<dyn ServiceProxy>> {
        self.check_open()?;
        self.backend.pop_acquire_failure()?;
        self.backend.stateless_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockServiceProxy {
            backend: self.backend.clone(),
            kind,
        }))
    }

    async fn stateful_service(
        &self,
        kind: StatefulKind,
        id: i64,
    ) -> RemoteResult<Arc<dyn StatefulProxy>> {
        self.check_open()?;
        self.backend.stateful_requested.fetch_add(1, Ordering::SeqCst);
        let delay = *self.backend.open_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.backend.pop_acquire_failure()?;
        self.backend.stateful_opened.fetch_add(1, Ordering::SeqCst);

        let store = (kind == StatefulKind::RawFileStore)
            .then(|| MockFileStore::new(self.backend.clone(), id));
        Ok(Arc::new(MockStatefulProxy {
            backend: self.backend.clone(),
            kind,
            id,
            store,
        }))
    }

    async fn close(&self) -> RemoteResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.backend.sessions_closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

// ============================================================================
// Proxies
// ============================================================================

pub struct MockServiceProxy {
    backend: Arc<MockBackend>,
    kind: ServiceKind,
}

impl MockServiceProxy {
    pub fn kind(&self) -> ServiceKind {
        self.kind
    }
}

#[async_trait]
impl ServiceProxy for MockServiceProxy {
    async fn ping(&self) -> RemoteResult<()> {
        Ok(())
    }

    async fn invoke(&self, operation: &str, args: Value) -> RemoteResult<Value> {
        self.backend.invoke(operation, args)
    }
}

pub struct MockStatefulProxy {
    backend: Arc<MockBackend>,
    kind: StatefulKind,
    id: i64,
    store: Option<MockFileStore>,
}

impl MockStatefulProxy {
    pub fn resource(&self) -> (StatefulKind, i64) {
        (self.kind, self.id)
    }
}

#[async_trait]
impl ServiceProxy for MockStatefulProxy {
    async fn ping(&self) -> RemoteResult<()> {
        Ok(())
    }

    async fn invoke(&self, operation: &str, args: Value) -> RemoteResult<Value> {
        self.backend.invoke(operation, args)
    }
}

#[async_trait]
impl StatefulProxy for MockStatefulProxy {
    async fn close(&self) -> RemoteResult<()> {
        self.backend.stateful_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_file_store(&self) -> Option<&dyn FileStore> {
        self.store.as_ref().map(|store| store as &dyn FileStore)
    }
}

// ============================================================================
// MockFileStore
// ============================================================================

pub struct MockFileStore {
    backend: Arc<MockBackend>,
    file_id: i64,
    /// Bytes written since the store opened
    buffer: Mutex<Vec<u8>>,
}

impl MockFileStore {
    /// Store over file `file_id` of `backend`, outside any session.
    pub fn new(backend: Arc<MockBackend>, file_id: i64) -> Self {
        Self {
            backend,
            file_id,
            buffer: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl FileStore for MockFileStore {
    async fn read(&self, offset: u64, len: usize) -> RemoteResult<Vec<u8>> {
        let index = {
            let mut reads = self.backend.reads.lock();
            reads.push((offset, len));
            reads.len() - 1
        };
        {
            let mut injected = self.backend.read_failure.lock();
            if injected.as_ref().map(|(at, _)| *at == index).unwrap_or(false) {
                if let Some((_, failure)) = injected.take() {
                    return Err(failure);
                }
            }
        }

        let files = self.backend.files.lock();
        let bytes = files
            .get(&self.file_id)
            .ok_or_else(|| failure(FailureKind::ObjectNotExist))?;
        let start = (offset as usize).min(bytes.len());
        let end = (start + len).min(bytes.len());
        Ok(bytes[start..end].to_vec())
    }

    async fn write(&self, offset: u64, data: &[u8]) -> RemoteResult<()> {
        let index = {
            let mut writes = self.backend.writes.lock();
            writes.push((offset, data.len()));
            writes.len() - 1
        };
        {
            let mut injected = self.backend.write_failure.lock();
            if injected.as_ref().map(|(at, _)| *at == index).unwrap_or(false) {
                if let Some((_, failure)) = injected.take() {
                    return Err(failure);
                }
            }
        }

        let mut buffer = self.buffer.lock();
        let end = offset as usize + data.len();
        if buffer.len() < end {
            buffer.resize(end, 0);
        }
        buffer[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    async fn save(&self) -> RemoteResult<RemoteDescriptor> {
        let bytes = self.buffer.lock().clone();
        let size = bytes.len() as u64;
        self.backend.files.lock().insert(self.file_id, bytes);
        Ok(RemoteDescriptor::new(self.file_id, format!("file-{}", self.file_id), size))
    }
}
