//! SessionMux Gateway
//!
//! Pooled multi-context sessions to a remote object service:
//! - One authenticated session per security context, created on first use
//! - Lazily acquired, cached service proxies per session
//! - Failure classification with a single rebuild-and-retry on broken transport
//! - Explicit lifecycle for stateful server resources
//! - Periodic keep-alive of idle sessions
//! - Chunked transfer of binary payloads in both directions

pub mod classifier;
pub mod config;
pub mod facade;
pub mod logging;
pub mod pool;
pub mod services;
pub mod transfer;

pub use classifier::{ExceptionClassifier, Outcome};
pub use config::GatewayConfig;
pub use facade::{DependenciesBuilder, GatewayDependencies, SessionGateway, StartupOrchestrator, WarmupResult};
pub use pool::{
    ConnectionPool, Connector, ConnectorState, ConnectorStats, KeepAliveReport, KeepAliveScheduler,
    PoolServices, PoolStats, ServiceFactory, ServiceHandle, ServiceProxyCache, SessionService,
    StatefulHandle,
};
pub use services::{LookupCache, SystemGroup};
pub use transfer::{ChunkedTransfer, TransferError, DEFAULT_CHUNK_SIZE};
