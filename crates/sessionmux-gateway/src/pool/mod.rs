//! Connection pool module
//!
//! Components:
//! - `ConnectionPool`: resolves contexts to connectors, retry-once acquisition
//! - `Connector`: one session bound to one security context
//! - `ServiceProxyCache`: lazily created stateless proxies, tracked stateful handles
//! - `SessionService`: opens and binds sessions
//! - `KeepAliveScheduler`: periodic touch of every connector
//! - `ServiceFactory`: wiring of the above

mod connector;
mod keep_alive;
mod proxy_cache;
mod service;
mod service_factory;
mod session;

pub use connector::{Connector, ConnectorState, ConnectorStats};
pub use keep_alive::KeepAliveScheduler;
pub use proxy_cache::{CacheStats, ServiceHandle, ServiceProxyCache, StatefulHandle};
pub use service::{
    ConnectionPool, KeepAliveReport, PoolStats, NOT_LOGGED_IN_MESSAGE, RETRY_FAILED_MESSAGE,
};
pub use service_factory::{PoolServices, ServiceFactory};
pub use session::{SessionService, CONNECTOR_FAILED_MESSAGE};
