//! # SessionMux Core Library
//!
//! Domain types, backend contracts, and the error taxonomy shared by the
//! session gateway and its callers.
//!
//! ## Modules
//!
//! - `branding` - Product naming and protocol defaults
//! - `domain` - Value types (SecurityContext, Credentials, service kinds, events)
//! - `backend` - Traits the remote object-service client library must satisfy
//! - `error` - Remote failures and the four caller-visible error kinds
//! - `event_bus` - Broadcast distribution of gateway events

pub mod backend;
pub mod branding;
pub mod domain;
pub mod error;
pub mod event_bus;

// Re-export commonly used types
pub use backend::*;
pub use domain::*;
pub use error::{ErrorCause, FailureKind, GatewayError, GatewayResult, RemoteFailure, RemoteResult};

pub use event_bus::{create_shared_event_bus, EventBus, EventReceiver, EventSender, SharedEventBus};
