//! Domain value types and events
//!
//! This module contains the domain-level types for SessionMux:
//! - Value objects (SecurityContext, Credentials, ServiceKind, RemoteDescriptor)
//! - Domain events (GatewayEvent enum broadcast on the event bus)

mod context;
mod credential;
mod descriptor;
mod event;
mod service_kind;

pub use context::{SecurityContext, DEFAULT_COMPRESSION};
pub use credential::Credentials;
pub use descriptor::RemoteDescriptor;
pub use event::{ContextEngines, GatewayEvent, GatewayEventEnvelope};
pub use service_kind::{ResourceKey, ServiceKind, StatefulKind};
