//! Gateway events - lifecycle facts broadcast to the application
//!
//! Events are emitted by the connection pool and the keep-alive sweep and
//! consumed by whoever subscribes to the event bus (UI, audit log, tests).
//! Events never carry credentials.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SecurityContext;

/// Rendering engines open under one context, by pixels id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEngines {
    pub context: SecurityContext,
    pub pixels_ids: Vec<i64>,
}

/// Connection lifecycle event.
///
/// Serializes with a `type` field containing the snake_case variant name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// A session was created for a context
    ConnectorCreated {
        connector_id: Uuid,
        context: SecurityContext,
    },

    /// A connector was shut down and removed from the pool
    ConnectorDropped {
        connector_id: Uuid,
        context: SecurityContext,
        reason: String,
    },

    /// A transport failure marked a connector as broken
    ConnectionLost {
        context: SecurityContext,
        message: String,
    },

    /// Every known context was re-authenticated
    Reconnected {
        contexts: usize,
        engines: Vec<ContextEngines>,
    },

    /// Re-authentication failed and the pool was logged out
    ReconnectFailed {
        message: String,
    },

    /// All sessions were closed
    LoggedOut {
        connectors: usize,
    },

    /// A keep-alive touch failed for one connector
    KeepAliveFailed {
        context: SecurityContext,
        message: String,
    },
}

impl GatewayEvent {
    /// Get the event type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ConnectorCreated { .. } => "connector_created",
            Self::ConnectorDropped { .. } => "connector_dropped",
            Self::ConnectionLost { .. } => "connection_lost",
            Self::Reconnected { .. } => "reconnected",
            Self::ReconnectFailed { .. } => "reconnect_failed",
            Self::LoggedOut { .. } => "logged_out",
            Self::KeepAliveFailed { .. } => "keep_alive_failed",
        }
    }

    /// Context the event concerns, if it concerns exactly one.
    pub fn context(&self) -> Option<&SecurityContext> {
        match self {
            Self::ConnectorCreated { context, .. }
            | Self::ConnectorDropped { context, .. }
            | Self::ConnectionLost { context, .. }
            | Self::KeepAliveFailed { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Whether the application should treat the session state as degraded.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost { .. } | Self::ReconnectFailed { .. } | Self::KeepAliveFailed { .. }
        )
    }
}

/// Metadata wrapper for events (used by audit consumers)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEventEnvelope {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: GatewayEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl GatewayEventEnvelope {
    pub fn new(event: GatewayEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
            trace_id: None,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}
