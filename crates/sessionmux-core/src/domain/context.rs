//! Security context - the scope a session operates under
//!
//! A context names the group whose data a session may touch and the server
//! the session lives on. The pool keys connectors by context value, so
//! equality deliberately ignores the transfer settings.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Default compression level for image and thumbnail transfer
pub const DEFAULT_COMPRESSION: f32 = 0.85;

/// Authentication/authorization scope for a session.
///
/// Two contexts are equal iff `group_id`, `host` and `port` match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityContext {
    /// Group the session is bound to
    pub group_id: i64,
    /// Server host name
    pub host: String,
    /// Server port
    pub port: u16,
    /// Transfer compression level (0.0 - 1.0)
    pub compression: f32,
    /// Whether data transfer is encrypted
    pub encrypted: bool,
}

impl SecurityContext {
    /// Create a context for a group on a server with default transfer settings.
    pub fn new(group_id: i64, host: impl Into<String>, port: u16) -> Self {
        Self {
            group_id,
            host: host.into(),
            port,
            compression: DEFAULT_COMPRESSION,
            encrypted: true,
        }
    }

    /// Set the compression level (builder pattern). Clamped to `[0, 1]`.
    pub fn with_compression(mut self, compression: f32) -> Self {
        self.compression = compression.clamp(0.0, 1.0);
        self
    }

    /// Set whether transfer is encrypted (builder pattern).
    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    /// `host:port` for logging.
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl PartialEq for SecurityContext {
    fn eq(&self, other: &Self) -> bool {
        self.group_id == other.group_id && self.host == other.host && self.port == other.port
    }
}

impl Eq for SecurityContext {}

impl Hash for SecurityContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.group_id.hash(state);
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group {}@{}:{}", self.group_id, self.host, self.port)
    }
}
