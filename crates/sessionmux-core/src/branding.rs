//! Centralized branding constants
//!
//! Product naming and the protocol defaults the gateway falls back to when
//! the surrounding application does not override them.

/// Human-readable product name
pub const DISPLAY_NAME: &str = "SessionMux";

/// Agent name registered with the object service when a session is created
pub const AGENT_NAME: &str = "sessionmux";

/// Prefix for rotated log files (e.g. `sessionmux.2026-01-22.log`)
pub const LOG_PREFIX: &str = "sessionmux";

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "SESSIONMUX_";

/// Default object-service port
pub const DEFAULT_PORT: u16 = 4064;

/// Mime type applied to uploads that don't specify one
pub const DEFAULT_MIMETYPE: &str = "application/octet-stream";

/// Agent string reported to the server, including the crate version
pub fn agent_string() -> String {
    format!("{}/{}", AGENT_NAME, env!("CARGO_PKG_VERSION"))
}
