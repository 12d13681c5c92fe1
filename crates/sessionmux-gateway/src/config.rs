//! Gateway configuration
//!
//! Defaults suit a desktop client talking to a single object server.
//! `from_env` overlays `SESSIONMUX_*` variables (and a `.env` file, if any)
//! on top of the defaults.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sessionmux_core::branding;

use crate::transfer::DEFAULT_CHUNK_SIZE;

/// Default keep-alive interval (5 minutes)
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 300;

/// Default number of thumbnails retrieved from one store before it is replaced
pub const DEFAULT_THUMBNAIL_BATCH: u32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Port used when a context does not name one
    pub default_port: u16,
    /// Bytes per read/write during file transfer
    pub chunk_size: usize,
    /// Seconds between keep-alive sweeps
    pub keep_alive_secs: u64,
    /// Start the keep-alive sweep automatically after login
    pub keep_alive_enabled: bool,
    /// Retrieval budget of one thumbnail store
    pub thumbnail_batch: u32,
    /// Request encrypted transfer for new contexts
    pub encrypted: bool,
    /// Agent name reported to the server
    pub agent: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_port: branding::DEFAULT_PORT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            keep_alive_enabled: true,
            thumbnail_batch: DEFAULT_THUMBNAIL_BATCH,
            encrypted: true,
            agent: branding::agent_string(),
        }
    }
}

impl GatewayConfig {
    /// Load defaults, then apply `.env` and `SESSIONMUX_*` overrides.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::default().apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup. Keys are the upper-cased field
    /// names with the branding prefix, e.g. `SESSIONMUX_CHUNK_SIZE`.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", branding::ENV_PREFIX, name));

        if let Some(v) = var("DEFAULT_PORT") {
            self.default_port = v.parse().with_context(|| format!("invalid port '{}'", v))?;
        }
        if let Some(v) = var("CHUNK_SIZE") {
            self.chunk_size = v.parse().with_context(|| format!("invalid chunk size '{}'", v))?;
        }
        if let Some(v) = var("KEEP_ALIVE_SECS") {
            self.keep_alive_secs = v
                .parse()
                .with_context(|| format!("invalid keep-alive interval '{}'", v))?;
        }
        if let Some(v) = var("KEEP_ALIVE_ENABLED") {
            self.keep_alive_enabled = parse_flag(&v)?;
        }
        if let Some(v) = var("THUMBNAIL_BATCH") {
            self.thumbnail_batch = v
                .parse()
                .with_context(|| format!("invalid thumbnail batch '{}'", v))?;
        }
        if let Some(v) = var("ENCRYPTED") {
            self.encrypted = parse_flag(&v)?;
        }
        if let Some(v) = var("AGENT") {
            self.agent = v;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk_size must be greater than zero");
        }
        if self.keep_alive_secs == 0 {
            bail!("keep_alive_secs must be greater than zero");
        }
        if self.thumbnail_batch == 0 {
            bail!("thumbnail_batch must be greater than zero");
        }
        Ok(())
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_keep_alive_secs(mut self, secs: u64) -> Self {
        self.keep_alive_secs = secs;
        self
    }

    pub fn with_keep_alive_enabled(mut self, enabled: bool) -> Self {
        self.keep_alive_enabled = enabled;
        self
    }

    pub fn with_thumbnail_batch(mut self, batch: u32) -> Self {
        self.thumbnail_batch = batch;
        self
    }

    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("invalid boolean '{}'", other),
    }
}
