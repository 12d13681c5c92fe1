//! Remote service kinds
//!
//! Stateless services are shared per session and never closed individually.
//! Stateful services hold server memory for one resource id and must be
//! closed by whoever acquired them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stateless remote service kinds, one cached proxy per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Query,
    Update,
    Admin,
    Metadata,
    Container,
    Search,
    Projection,
    RepositoryInfo,
    Script,
    RenderingSettings,
    SharedResources,
    Config,
    Pixels,
    Roi,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 14] = [
        Self::Query,
        Self::Update,
        Self::Admin,
        Self::Metadata,
        Self::Container,
        Self::Search,
        Self::Projection,
        Self::RepositoryInfo,
        Self::Script,
        Self::RenderingSettings,
        Self::SharedResources,
        Self::Config,
        Self::Pixels,
        Self::Roi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Update => "update",
            Self::Admin => "admin",
            Self::Metadata => "metadata",
            Self::Container => "container",
            Self::Search => "search",
            Self::Projection => "projection",
            Self::RepositoryInfo => "repository_info",
            Self::Script => "script",
            Self::RenderingSettings => "rendering_settings",
            Self::SharedResources => "shared_resources",
            Self::Config => "config",
            Self::Pixels => "pixels",
            Self::Roi => "roi",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stateful remote service kinds, keyed by the id of the resource they hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatefulKind {
    /// Keyed by pixels id
    RenderingEngine,
    /// Keyed by retrieval batch size
    ThumbnailStore,
    /// Keyed by original file id
    RawFileStore,
    /// Keyed by pixels id
    RawPixelsStore,
    /// Keyed by image id
    Exporter,
}

impl StatefulKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RenderingEngine => "rendering_engine",
            Self::ThumbnailStore => "thumbnail_store",
            Self::RawFileStore => "raw_file_store",
            Self::RawPixelsStore => "raw_pixels_store",
            Self::Exporter => "exporter",
        }
    }

    pub fn is_rendering(&self) -> bool {
        matches!(self, Self::RenderingEngine)
    }
}

impl fmt::Display for StatefulKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracking key for a stateful resource within one connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: StatefulKind,
    pub id: i64,
}

impl ResourceKey {
    pub fn new(kind: StatefulKind, id: i64) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}
