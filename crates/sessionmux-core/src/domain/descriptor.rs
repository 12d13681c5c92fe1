//! Remote file descriptor returned when a file store commits

use serde::{Deserialize, Serialize};

/// Committed remote file as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDescriptor {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub size: u64,
    pub mimetype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
}

impl RemoteDescriptor {
    pub fn new(id: i64, name: impl Into<String>, size: u64) -> Self {
        Self {
            id,
            name: name.into(),
            path: String::new(),
            size,
            mimetype: crate::branding::DEFAULT_MIMETYPE.to_string(),
            sha1: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = mimetype.into();
        self
    }
}
