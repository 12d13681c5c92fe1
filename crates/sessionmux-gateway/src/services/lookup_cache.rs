//! Lookup Cache
//!
//! Per-login cache of values that rarely change on the server: its version,
//! the built-in groups and enumeration tables. Owned by the pool and
//! invalidated on logout and reconnect.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Names of the built-in groups
pub const SYSTEM_GROUP_NAMES: [&str; 3] = ["system", "user", "guest"];

/// A built-in server group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemGroup {
    pub id: i64,
    pub name: String,
}

impl SystemGroup {
    pub fn is_system(&self) -> bool {
        self.name == SYSTEM_GROUP_NAMES[0]
    }
}

#[derive(Debug, Default)]
struct Entries {
    server_version: Option<String>,
    system_groups: Option<Vec<SystemGroup>>,
    /// enumeration type -> values
    enumerations: HashMap<String, Vec<Value>>,
}

#[derive(Debug, Default)]
pub struct LookupCache {
    entries: RwLock<Entries>,
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server_version(&self) -> Option<String> {
        self.entries.read().server_version.clone()
    }

    pub fn set_server_version(&self, version: impl Into<String>) {
        self.entries.write().server_version = Some(version.into());
    }

    pub fn system_groups(&self) -> Option<Vec<SystemGroup>> {
        self.entries.read().system_groups.clone()
    }

    /// Keep only the built-in groups from `groups`.
    pub fn set_system_groups(&self, groups: Vec<SystemGroup>) {
        let groups: Vec<_> = groups
            .into_iter()
            .filter(|g| SYSTEM_GROUP_NAMES.contains(&g.name.as_str()))
            .collect();
        self.entries.write().system_groups = Some(groups);
    }

    pub fn enumerations(&self, kind: &str) -> Option<Vec<Value>> {
        self.entries.read().enumerations.get(kind).cloned()
    }

    pub fn set_enumerations(&self, kind: impl Into<String>, values: Vec<Value>) {
        self.entries.write().enumerations.insert(kind.into(), values);
    }

    pub fn is_empty(&self) -> bool {
        let e = self.entries.read();
        e.server_version.is_none() && e.system_groups.is_none() && e.enumerations.is_empty()
    }

    /// Forget everything cached for the current login
    pub fn invalidate(&self) {
        let mut e = self.entries.write();
        *e = Entries::default();
        debug!("[LookupCache] Invalidated");
    }
}
