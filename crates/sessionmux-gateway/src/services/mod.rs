//! Gateway-level services shared by the pool and the facade

mod lookup_cache;

pub use lookup_cache::{LookupCache, SystemGroup, SYSTEM_GROUP_NAMES};
