//! Read-through caching with stale-data fallback.
//!
//! The pipeline only talks to storage through [`CacheStore`]: a namespaced
//! get/set with a TTL. [`MemoryStore`] is the in-process implementation each
//! [`Proxy`](crate::proxy::Proxy) falls back to when a call names no store.
//! [`CacheOptions`] is what callers fill in; [`CachePolicy`] is the composed,
//! per-call result with defaults applied and the eligibility checks chained.
//!
//! Freshness is the store's call: a [`CacheLookup::Fresh`] entry is served
//! without touching the transport, an [`CacheLookup::Expired`] one is only
//! kept as the stale snapshot for fallback.

use crate::error::CacheError;
use crate::transport::BoxFuture;
use std::time::Duration;

pub mod memory;
pub mod policy;

pub use memory::MemoryStore;
pub use policy::{CacheCheck, CacheOptions, CachePolicy, baseline_cache_check};

/// Outcome of a cache read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Fresh(String),
    /// Past its TTL but still retained; usable only as a stale fallback.
    Expired(String),
    Miss,
}

impl CacheLookup {
    /// The stored text, fresh or not.
    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Fresh(text) | Self::Expired(text) => Some(text),
            Self::Miss => None,
        }
    }
}

/// Namespaced key/value storage with per-entry TTL.
///
/// Stores that keep entries past their TTL report them as
/// [`CacheLookup::Expired`]. Implementations must be safe to share across
/// tasks; concurrent writers to the same key may race, last write wins.
pub trait CacheStore: Send + Sync {
    fn get<'a>(&'a self, namespace: &'a str, key: &'a str) -> BoxFuture<'a, Result<CacheLookup, CacheError>>;

    fn set<'a>(
        &'a self,
        namespace: &'a str,
        key: &'a str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), CacheError>>;
}
