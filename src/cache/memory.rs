//! In-process TTL store backed by a sharded concurrent map.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::{CacheLookup, CacheStore};
use crate::error::CacheError;
use crate::transport::BoxFuture;

const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    // `None` when the TTL runs past the clock's range.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// A [`CacheStore`] kept in process memory.
///
/// An entry reads as [`CacheLookup::Fresh`] until its TTL passes, then as
/// [`CacheLookup::Expired`] for the retention window, after which it is
/// dropped: lazily on `get`, or in bulk by
/// [`purge_expired`](Self::purge_expired) and the background sweeper.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use outpost::cache::{CacheLookup, CacheStore, MemoryStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryStore::new();
/// store.set("MobileCheckKYC", "0771990039", "{}".into(), Duration::from_secs(60)).await.unwrap();
/// assert_eq!(
///     store.get("MobileCheckKYC", "0771990039").await.unwrap(),
///     CacheLookup::Fresh("{}".into())
/// );
/// assert_eq!(store.get("other", "0771990039").await.unwrap(), CacheLookup::Miss);
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<(String, String), Entry>,
    retention: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that keeps expired entries for `retention` as stale fallbacks.
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            retention,
        }
    }

    /// Number of entries held, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry past its retention window and returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !self.is_evictable(entry, now));
        before.saturating_sub(self.entries.len())
    }

    /// Spawns a task that purges evictable entries every `interval`.
    ///
    /// The task holds only a weak reference and exits once the store is dropped.
    /// Must be called from within a Tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = store.len(), "cache sweep");
                }
            }
        })
    }

    fn is_evictable(&self, entry: &Entry, now: Instant) -> bool {
        entry
            .expires_at
            .and_then(|at| at.checked_add(self.retention))
            .is_some_and(|until| now >= until)
    }
}

impl CacheStore for MemoryStore {
    fn get<'a>(&'a self, namespace: &'a str, key: &'a str) -> BoxFuture<'a, Result<CacheLookup, CacheError>> {
        Box::pin(async move {
            let id = (namespace.to_owned(), key.to_owned());
            let now = Instant::now();
            // The read guard must be gone before `remove_if` takes the shard lock.
            let lookup = match self.entries.get(&id) {
                None => return Ok(CacheLookup::Miss),
                Some(entry) if entry.is_fresh(now) => CacheLookup::Fresh(entry.value.clone()),
                Some(entry) if !self.is_evictable(&entry, now) => CacheLookup::Expired(entry.value.clone()),
                Some(_) => CacheLookup::Miss,
            };
            if lookup == CacheLookup::Miss {
                self.entries
                    .remove_if(&id, |_, entry| self.is_evictable(entry, now));
            }
            Ok(lookup)
        })
    }

    fn set<'a>(
        &'a self,
        namespace: &'a str,
        key: &'a str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            let entry = Entry {
                value,
                expires_at: Instant::now().checked_add(ttl),
            };
            self.entries
                .insert((namespace.to_owned(), key.to_owned()), entry);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn namespaces_isolate_keys() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.set("a", "k", "one".into(), ttl).await.unwrap();
        store.set("b", "k", "two".into(), ttl).await.unwrap();

        assert_eq!(store.get("a", "k").await.unwrap(), CacheLookup::Fresh("one".into()));
        assert_eq!(store.get("b", "k").await.unwrap(), CacheLookup::Fresh("two".into()));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn expired_entries_are_kept_for_the_retention_window() {
        let store = MemoryStore::with_retention(Duration::from_secs(60));
        store
            .set("ns", "k", "v".into(), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.get("ns", "k").await.unwrap(), CacheLookup::Expired("v".into()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn entries_past_retention_read_as_miss_and_are_removed() {
        let store = MemoryStore::with_retention(Duration::ZERO);
        store
            .set("ns", "k", "v".into(), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.get("ns", "k").await.unwrap(), CacheLookup::Miss);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn unbounded_ttl_never_expires() {
        let store = MemoryStore::new();
        store.set("ns", "k", "v".into(), Duration::MAX).await.unwrap();

        assert_eq!(store.get("ns", "k").await.unwrap(), CacheLookup::Fresh("v".into()));
        assert_eq!(store.purge_expired(), 0);
    }

    #[tokio::test]
    async fn unbounded_retention_keeps_expired_entries() {
        let store = MemoryStore::with_retention(Duration::MAX);
        store
            .set("ns", "k", "v".into(), Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(store.get("ns", "k").await.unwrap(), CacheLookup::Expired("v".into()));
        assert_eq!(store.purge_expired(), 0);
    }

    #[tokio::test]
    async fn purge_drops_only_evictable_entries() {
        let store = MemoryStore::with_retention(Duration::ZERO);
        store
            .set("ns", "short", "v".into(), Duration::from_millis(10))
            .await
            .unwrap();
        store
            .set("ns", "long", "v".into(), Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(matches!(store.get("ns", "long").await.unwrap(), CacheLookup::Fresh(_)));
    }

    #[tokio::test]
    async fn sweeper_purges_in_background_and_stops_with_the_store() {
        let store = Arc::new(MemoryStore::with_retention(Duration::ZERO));
        store
            .set("ns", "k", "v".into(), Duration::from_millis(5))
            .await
            .unwrap();
        let sweeper = store.spawn_sweeper(Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.is_empty());

        drop(store);
        tokio::time::timeout(Duration::from_secs(1), sweeper)
            .await
            .expect("sweeper should exit once the store is dropped")
            .unwrap();
    }
}
