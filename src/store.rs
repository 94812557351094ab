//! Expiring counter store shared by the rate limiter and the auto-block policy.

use crate::config::MAX_WINDOW_SECONDS;
use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Generic expiring key-value counter backend.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current value, `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Overwrite the value and its time to live.
    async fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<(), StoreError>;

    /// Add one and return the new value. `ttl` applies when the key is created.
    ///
    /// The default is a plain read-then-write; concurrent callers may lose
    /// an increment at the margin.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let next = self.get(key).await?.unwrap_or(0).saturating_add(1);
        self.set(key, next, ttl).await?;
        Ok(next)
    }
}

/// Run a store call with an upper bound on its latency. A zero limit disables the bound.
pub async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    if limit.is_zero() {
        return fut.await;
    }
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}

/// Key for the counter of `ip` in `namespace`.
///
/// The window opens with the first increment, which creates the key with the
/// window as its time to live, and closes when the key expires.
pub fn counter_key(namespace: &str, ip: &str) -> String {
    format!("{}:{}", namespace, ip)
}

/// `now + ttl`, clamped to the longest configurable window.
fn expiry_after(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl)
        .unwrap_or_else(|| now + Duration::from_secs(MAX_WINDOW_SECONDS))
}

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    value: u64,
    expires_at: Instant,
}

impl CounterEntry {
    fn new(value: u64, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: expiry_after(ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process counter store.
pub struct MemoryCounterStore {
    entries: DashMap<String, CounterEntry>,
    /// Operation counter for sweep scheduling
    ops: AtomicU64,
    sweep_every: u64,
}

impl MemoryCounterStore {
    /// Create a store that sweeps expired counters every `sweep_every` operations.
    pub fn new(sweep_every: u64) -> Self {
        Self {
            entries: DashMap::new(),
            ops: AtomicU64::new(0),
            sweep_every: sweep_every.max(1),
        }
    }

    /// Number of stored counters, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired counter.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }

    fn maybe_sweep(&self) {
        let count = self.ops.fetch_add(1, Ordering::Relaxed);
        if count % self.sweep_every == 0 && count > 0 {
            self.purge_expired();
        }
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
        self.maybe_sweep();
        let now = Instant::now();

        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value)),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<(), StoreError> {
        self.maybe_sweep();
        self.entries
            .insert(key.to_string(), CounterEntry::new(value, ttl));
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        self.maybe_sweep();
        let now = Instant::now();

        // The entry guard holds the shard lock, so concurrent increments serialize.
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CounterEntry::new(0, ttl));
        if entry.is_expired(now) {
            *entry = CounterEntry::new(0, ttl);
        }
        entry.value = entry.value.saturating_add(1);
        Ok(entry.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_get_set() {
        let store = MemoryCounterStore::default();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", 7, Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let store = MemoryCounterStore::default();
        store.set("k", 1, Duration::from_millis(50)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(1));

        tokio::time::advance(Duration::from_millis(100)).await;

        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_restarts_after_expiry() {
        let store = MemoryCounterStore::default();
        assert_eq!(store.increment("k", Duration::from_millis(50)).await.unwrap(), 1);
        assert_eq!(store.increment("k", Duration::from_millis(50)).await.unwrap(), 2);

        tokio::time::advance(Duration::from_millis(100)).await;

        assert_eq!(store.increment("k", Duration::from_millis(50)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryCounterStore::default());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    store.increment("shared", Duration::from_secs(60)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.get("shared").await.unwrap(), Some(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_expired() {
        let store = MemoryCounterStore::new(2);
        store.set("a", 1, Duration::from_millis(10)).await.unwrap();
        store.set("b", 1, Duration::from_secs(60)).await.unwrap();
        tokio::time::advance(Duration::from_millis(30)).await;

        // Third operation triggers the sweep.
        store.set("c", 1, Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_opens_at_first_increment() {
        let store = MemoryCounterStore::default();
        let key = counter_key("rate:login", "1.2.3.4");
        assert_eq!(key, "rate:login:1.2.3.4");

        tokio::time::advance(Duration::from_secs(299)).await;
        store.increment(&key, Duration::from_secs(300)).await.unwrap();

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(store.increment(&key, Duration::from_secs(300)).await.unwrap(), 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<(), StoreError> = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(StoreError::Timeout(Duration::from_millis(10))));
    }

    #[tokio::test]
    async fn test_huge_ttl_does_not_overflow() {
        let store = MemoryCounterStore::default();
        assert_eq!(store.increment("k", Duration::MAX).await.unwrap(), 1);
        assert_eq!(store.get("k").await.unwrap(), Some(1));
    }
}
