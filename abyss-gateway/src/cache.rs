//! C1 — expiring cache used for challenges and session tokens.
//!
//! Backed by [`dashmap::DashMap`] for per-shard locking so `put`/`get`/`remove` on
//! disjoint keys never contend. TTLs are measured against [`tokio::time::Instant`],
//! a monotonic clock, so a system clock jump can never resurrect or kill an entry
//! early.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Thread-safe key-value store with per-entry TTL.
///
/// Expired entries are only reclaimed lazily, on the next `get`/`remove` touching
/// that key; there is no background sweeper, matching the "entries expire lazily on
/// read" contract.
pub struct ExpiringCache {
    entries: DashMap<String, Entry>,
}

impl ExpiringCache {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    pub fn put(&self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) {
        self.entries.insert(
            key.into(),
            Entry {
                value: value.into(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Returns the value for `key`, or `None` if absent or expired.
    ///
    /// An expired entry found during the lookup is removed as a side effect.
    pub fn get(&self, key: &str) -> Option<String> {
        let is_expired = match self.entries.get(key) {
            Some(entry) => entry.expires_at <= Instant::now(),
            None => return None,
        };

        if is_expired {
            self.entries.remove(key);
            None
        } else {
            self.entries.get(key).map(|entry| entry.value.clone())
        }
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }
}

impl Default for ExpiringCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expires_lazily_on_read() {
        let cache = ExpiringCache::new();
        cache.put("k", "v", Duration::from_secs(1));
        assert_eq!(cache.get("k").as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test]
    async fn remove_drops_entry() {
        let cache = ExpiringCache::new();
        cache.put("k", "v", Duration::from_secs(60));
        cache.remove("k");
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn replace_resets_ttl() {
        let cache = ExpiringCache::new();
        cache.put("k", "first", Duration::from_millis(10));
        cache.put("k", "second", Duration::from_secs(60));

        tokio::time::advance(Duration::from_millis(20)).await;

        assert_eq!(cache.get("k").as_deref(), Some("second"));
    }
}
