use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Upper bound applied when `now + ttl` would overflow `Instant`.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A single cached value and the instant it stops being visible.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: String,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Local key/value store with per-entry TTL.
///
/// Cloning is cheap and yields a handle to the same map. All operations lock only the shard
/// holding the key and release it before returning, so no lock is ever held across an await.
#[derive(Clone, Default)]
pub struct ExpiringStore {
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl ExpiringStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, visible until `now + ttl`.
    ///
    /// A zero `ttl` is a valid write that is already expired.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).unwrap_or_else(|| now + MAX_TTL);

        self.entries.insert(
            key.into(),
            CacheEntry {
                value: value.into(),
                expires_at,
            },
        );
    }

    /// Returns the live value for `key`, evicting it if it has expired.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();

        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            // Re-checked under the shard lock so a concurrent refresh is not lost.
            if self
                .entries
                .remove_if(key, |_, entry| entry.is_expired(now))
                .is_some()
            {
                tracing::debug!("Evicted expired key {}", key);
            }
        }

        None
    }

    /// Removes `key`. Returns whether an entry was present; absent keys are not an error.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Physically removes every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;

        self.entries.retain(|_, entry| {
            if entry.is_expired(now) {
                purged += 1;
                false
            } else {
                true
            }
        });

        purged
    }

    /// Number of physically stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawns a task that calls [`purge_expired`](Self::purge_expired) every `interval`.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                let purged = store.purge_expired();
                if purged > 0 {
                    tracing::debug!("Sweeper purged {} expired entries", purged);
                }
            }
        })
    }
}
