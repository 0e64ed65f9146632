use crate::error::Error;
use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;

/// Configuration for the response cache.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// How long entries stay fresh.
    pub ttl: Duration,
    /// Maximum number of cached entries before oldest-first eviction.
    pub max_entries: usize,
    /// Whether caching is enabled.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::milliseconds(5000),
            max_entries: 100,
            enabled: true,
        }
    }
}

impl CacheConfig {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            enabled: true,
        }
    }

    /// Reject values that would silently disable or corrupt the cache.
    pub fn validate(&self) -> Result<(), Error> {
        if self.ttl <= Duration::zero() {
            return Err(Error::Configuration(format!(
                "cache TTL must be positive, got {}ms",
                self.ttl.num_milliseconds()
            )));
        }
        if self.max_entries == 0 {
            return Err(Error::Configuration(
                "max cache entries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// A cached response payload with its storage timestamp.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub value: Arc<Value>,
    pub stored_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CachedEntry {
    fn new(value: Arc<Value>, ttl: Duration) -> Self {
        Self {
            value,
            stored_at: Utc::now(),
            ttl,
        }
    }

    /// Check whether the entry is still within its TTL.
    pub fn is_fresh(&self) -> bool {
        Utc::now() - self.stored_at <= self.ttl
    }
}

/// Bounded key/value store with per-entry TTL and oldest-first eviction.
///
/// Stale entries are evicted on read and swept opportunistically by the
/// background sweeper so memory does not grow unbounded under low read
/// traffic.
pub struct ResponseCache {
    entries: DashMap<Fingerprint, CachedEntry>,
    pub config: CacheConfig,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    /// Get a cached value if present and fresh. A stale entry is evicted
    /// and reported as a miss.
    pub fn get(&self, key: &Fingerprint) -> Option<Arc<Value>> {
        if !self.config.enabled {
            return None;
        }

        if let Some(entry) = self.entries.get(key) {
            if entry.is_fresh() {
                log::debug!("Cache hit for key: {}", key);
                return Some(entry.value.clone());
            }
            drop(entry);
            log::debug!("Cache expired for key: {}", key);
            self.entries.remove(key);
        }

        log::debug!("Cache miss for key: {}", key);
        None
    }

    /// Insert or overwrite an entry, then evict the oldest entries until
    /// the count is back at the cap.
    pub fn put(&self, key: Fingerprint, value: Arc<Value>) {
        if !self.config.enabled {
            return;
        }

        self.entries
            .insert(key.clone(), CachedEntry::new(value, self.config.ttl));
        log::debug!("Stored in cache with key: {}", key);

        if self.entries.len() > self.config.max_entries {
            self.evict_oldest_to_cap();
        }
    }

    /// Remove TTL-expired entries.
    pub fn evict_expired(&self) {
        let expired_keys: Vec<_> = self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_fresh())
            .map(|entry| entry.key().clone())
            .collect();

        let expired_count = expired_keys.len();
        for key in expired_keys {
            self.entries.remove(&key);
        }

        if expired_count > 0 {
            log::debug!("Evicted {} expired cache entries", expired_count);
        }
    }

    /// Remove oldest-inserted entries until the count is at the cap.
    fn evict_oldest_to_cap(&self) {
        let excess = self.entries.len().saturating_sub(self.config.max_entries);
        if excess == 0 {
            return;
        }

        let mut by_age: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stored_at))
            .collect();
        by_age.sort_by_key(|(_, stored_at)| *stored_at);

        for (key, _) in by_age.into_iter().take(excess) {
            self.entries.remove(&key);
        }

        log::debug!("Evicted {} oldest cache entries", excess);
    }

    /// Remove all entries; used for full resets (e.g. logout).
    pub fn clear(&self) {
        self.entries.clear();
        log::info!("Cache cleared");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let total_entries = self.entries.len();
        let expired_entries = self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_fresh())
            .count();

        CacheStats {
            total_entries,
            valid_entries: total_entries - expired_entries,
            expired_entries,
            max_entries: self.config.max_entries,
        }
    }

    /// Spawn a background task that sweeps expired entries on an interval.
    ///
    /// Outside a tokio runtime (plain `#[test]` construction) no task is
    /// spawned and sweeping falls back to read-time eviction only.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let period = every
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(5));

        if tokio::runtime::Handle::try_current().is_ok() {
            let cache = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => cache.evict_expired(),
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            });
        }

        SweeperHandle { shutdown: shutdown_tx }
    }
}

/// Handle that stops the background sweep task when signalled or dropped.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
}

impl SweeperHandle {
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub max_entries: usize,
}

/// Thread-safe wrapper for the cache.
pub type SharedResponseCache = Arc<ResponseCache>;
