//! Partitioned in-process cache for Apolo IPs
//!
//! Provides the shared read cache consumed by the IP service: one partition
//! per kind of cached item, each with its own size limit and TTL policy.
//! A cache is an ordinary value handed to the services that use it, so
//! independent instances (for example in tests) never interfere.
//!
//! # Features
//!
//! - Per-partition item limit (`-1` unlimited, `0` disables the partition)
//! - Per-partition TTL, optionally refreshed on every read
//! - Oldest-first eviction once a partition is full
//! - Values are stored type-erased and returned as clones of the stored type
//!
//! # Example
//!
//! ```
//! use apolo_cache::MemoryCache;
//! use apolo_core::config::{CacheConfig, CACHE_EVENT_IPS};
//!
//! let cache = MemoryCache::new(&CacheConfig::default());
//! cache.set(CACHE_EVENT_IPS, "ev1", Some(vec!["IPs1".to_string()])).unwrap();
//!
//! let hit: Option<Option<Vec<String>>> = cache.get(CACHE_EVENT_IPS, "ev1");
//! assert_eq!(hit, Some(Some(vec!["IPs1".to_string()])));
//! ```

pub mod keys;

use apolo_core::config::{CacheConfig, PartitionConfig};
use apolo_core::{AppError, AppResult};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

type CachedValue = Arc<dyn Any + Send + Sync>;

struct Entry {
    value: CachedValue,
    expires_at: Option<Instant>,
    seq: u64,
}

struct Partition {
    limit: i64,
    ttl: Option<Duration>,
    static_ttl: bool,
    items: HashMap<String, Entry>,
    next_seq: u64,
    /// Earliest expiry among the items, a lower bound once TTLs slide
    next_expiry: Option<Instant>,
}

impl Partition {
    fn new(cfg: &PartitionConfig) -> Self {
        Self {
            limit: cfg.limit,
            ttl: (cfg.ttl_secs > 0).then(|| Duration::from_secs(cfg.ttl_secs)),
            static_ttl: cfg.static_ttl,
            items: HashMap::new(),
            next_seq: 0,
            next_expiry: None,
        }
    }

    fn expiry_from(&self, now: Instant) -> Option<Instant> {
        self.ttl.map(|ttl| now + ttl)
    }

    /// Drop the entry if expired, otherwise return it (refreshing its TTL)
    fn live_entry(&mut self, key: &str) -> Option<&Entry> {
        let now = Instant::now();
        let expired = match self.items.get(key) {
            None => return None,
            Some(entry) => entry.expires_at.is_some_and(|at| at <= now),
        };
        if expired {
            self.items.remove(key);
            return None;
        }
        let refreshed = if self.static_ttl {
            None
        } else {
            self.expiry_from(now)
        };
        let entry = self.items.get_mut(key)?;
        if refreshed.is_some() {
            entry.expires_at = refreshed;
        }
        Some(entry)
    }

    /// Drop every expired item once the earliest expiry has passed
    fn sweep_expired(&mut self, now: Instant) {
        if !self.next_expiry.is_some_and(|at| at <= now) {
            return;
        }
        let before = self.items.len();
        self.items
            .retain(|_, e| !e.expires_at.is_some_and(|at| at <= now));
        self.next_expiry = self.items.values().filter_map(|e| e.expires_at).min();
        debug!("Cache swept {} expired items", before - self.items.len());
    }

    fn insert(&mut self, key: &str, value: CachedValue) {
        let now = Instant::now();
        self.sweep_expired(now);
        if self.limit > 0
            && !self.items.contains_key(key)
            && self.items.len() as i64 >= self.limit
        {
            if let Some(oldest) = self
                .items
                .iter()
                .min_by_key(|(_, e)| e.seq)
                .map(|(k, _)| k.clone())
            {
                self.items.remove(&oldest);
            }
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let expires_at = self.expiry_from(now);
        if let Some(at) = expires_at {
            self.next_expiry = Some(self.next_expiry.map_or(at, |next| next.min(at)));
        }
        self.items.insert(
            key.to_string(),
            Entry {
                value,
                expires_at,
                seq,
            },
        );
    }
}

/// In-process cache split into named partitions
///
/// All operations are synchronous and hold a partition lock only for the
/// duration of the map access.
pub struct MemoryCache {
    partitions: HashMap<String, Mutex<Partition>>,
}

impl MemoryCache {
    /// Create a cache with every partition the IP service consumes
    ///
    /// # Arguments
    ///
    /// * `cfg` - Partition policies; missing partitions use built-in defaults
    pub fn new(cfg: &CacheConfig) -> Self {
        let mut partitions = HashMap::new();
        for name in CacheConfig::partition_names() {
            partitions.insert(name.to_string(), Mutex::new(Partition::new(&cfg.partition(name))));
        }
        for (name, pcfg) in &cfg.partitions {
            partitions
                .entry(name.clone())
                .or_insert_with(|| Mutex::new(Partition::new(pcfg)));
        }
        Self { partitions }
    }

    /// Whether a partition exists and accepts items
    pub fn is_enabled(&self, partition: &str) -> bool {
        self.partitions
            .get(partition)
            .is_some_and(|p| p.lock().limit != 0)
    }

    /// Get a clone of a cached value
    ///
    /// # Type Parameters
    ///
    /// * `T` - The type the value was stored with
    ///
    /// # Returns
    ///
    /// - `Some(T)` if the key is cached, not expired and of type `T`
    /// - `None` otherwise
    pub fn get<T>(&self, partition: &str, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let part = self.partitions.get(partition)?;
        let mut guard = part.lock();
        let entry = guard.live_entry(key)?;
        match entry.value.downcast_ref::<T>() {
            Some(value) => {
                debug!("Cache HIT: {} {}", partition, key);
                Some(value.clone())
            }
            None => {
                warn!(
                    "Cache type mismatch for {} in partition {}, treating as miss",
                    key, partition
                );
                None
            }
        }
    }

    /// Store a value, replacing any previous one
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cache` if the partition is unknown. Writes to a
    /// disabled partition are silently dropped.
    pub fn set<T>(&self, partition: &str, key: &str, value: T) -> AppResult<()>
    where
        T: Send + Sync + 'static,
    {
        let part = self
            .partitions
            .get(partition)
            .ok_or_else(|| AppError::Cache(format!("unknown cache partition: {}", partition)))?;
        let mut guard = part.lock();
        if guard.limit == 0 {
            return Ok(());
        }
        debug!("Cache SET: {} {}", partition, key);
        guard.insert(key, Arc::new(value));
        Ok(())
    }

    /// Remove a key, returning whether it was present
    pub fn remove(&self, partition: &str, key: &str) -> bool {
        self.partitions
            .get(partition)
            .is_some_and(|p| p.lock().items.remove(key).is_some())
    }

    /// Check if a live key exists
    pub fn has(&self, partition: &str, key: &str) -> bool {
        self.partitions
            .get(partition)
            .is_some_and(|p| p.lock().live_entry(key).is_some())
    }

    /// Number of items held by a partition, expired ones included until the
    /// next write sweeps them
    pub fn len(&self, partition: &str) -> usize {
        self.partitions
            .get(partition)
            .map_or(0, |p| p.lock().items.len())
    }

    /// Drop every item of one partition, or of all partitions
    pub fn clear(&self, partition: Option<&str>) {
        match partition {
            Some(name) => {
                if let Some(p) = self.partitions.get(name) {
                    p.lock().items.clear();
                }
            }
            None => {
                for p in self.partitions.values() {
                    p.lock().items.clear();
                }
            }
        }
    }
}
