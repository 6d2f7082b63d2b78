//! Pluggable-strategy cache engine with hit/miss statistics (spec §4.11).

pub mod multilevel;
pub mod strategy;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

pub use multilevel::MultiLevelCache;
pub use strategy::CacheStrategy;

#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub key: String,
  pub data: Bytes,
  pub size: usize,
  pub created_at: Instant,
  pub last_accessed: Instant,
  pub access_count: u64,
  pub expires_at: Option<Instant>,
  pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  pub sets: u64,
  pub evictions: u64,
}

impl CacheStats {
  pub fn hit_rate(&self) -> f64 {
    let total = self.hits + self.misses;
    if total == 0 {
      0.0
    } else {
      self.hits as f64 / total as f64
    }
  }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
  pub max_entries: usize,
  pub max_size_bytes: usize,
  pub default_ttl: Option<Duration>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_entries: 10_000,
      max_size_bytes: 64 * 1024 * 1024,
      default_ttl: None,
    }
  }
}

struct Storage {
  entries: HashMap<String, CacheEntry>,
  total_size: usize,
}

/// Single cache tier: bounded storage plus an eviction [`CacheStrategy`]
/// and running hit/miss statistics. See [`MultiLevelCache`] for cascading
/// multiple tiers together.
pub struct CacheEngine {
  config: CacheConfig,
  strategy: Arc<dyn CacheStrategy>,
  storage: Mutex<Storage>,
  stats: Mutex<CacheStats>,
}

impl CacheEngine {
  pub fn new(config: CacheConfig, strategy: Arc<dyn CacheStrategy>) -> Self {
    Self {
      config,
      strategy,
      storage: Mutex::new(Storage {
        entries: HashMap::new(),
        total_size: 0,
      }),
      stats: Mutex::new(CacheStats::default()),
    }
  }

  pub fn get(&self, key: &str) -> Option<CacheEntry> {
    let mut storage = self.storage.lock();
    self.expire_one_locked(&mut storage, key);

    match storage.entries.get_mut(key) {
      Some(entry) => {
        entry.last_accessed = Instant::now();
        entry.access_count += 1;
        let entry = entry.clone();
        self.strategy.on_access(key, entry.last_accessed);
        self.stats.lock().hits += 1;
        Some(entry)
      }
      None => {
        self.stats.lock().misses += 1;
        None
      }
    }
  }

  pub fn contains(&self, key: &str) -> bool {
    let mut storage = self.storage.lock();
    self.expire_one_locked(&mut storage, key);
    storage.entries.contains_key(key)
  }

  /// Inserts or replaces `key`, evicting via the configured strategy until
  /// the new entry fits within `max_entries`/`max_size_bytes`.
  pub fn set(&self, key: impl Into<String>, data: Bytes, ttl: Option<Duration>) {
    self.set_with_metadata(key, data, ttl, HashMap::new())
  }

  pub fn set_with_metadata(
    &self,
    key: impl Into<String>,
    data: Bytes,
    ttl: Option<Duration>,
    metadata: HashMap<String, String>,
  ) {
    let key = key.into();
    let size = data.len();
    let now = Instant::now();
    let expires_at = ttl.or(self.config.default_ttl).map(|d| now + d);

    let mut storage = self.storage.lock();
    if let Some(old) = storage.entries.remove(&key) {
      storage.total_size -= old.size;
    }

    while storage.entries.len() >= self.config.max_entries
      || storage.total_size + size > self.config.max_size_bytes
    {
      let victim = self.strategy.select_key_to_evict(&storage.entries);
      match victim {
        Some(victim_key) => {
          if let Some(removed) = storage.entries.remove(&victim_key) {
            storage.total_size -= removed.size;
            self.strategy.on_remove(&victim_key);
            self.stats.lock().evictions += 1;
          } else {
            break;
          }
        }
        None => break,
      }
    }

    storage.entries.insert(
      key.clone(),
      CacheEntry {
        key: key.clone(),
        data,
        size,
        created_at: now,
        last_accessed: now,
        access_count: 0,
        expires_at,
        metadata,
      },
    );
    storage.total_size += size;
    self.strategy.on_add(&key, size, now);
    self.stats.lock().sets += 1;
  }

  pub fn remove(&self, key: &str) -> bool {
    let mut storage = self.storage.lock();
    if let Some(entry) = storage.entries.remove(key) {
      storage.total_size -= entry.size;
      self.strategy.on_remove(key);
      true
    } else {
      false
    }
  }

  pub fn remove_all(&self) {
    let mut storage = self.storage.lock();
    storage.entries.clear();
    storage.total_size = 0;
  }

  /// Scans and removes every entry past its `expires_at`; returns the
  /// number removed.
  pub fn cleanup_expired(&self) -> usize {
    let mut storage = self.storage.lock();
    let now = Instant::now();
    let expired: Vec<String> = storage
      .entries
      .values()
      .filter(|e| e.expires_at.map(|exp| exp <= now).unwrap_or(false))
      .map(|e| e.key.clone())
      .collect();
    for key in &expired {
      if let Some(entry) = storage.entries.remove(key) {
        storage.total_size -= entry.size;
        self.strategy.on_remove(key);
      }
    }
    expired.len()
  }

  pub fn count(&self) -> usize {
    self.storage.lock().entries.len()
  }

  pub fn size(&self) -> usize {
    self.storage.lock().total_size
  }

  pub fn stats(&self) -> CacheStats {
    *self.stats.lock()
  }

  fn expire_one_locked(&self, storage: &mut Storage, key: &str) {
    let now = Instant::now();
    let expired = storage
      .entries
      .get(key)
      .map(|e| e.expires_at.map(|exp| exp <= now).unwrap_or(false))
      .unwrap_or(false);
    if expired {
      if let Some(entry) = storage.entries.remove(key) {
        storage.total_size -= entry.size;
        self.strategy.on_remove(key);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use strategy::Lru;

  fn engine(max_entries: usize) -> CacheEngine {
    CacheEngine::new(
      CacheConfig {
        max_entries,
        max_size_bytes: usize::MAX,
        default_ttl: None,
      },
      Arc::new(Lru),
    )
  }

  #[test]
  fn set_then_get_hits() {
    let cache = engine(10);
    cache.set("a", Bytes::from_static(b"value"), None);
    let entry = cache.get("a").unwrap();
    assert_eq!(entry.data.as_ref(), b"value");
    assert_eq!(cache.stats().hits, 1);
  }

  #[test]
  fn miss_increments_stats() {
    let cache = engine(10);
    assert!(cache.get("missing").is_none());
    assert_eq!(cache.stats().misses, 1);
  }

  #[test]
  fn lru_eviction_on_overflow() {
    let cache = engine(2);
    cache.set("a", Bytes::from_static(b"1"), None);
    cache.set("b", Bytes::from_static(b"2"), None);
    cache.get("a"); // touch a, making b the LRU victim
    cache.set("c", Bytes::from_static(b"3"), None);
    assert!(cache.contains("a"));
    assert!(!cache.contains("b"));
    assert!(cache.contains("c"));
    assert_eq!(cache.stats().evictions, 1);
  }

  #[test]
  fn expired_entry_is_not_returned() {
    let cache = engine(10);
    cache.set(
      "a",
      Bytes::from_static(b"1"),
      Some(Duration::from_millis(0)),
    );
    std::thread::sleep(Duration::from_millis(5));
    assert!(cache.get("a").is_none());
  }

  #[test]
  fn cleanup_expired_removes_stale_entries() {
    let cache = engine(10);
    cache.set(
      "a",
      Bytes::from_static(b"1"),
      Some(Duration::from_millis(0)),
    );
    cache.set("b", Bytes::from_static(b"2"), None);
    std::thread::sleep(Duration::from_millis(5));
    assert_eq!(cache.cleanup_expired(), 1);
    assert_eq!(cache.count(), 1);
  }
}
