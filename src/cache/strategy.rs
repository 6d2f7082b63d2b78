//! Eviction strategies (spec §4.11). Each strategy picks a single
//! candidate key to evict from the live entry map; [`CacheEngine`] does
//! the actual eviction and re-asks until its size/count constraints hold.
//!
//! [`CacheEngine`]: super::CacheEngine

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use super::CacheEntry;

/// Observes storage mutations and picks eviction candidates. The `on_*`
/// hooks exist for strategies that need bookkeeping beyond what
/// [`CacheEntry`] already carries (none of the built-ins do, since the
/// entry's own `last_accessed`/`access_count`/`created_at` fields are
/// sufficient); they default to no-ops.
pub trait CacheStrategy: Send + Sync {
  fn on_access(&self, _key: &str, _time: Instant) {}
  fn on_add(&self, _key: &str, _size: usize, _time: Instant) {}
  fn on_remove(&self, _key: &str) {}

  fn select_key_to_evict(&self, entries: &HashMap<String, CacheEntry>) -> Option<String>;
}

/// Evicts the least-recently-accessed entry.
pub struct Lru;

impl CacheStrategy for Lru {
  fn select_key_to_evict(&self, entries: &HashMap<String, CacheEntry>) -> Option<String> {
    entries
      .values()
      .min_by_key(|e| e.last_accessed)
      .map(|e| e.key.clone())
  }
}

/// Evicts the least-frequently-accessed entry; ties broken by earliest
/// `created_at`.
pub struct Lfu;

impl CacheStrategy for Lfu {
  fn select_key_to_evict(&self, entries: &HashMap<String, CacheEntry>) -> Option<String> {
    entries
      .values()
      .min_by(|a, b| {
        a.access_count
          .cmp(&b.access_count)
          .then(a.created_at.cmp(&b.created_at))
      })
      .map(|e| e.key.clone())
  }
}

/// Evicts the oldest-added entry.
pub struct Fifo;

impl CacheStrategy for Fifo {
  fn select_key_to_evict(&self, entries: &HashMap<String, CacheEntry>) -> Option<String> {
    entries
      .values()
      .min_by_key(|e| e.created_at)
      .map(|e| e.key.clone())
  }
}

/// Prefers already-expired keys; falls back to the soonest-to-expire (or,
/// absent any TTL at all, the oldest) entry (spec §4.11).
pub struct Ttl;

impl CacheStrategy for Ttl {
  fn select_key_to_evict(&self, entries: &HashMap<String, CacheEntry>) -> Option<String> {
    let now = Instant::now();
    let expired = entries
      .values()
      .filter(|e| e.expires_at.map(|exp| exp <= now).unwrap_or(false))
      .min_by_key(|e| e.expires_at);
    if let Some(entry) = expired {
      return Some(entry.key.clone());
    }
    entries
      .values()
      .min_by_key(|e| e.expires_at.unwrap_or_else(|| e.created_at + std::time::Duration::from_secs(u64::MAX / 2)))
      .map(|e| e.key.clone())
  }
}

/// Evicts the largest entry, to free the most space per eviction.
pub struct Size;

impl CacheStrategy for Size {
  fn select_key_to_evict(&self, entries: &HashMap<String, CacheEntry>) -> Option<String> {
    entries.values().max_by_key(|e| e.size).map(|e| e.key.clone())
  }
}

/// Delegates to the first sub-strategy that returns a candidate (spec §9
/// Open Questions: the source's composite fires a background task and
/// returns nil, which this crate treats as a defect — here the contract is
/// simply "first non-`None` wins").
pub struct Composite {
  strategies: Vec<Arc<dyn CacheStrategy>>,
}

impl Composite {
  pub fn new(strategies: Vec<Arc<dyn CacheStrategy>>) -> Self {
    Self { strategies }
  }
}

impl CacheStrategy for Composite {
  fn on_access(&self, key: &str, time: Instant) {
    for s in &self.strategies {
      s.on_access(key, time);
    }
  }

  fn on_add(&self, key: &str, size: usize, time: Instant) {
    for s in &self.strategies {
      s.on_add(key, size, time);
    }
  }

  fn on_remove(&self, key: &str) {
    for s in &self.strategies {
      s.on_remove(key);
    }
  }

  fn select_key_to_evict(&self, entries: &HashMap<String, CacheEntry>) -> Option<String> {
    self
      .strategies
      .iter()
      .find_map(|s| s.select_key_to_evict(entries))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use bytes::Bytes;
  use std::time::Duration;

  fn entry(key: &str, created_offset_ms: u64, access_count: u64) -> CacheEntry {
    let now = Instant::now();
    CacheEntry {
      key: key.to_string(),
      data: Bytes::from_static(b"x"),
      size: 1,
      created_at: now - Duration::from_millis(created_offset_ms),
      last_accessed: now - Duration::from_millis(created_offset_ms),
      access_count,
      expires_at: None,
      metadata: HashMap::new(),
    }
  }

  #[test]
  fn lfu_breaks_ties_by_earliest_added() {
    let mut entries = HashMap::new();
    entries.insert("a".to_string(), entry("a", 100, 1));
    entries.insert("b".to_string(), entry("b", 50, 1));
    let lfu = Lfu;
    assert_eq!(lfu.select_key_to_evict(&entries), Some("a".to_string()));
  }

  #[test]
  fn fifo_picks_oldest() {
    let mut entries = HashMap::new();
    entries.insert("a".to_string(), entry("a", 100, 5));
    entries.insert("b".to_string(), entry("b", 10, 5));
    let fifo = Fifo;
    assert_eq!(fifo.select_key_to_evict(&entries), Some("a".to_string()));
  }

  #[test]
  fn composite_delegates_to_first_match() {
    struct NeverEvicts;
    impl CacheStrategy for NeverEvicts {
      fn select_key_to_evict(&self, _entries: &HashMap<String, CacheEntry>) -> Option<String> {
        None
      }
    }
    let mut entries = HashMap::new();
    entries.insert("a".to_string(), entry("a", 10, 1));
    let composite = Composite::new(vec![Arc::new(NeverEvicts), Arc::new(Fifo)]);
    assert_eq!(composite.select_key_to_evict(&entries), Some("a".to_string()));
  }
}
