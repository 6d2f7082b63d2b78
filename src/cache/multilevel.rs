//! Cascading cache tiers (e.g. L1 in-memory, L2 larger/slower), queried
//! ascending with promotion on hit (spec §4.11).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::{CacheEngine, CacheEntry};

/// Levels are ordered narrowest/fastest first. `get` checks L1, L2, ...
/// in order and, on a hit below L1, backfills every level above it so the
/// next lookup is served from the fastest tier.
pub struct MultiLevelCache {
  levels: Vec<Arc<CacheEngine>>,
}

impl MultiLevelCache {
  pub fn new(levels: Vec<Arc<CacheEngine>>) -> Self {
    assert!(!levels.is_empty(), "MultiLevelCache requires at least one level");
    Self { levels }
  }

  pub fn get(&self, key: &str) -> Option<CacheEntry> {
    for (index, level) in self.levels.iter().enumerate() {
      if let Some(entry) = level.get(key) {
        for promote_to in &self.levels[..index] {
          promote_to.set(key.to_string(), entry.data.clone(), None);
        }
        return Some(entry);
      }
    }
    None
  }

  pub fn set(&self, key: impl Into<String>, data: Bytes, ttl: Option<Duration>) {
    let key = key.into();
    for level in &self.levels {
      level.set(key.clone(), data.clone(), ttl);
    }
  }

  pub fn remove(&self, key: &str) -> bool {
    let mut removed_any = false;
    for level in &self.levels {
      removed_any |= level.remove(key);
    }
    removed_any
  }

  pub fn remove_all(&self) {
    for level in &self.levels {
      level.remove_all();
    }
  }

  pub fn levels(&self) -> &[Arc<CacheEngine>] {
    &self.levels
  }
}
