//! Byte-budget LRU of decoded values.
//!
//! Each entry remembers the encoded size of its value; when the running total
//! exceeds the budget the least recently used entries are dropped. Values are
//! only inserted after the backing store accepted their bytes, so eviction
//! never loses data.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

type AnyValue = Arc<dyn Any + Send + Sync>;

struct CacheEntry {
  value: AnyValue,
  size: usize,
  last_used: u64,
}

#[derive(Default)]
struct CacheInner {
  entries: HashMap<String, CacheEntry>,
  /// Keys ordered by last use, oldest first.
  recency: BTreeMap<u64, String>,
  total_bytes: usize,
  next_use_id: u64,
}

impl CacheInner {
  fn next_use_id(&mut self) -> u64 {
    self.next_use_id += 1;
    self.next_use_id
  }

  fn touch(&mut self, key: &str) -> Option<&CacheEntry> {
    let use_id = self.next_use_id();
    let entry = self.entries.get_mut(key)?;
    if let Some(k) = self.recency.remove(&entry.last_used) {
      self.recency.insert(use_id, k);
    }
    entry.last_used = use_id;
    Some(entry)
  }

  fn take(&mut self, key: &str) -> Option<CacheEntry> {
    let entry = self.entries.remove(key)?;
    self.recency.remove(&entry.last_used);
    self.total_bytes -= entry.size;
    Some(entry)
  }

  fn evict_lru_entry(&mut self) -> bool {
    let Some((_, stale_key)) = self.recency.pop_first() else {
      return false;
    };
    if let Some(entry) = self.entries.remove(&stale_key) {
      self.total_bytes -= entry.size;
    }
    true
  }
}

/// Shared, internally synchronized cache keyed by storage key.
pub struct Cache {
  budget_bytes: usize,
  inner: Mutex<CacheInner>,
}

impl Cache {
  pub fn new(budget_bytes: usize) -> Self {
    Self {
      budget_bytes,
      inner: Mutex::new(CacheInner::default()),
    }
  }

  pub fn budget_bytes(&self) -> usize {
    self.budget_bytes
  }

  /// Cumulative encoded size of the cached values.
  pub fn total_bytes(&self) -> usize {
    self.inner.lock().total_bytes
  }

  pub fn len(&self) -> usize {
    self.inner.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn contains(&self, key: &str) -> bool {
    self.inner.lock().entries.contains_key(key)
  }

  /// Cached value under `key` if present and of type `T`. A hit refreshes
  /// the entry's recency.
  pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
    let mut inner = self.inner.lock();
    let entry = inner.touch(key)?;
    Arc::clone(&entry.value).downcast::<T>().ok()
  }

  /// Insert or replace. Values larger than the whole budget are not cached.
  pub fn insert<T: Any + Send + Sync>(&self, key: &str, value: Arc<T>, size: usize) {
    let mut inner = self.inner.lock();
    inner.take(key);
    if size > self.budget_bytes {
      return;
    }
    let use_id = inner.next_use_id();
    inner.recency.insert(use_id, key.to_owned());
    inner.entries.insert(
      key.to_owned(),
      CacheEntry {
        value,
        size,
        last_used: use_id,
      },
    );
    inner.total_bytes += size;
    while inner.total_bytes > self.budget_bytes {
      if !inner.evict_lru_entry() {
        break;
      }
    }
  }

  pub fn remove(&self, key: &str) {
    self.inner.lock().take(key);
  }

  pub fn clear(&self) {
    let mut inner = self.inner.lock();
    inner.entries.clear();
    inner.recency.clear();
    inner.total_bytes = 0;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn evicts_least_recently_used_by_size() {
    let cache = Cache::new(100);
    cache.insert("a", Arc::new(1u32), 40);
    cache.insert("b", Arc::new(2u32), 40);
    // touch a so b becomes the oldest
    assert_eq!(cache.get::<u32>("a").as_deref(), Some(&1));
    cache.insert("c", Arc::new(3u32), 40);

    assert!(cache.get::<u32>("b").is_none());
    assert!(cache.get::<u32>("a").is_some());
    assert!(cache.get::<u32>("c").is_some());
    assert_eq!(cache.total_bytes(), 80);
  }

  #[test]
  fn type_mismatch_is_a_miss() {
    let cache = Cache::new(10);
    cache.insert("a", Arc::new(String::from("x")), 1);
    assert!(cache.get::<u32>("a").is_none());
    assert_eq!(cache.get::<String>("a").as_deref().map(String::as_str), Some("x"));
  }

  #[test]
  fn oversized_values_are_not_kept() {
    let cache = Cache::new(10);
    cache.insert("big", Arc::new(0u8), 11);
    assert!(cache.is_empty());
    assert_eq!(cache.total_bytes(), 0);
  }

  #[test]
  fn replacing_and_removing_track_bytes() {
    let cache = Cache::new(100);
    cache.insert("a", Arc::new(1u8), 30);
    cache.insert("a", Arc::new(2u8), 10);
    assert_eq!(cache.total_bytes(), 10);
    cache.remove("a");
    assert_eq!(cache.total_bytes(), 0);
  }

  #[test]
  fn large_caches_evict_in_insertion_order() {
    let cache = Cache::new(20_000);
    for i in 0..60_000u32 {
      cache.insert(&i.to_string(), Arc::new(i), 1);
    }
    assert_eq!(cache.len(), 20_000);
    assert_eq!(cache.total_bytes(), 20_000);
    assert!(!cache.contains("39999"));
    assert!(cache.contains("40000"));
    assert!(cache.contains("59999"));

    // a hit moves the entry behind everything inserted so far
    assert!(cache.get::<u32>("40000").is_some());
    cache.insert("next", Arc::new(0u32), 1);
    assert!(cache.contains("40000"));
    assert!(!cache.contains("40001"));
  }

  #[test]
  fn removed_entries_are_not_evicted_twice() {
    let cache = Cache::new(3);
    cache.insert("a", Arc::new(1u8), 1);
    cache.insert("b", Arc::new(2u8), 1);
    cache.remove("a");
    cache.insert("c", Arc::new(3u8), 1);
    cache.insert("d", Arc::new(4u8), 1);
    assert_eq!(cache.len(), 3);
    cache.insert("e", Arc::new(5u8), 1);
    assert!(!cache.contains("b"));
    assert_eq!(cache.total_bytes(), 3);
  }
}
