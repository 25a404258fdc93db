//! Storage - typed, cached access to a blob store.
//!
//! `Storage` is a cheap clonable handle over a [`BlobStore`] and an optional
//! shared [`Cache`]. Writes go to the backing store first and are cached only
//! once accepted. Reads consult the cache, then decode from the store.
//!
//! Nodes and point sets are always keyed by their own id.

pub mod blob;
pub mod cache;
pub mod codec;
pub mod persistent_ref;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use glam::{DVec3, Vec3};
use tracing::trace;

pub use blob::{BlobStore, DirectoryBlobStore, MemoryBlobStore};
pub use cache::Cache;
pub use persistent_ref::{PersistentRef, Resolver};

use crate::color::C4b;
use crate::error::{OctreeError, Result};
use crate::ids::NodeId;
use crate::knn::KdTreeData;
use crate::node::{codec as node_codec, PointSetNode};
use crate::pointset::PointSet;

/// Default cache budget for stores opened without an explicit size.
pub const DEFAULT_CACHE_BYTES: usize = 256 * 1024 * 1024;

/// Value with a fixed binary layout in the blob store.
pub trait Storable: Sized + Send + Sync + 'static {
  fn encode(&self) -> Result<Vec<u8>>;
  fn decode(key: &str, bytes: &[u8]) -> Result<Self>;
}

impl Storable for Vec<Vec3> {
  fn encode(&self) -> Result<Vec<u8>> {
    Ok(codec::encode_v3f(self))
  }
  fn decode(key: &str, bytes: &[u8]) -> Result<Self> {
    codec::decode_v3f(key, bytes)
  }
}

impl Storable for Vec<DVec3> {
  fn encode(&self) -> Result<Vec<u8>> {
    Ok(codec::encode_v3d(self))
  }
  fn decode(key: &str, bytes: &[u8]) -> Result<Self> {
    codec::decode_v3d(key, bytes)
  }
}

impl Storable for Vec<C4b> {
  fn encode(&self) -> Result<Vec<u8>> {
    Ok(codec::encode_c4b(self))
  }
  fn decode(key: &str, bytes: &[u8]) -> Result<Self> {
    codec::decode_c4b(key, bytes)
  }
}

impl Storable for Vec<i32> {
  fn encode(&self) -> Result<Vec<u8>> {
    Ok(codec::encode_i32(self))
  }
  fn decode(key: &str, bytes: &[u8]) -> Result<Self> {
    codec::decode_i32(key, bytes)
  }
}

impl Storable for Vec<u8> {
  fn encode(&self) -> Result<Vec<u8>> {
    Ok(self.clone())
  }
  fn decode(_key: &str, bytes: &[u8]) -> Result<Self> {
    Ok(bytes.to_vec())
  }
}

impl Storable for KdTreeData {
  fn encode(&self) -> Result<Vec<u8>> {
    self.to_bytes()
  }
  fn decode(key: &str, bytes: &[u8]) -> Result<Self> {
    KdTreeData::from_bytes(key, bytes)
  }
}

/// Handle to a blob store plus its cache.
#[derive(Clone)]
pub struct Storage {
  store: Arc<dyn BlobStore>,
  cache: Option<Arc<Cache>>,
}

impl Storage {
  /// Uncached storage.
  pub fn new(store: Arc<dyn BlobStore>) -> Self {
    Self { store, cache: None }
  }

  pub fn with_cache(store: Arc<dyn BlobStore>, cache_bytes: usize) -> Self {
    Self {
      store,
      cache: Some(Arc::new(Cache::new(cache_bytes))),
    }
  }

  /// Fresh volatile storage with the default cache.
  pub fn in_memory() -> Self {
    Self::with_cache(Arc::new(MemoryBlobStore::new()), DEFAULT_CACHE_BYTES)
  }

  pub fn open_directory(path: impl AsRef<Path>, cache_bytes: usize) -> Result<Self> {
    let store = DirectoryBlobStore::open(path)?;
    Ok(Self::with_cache(Arc::new(store), cache_bytes))
  }

  pub fn cache(&self) -> Option<&Arc<Cache>> {
    self.cache.as_ref()
  }

  /// True when both handles write to the same backing store.
  pub fn same_store(&self, other: &Storage) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(&self.store), Arc::as_ptr(&other.store))
  }

  // ---- raw bytes ----

  pub fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
    if let Some(cache) = &self.cache {
      cache.remove(key);
    }
    self.store.put(key, bytes)
  }

  pub fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
    self.store.get(key)
  }

  pub fn exists(&self, key: &str) -> Result<bool> {
    if let Some(cache) = &self.cache {
      if cache.contains(key) {
        return Ok(true);
      }
    }
    self.store.contains(key)
  }

  pub fn remove(&self, key: &str) -> Result<()> {
    if let Some(cache) = &self.cache {
      cache.remove(key);
    }
    self.store.remove(key)
  }

  pub fn flush(&self) -> Result<()> {
    self.store.flush()
  }

  // ---- generic typed access ----

  fn put_encoded<T>(&self, key: &str, value: Arc<T>, bytes: &[u8]) -> Result<()>
  where
    T: Send + Sync + 'static,
  {
    self.store.put(key, bytes)?;
    if let Some(cache) = &self.cache {
      cache.insert(key, value, bytes.len());
    }
    trace!(key, size = bytes.len(), "stored");
    Ok(())
  }

  fn get_decoded<T, F>(&self, key: &str, decode: F) -> Result<Option<Arc<T>>>
  where
    T: Send + Sync + 'static,
    F: FnOnce(&[u8]) -> Result<T>,
  {
    if let Some(cache) = &self.cache {
      if let Some(hit) = cache.get::<T>(key) {
        return Ok(Some(hit));
      }
    }
    let Some(bytes) = self.store.get(key)? else {
      return Ok(None);
    };
    let value = Arc::new(decode(&bytes)?);
    if let Some(cache) = &self.cache {
      cache.insert(key, Arc::clone(&value), bytes.len());
    }
    Ok(Some(value))
  }

  pub fn put<T: Storable>(&self, key: &str, value: Arc<T>) -> Result<()> {
    let bytes = value.encode()?;
    self.put_encoded(key, value, &bytes)
  }

  pub fn get<T: Storable>(&self, key: &str) -> Result<Option<Arc<T>>> {
    self.get_decoded(key, |bytes| T::decode(key, bytes))
  }

  /// Lazy reference to the value stored under `key`.
  pub fn reference<T: Storable>(&self, key: &str) -> PersistentRef<T> {
    PersistentRef::new(key, self.resolver::<T>())
  }

  /// Store `value` under a fresh random key and return an already resolved
  /// reference to it.
  pub fn store_new<T: Storable>(&self, value: T) -> Result<PersistentRef<T>> {
    let key = NodeId::new().key();
    let value = Arc::new(value);
    self.put(&key, Arc::clone(&value))?;
    Ok(PersistentRef::resolved(key, self.resolver::<T>(), value))
  }

  fn resolver<T: Storable>(&self) -> Resolver<T> {
    let storage = self.clone();
    Arc::new(move |key: &str| storage.get::<T>(key))
  }

  // ---- named accessors ----

  pub fn put_v3f_array(&self, key: &str, values: Arc<Vec<Vec3>>) -> Result<()> {
    self.put(key, values)
  }

  pub fn get_v3f_array(&self, key: &str) -> Result<Option<Arc<Vec<Vec3>>>> {
    self.get(key)
  }

  pub fn put_v3d_array(&self, key: &str, values: Arc<Vec<DVec3>>) -> Result<()> {
    self.put(key, values)
  }

  pub fn get_v3d_array(&self, key: &str) -> Result<Option<Arc<Vec<DVec3>>>> {
    self.get(key)
  }

  pub fn put_c4b_array(&self, key: &str, values: Arc<Vec<C4b>>) -> Result<()> {
    self.put(key, values)
  }

  pub fn get_c4b_array(&self, key: &str) -> Result<Option<Arc<Vec<C4b>>>> {
    self.get(key)
  }

  pub fn put_i32_array(&self, key: &str, values: Arc<Vec<i32>>) -> Result<()> {
    self.put(key, values)
  }

  pub fn get_i32_array(&self, key: &str) -> Result<Option<Arc<Vec<i32>>>> {
    self.get(key)
  }

  pub fn put_u8_array(&self, key: &str, values: Arc<Vec<u8>>) -> Result<()> {
    self.put(key, values)
  }

  pub fn get_u8_array(&self, key: &str) -> Result<Option<Arc<Vec<u8>>>> {
    self.get(key)
  }

  pub fn put_kd_tree(&self, key: &str, tree: Arc<KdTreeData>) -> Result<()> {
    self.put(key, tree)
  }

  pub fn get_kd_tree(&self, key: &str) -> Result<Option<Arc<KdTreeData>>> {
    self.get(key)
  }

  // ---- nodes and point sets ----

  /// Persist a node under its own id.
  pub fn put_node(&self, node: PointSetNode) -> Result<Arc<PointSetNode>> {
    let key = node.id.key();
    let bytes = node_codec::encode(&node)?;
    let node = Arc::new(node);
    self.put_encoded(&key, Arc::clone(&node), &bytes)?;
    Ok(node)
  }

  pub fn get_node(&self, id: NodeId) -> Result<Option<Arc<PointSetNode>>> {
    self.get_node_by_key(&id.key())
  }

  /// Node stored under `key`. A record whose id does not match the key is a
  /// corrupted store.
  pub fn get_node_by_key(&self, key: &str) -> Result<Option<Arc<PointSetNode>>> {
    let node = self.get_decoded(key, |bytes| node_codec::decode(self, key, bytes))?;
    if let Some(node) = &node {
      if node.id.key() != key {
        return Err(OctreeError::invariant(format!(
          "node {} read from key {key}",
          node.id
        )));
      }
    }
    Ok(node)
  }

  /// Node that an operation requires to exist.
  pub fn require_node(&self, id: NodeId) -> Result<Arc<PointSetNode>> {
    self
      .get_node(id)?
      .ok_or_else(|| OctreeError::NotFound { key: id.key() })
  }

  /// Persist a point set under its own id.
  pub fn put_point_set(&self, point_set: PointSet) -> Result<Arc<PointSet>> {
    let key = point_set.id.clone();
    let bytes = point_set.to_json_bytes()?;
    let point_set = Arc::new(point_set);
    self.put_encoded(&key, Arc::clone(&point_set), &bytes)?;
    Ok(point_set)
  }

  pub fn get_point_set(&self, key: &str) -> Result<Option<Arc<PointSet>>> {
    let ps = self.get_decoded(key, |bytes| PointSet::from_json_bytes(bytes))?;
    if let Some(ps) = &ps {
      if ps.id != key {
        return Err(OctreeError::invariant(format!(
          "point set {} read from key {key}",
          ps.id
        )));
      }
    }
    Ok(ps)
  }
}

impl fmt::Debug for Storage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Storage")
      .field("cached", &self.cache.is_some())
      .finish_non_exhaustive()
  }
}
