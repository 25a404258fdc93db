//! Raw key/byte-buffer stores behind `Storage`.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::Result;

/// Minimal persistent key/value store of byte buffers.
///
/// Implementations must allow concurrent reads and concurrent writes to
/// distinct keys.
pub trait BlobStore: Send + Sync {
  fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

  /// `Ok(None)` when nothing is stored under `key`.
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

  /// Removing a missing key is not an error.
  fn remove(&self, key: &str) -> Result<()>;

  fn flush(&self) -> Result<()>;

  fn contains(&self, key: &str) -> Result<bool> {
    Ok(self.get(key)?.is_some())
  }
}

/// Volatile store for tests and scratch trees.
#[derive(Default)]
pub struct MemoryBlobStore {
  blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.blobs.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.blobs.read().is_empty()
  }
}

impl BlobStore for MemoryBlobStore {
  fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
    self.blobs.write().insert(key.to_owned(), bytes.to_vec());
    Ok(())
  }

  fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    Ok(self.blobs.read().get(key).cloned())
  }

  fn remove(&self, key: &str) -> Result<()> {
    self.blobs.write().remove(key);
    Ok(())
  }

  fn flush(&self) -> Result<()> {
    Ok(())
  }

  fn contains(&self, key: &str) -> Result<bool> {
    Ok(self.blobs.read().contains_key(key))
  }
}

/// One file per key under a root directory.
pub struct DirectoryBlobStore {
  root: PathBuf,
}

impl DirectoryBlobStore {
  /// Open (creating if needed) a store rooted at `root`.
  pub fn open(root: impl AsRef<Path>) -> Result<Self> {
    let root = root.as_ref().to_path_buf();
    fs::create_dir_all(&root)?;
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn path_of(&self, key: &str) -> PathBuf {
    self.root.join(file_name(key))
  }
}

/// `%` followed by non-hex characters never comes out of [`file_name`].
const TMP_SUFFIX: &str = "%tmp";

/// Reversible file name for `key`: every byte outside `[A-Za-z0-9-.]` and a
/// leading `.` become `%XX`.
fn file_name(key: &str) -> String {
  let mut name = String::with_capacity(key.len());
  for (i, b) in key.bytes().enumerate() {
    if b.is_ascii_alphanumeric() || b == b'-' || (b == b'.' && i > 0) {
      name.push(b as char);
    } else {
      name.push_str(&format!("%{b:02X}"));
    }
  }
  name
}

impl BlobStore for DirectoryBlobStore {
  fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
    let path = self.path_of(key);
    let mut tmp = path.clone().into_os_string();
    tmp.push(TMP_SUFFIX);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, &path)?;
    Ok(())
  }

  fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    match fs::read(self.path_of(key)) {
      Ok(bytes) => Ok(Some(bytes)),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  fn remove(&self, key: &str) -> Result<()> {
    match fs::remove_file(self.path_of(key)) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }

  fn flush(&self) -> Result<()> {
    Ok(())
  }

  fn contains(&self, key: &str) -> Result<bool> {
    Ok(self.path_of(key).is_file())
  }
}
