//! PersistentRef - lazy, memoized handle to a stored value.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::{OctreeError, Result};

/// Fetches a value by key; `Ok(None)` when nothing is stored.
pub type Resolver<T> = Arc<dyn Fn(&str) -> Result<Option<Arc<T>>> + Send + Sync>;

/// Reference to a value stored under `id`. The first successful access
/// resolves and memoizes the value for the lifetime of the reference. Holding
/// a reference never implies ownership of the backing store.
pub struct PersistentRef<T> {
  id: String,
  resolver: Resolver<T>,
  value: OnceLock<Arc<T>>,
}

impl<T> PersistentRef<T> {
  pub fn new(id: impl Into<String>, resolver: Resolver<T>) -> Self {
    Self {
      id: id.into(),
      resolver,
      value: OnceLock::new(),
    }
  }

  /// Reference whose value is already known, e.g. right after storing it.
  pub fn resolved(id: impl Into<String>, resolver: Resolver<T>, value: Arc<T>) -> Self {
    let r = Self::new(id, resolver);
    let _ = r.value.set(value);
    r
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn is_resolved(&self) -> bool {
    self.value.get().is_some()
  }

  /// Resolve, `Ok(None)` when the id is not in storage.
  pub fn try_value(&self) -> Result<Option<Arc<T>>> {
    if let Some(v) = self.value.get() {
      return Ok(Some(Arc::clone(v)));
    }
    let Some(v) = (self.resolver)(&self.id)? else {
      return Ok(None);
    };
    // a concurrent resolver may have won; both read the same stored bytes
    Ok(Some(Arc::clone(self.value.get_or_init(|| v))))
  }

  /// Resolve a value that must exist.
  pub fn value(&self) -> Result<Arc<T>> {
    self.try_value()?.ok_or_else(|| OctreeError::NotFound {
      key: self.id.clone(),
    })
  }
}

impl<T> Clone for PersistentRef<T> {
  fn clone(&self) -> Self {
    let value = OnceLock::new();
    if let Some(v) = self.value.get() {
      let _ = value.set(Arc::clone(v));
    }
    Self {
      id: self.id.clone(),
      resolver: Arc::clone(&self.resolver),
      value,
    }
  }
}

impl<T> fmt::Debug for PersistentRef<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PersistentRef")
      .field("id", &self.id)
      .field("resolved", &self.is_resolved())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;

  #[test]
  fn resolves_once_and_memoizes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let resolver: Resolver<u32> = Arc::new(move |key: &str| {
      counter.fetch_add(1, Ordering::SeqCst);
      Ok((key == "present").then(|| Arc::new(7)))
    });

    let r = PersistentRef::new("present", Arc::clone(&resolver));
    assert!(!r.is_resolved());
    assert_eq!(*r.value().unwrap(), 7);
    assert_eq!(*r.value().unwrap(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let clone = r.clone();
    assert!(clone.is_resolved());

    let missing = PersistentRef::new("absent", resolver);
    assert!(missing.try_value().unwrap().is_none());
    assert!(matches!(missing.value(), Err(OctreeError::NotFound { .. })));
  }
}
