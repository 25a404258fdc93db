//! Cooperative cancellation and the bounded worker pool.
//!
//! Recursive passes (LOD, merge) fork with `rayon` directly. Chunk-level
//! transforms run on a [`WorkerPool`], a dedicated rayon pool whose size is
//! the configured maximum degree of parallelism.
//!
//! # Usage
//!
//! ```ignore
//! let pool = WorkerPool::new(4)?;
//! let token = CancellationToken::new();
//!
//! // Ordered parallel map; stops early once the token fires.
//! let squares = pool.map_ordered(inputs, &token, |x| Ok(x * x))?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::{OctreeError, Result};

/// Progress callback receiving a completed fraction in [0, 1].
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Shared flag checked at the entry of each unit of work.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
  cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::Relaxed);
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::Relaxed)
  }

  /// `Err(Cancelled)` once the token fired.
  #[inline]
  pub fn check(&self) -> Result<()> {
    if self.is_cancelled() {
      Err(OctreeError::Cancelled)
    } else {
      Ok(())
    }
  }
}

/// Fixed-size pool for chunk transforms.
pub struct WorkerPool {
  pool: rayon::ThreadPool,
}

impl WorkerPool {
  /// Pool with `max_degree_of_parallelism` threads; 0 uses all cores.
  pub fn new(max_degree_of_parallelism: usize) -> Result<Self> {
    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(max_degree_of_parallelism)
      .thread_name(|i| format!("octree-worker-{i}"))
      .build()
      .map_err(|e| OctreeError::config(format!("cannot start worker pool: {e}")))?;
    Ok(Self { pool })
  }

  pub fn num_threads(&self) -> usize {
    self.pool.current_num_threads()
  }

  /// Run `f` on the pool and wait for it.
  pub fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
    self.pool.install(f)
  }

  /// Apply `f` to every item in parallel, keeping input order. The first
  /// error (or cancellation) is returned.
  pub fn map_ordered<T, R, F>(
    &self,
    items: Vec<T>,
    token: &CancellationToken,
    f: F,
  ) -> Result<Vec<R>>
  where
    T: Send,
    R: Send,
    F: Fn(T) -> Result<R> + Sync + Send,
  {
    self.pool.install(|| {
      items
        .into_par_iter()
        .map(|item| {
          token.check()?;
          f(item)
        })
        .collect()
    })
  }
}
