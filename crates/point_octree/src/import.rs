//! Chunk ingestion: point batches in, persisted [`PointSet`] out.
//!
//! Stages run in order over the whole batch sequence:
//!
//! 1. exact duplicates are removed per chunk
//! 2. small chunks are merged up to `max_chunk_point_count`
//! 3. optional minimum distance thinning, then merging again
//! 4. optional reprojection on the bounded [`WorkerPool`]
//! 5. one octree per chunk, reduced by pairwise merges
//! 6. optional LOD pass
//!
//! # Usage
//!
//! ```ignore
//! let config = ImportConfig { key: Some("scan.json".into()), ..Default::default() }
//!   .with_progress(|p| println!("{:.0}%", p * 100.0));
//! let set = import_chunks(&storage, chunks, &config)?;
//! ```

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use glam::DVec3;
use rayon::prelude::*;
use serde::Deserialize;
use tracing::{debug, info};
use web_time::Instant;

use crate::builder::build_tree;
use crate::cell::Cell;
use crate::chunk::Chunk;
use crate::error::{OctreeError, Result};
use crate::ids::NodeId;
use crate::lod::{generate_lod, LodConfig};
use crate::merge::merge_trees;
use crate::node::PointSetNode;
use crate::pointset::{PointSet, DEFAULT_SPLIT_LIMIT};
use crate::storage::{Storage, DEFAULT_CACHE_BYTES};
use crate::threading::{CancellationToken, ProgressFn, WorkerPool};

/// Position transform applied to every point before building.
pub type ReprojectFn = Arc<dyn Fn(DVec3) -> DVec3 + Send + Sync>;

/// Share of the progress range spent before the LOD pass.
const BUILD_PROGRESS: f64 = 0.66;

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
  /// Key of the resulting point set; a random one when absent.
  pub key: Option<String>,
  pub split_limit: usize,
  pub max_chunk_point_count: usize,
  /// Thinning distance; 0 disables thinning.
  pub min_dist: f64,
  /// Thin on a global grid instead of sequentially per chunk.
  pub normalize_point_density_global: bool,
  /// 0 uses all cores.
  pub max_degree_of_parallelism: usize,
  pub generate_lod: bool,
  pub cache_size_bytes: usize,

  #[serde(skip)]
  pub reproject: Option<ReprojectFn>,
  #[serde(skip)]
  pub progress: Option<ProgressFn>,
  #[serde(skip)]
  pub token: CancellationToken,
}

impl Default for ImportConfig {
  fn default() -> Self {
    Self {
      key: None,
      split_limit: DEFAULT_SPLIT_LIMIT,
      max_chunk_point_count: 1_048_576,
      min_dist: 0.0,
      normalize_point_density_global: false,
      max_degree_of_parallelism: 0,
      generate_lod: true,
      cache_size_bytes: DEFAULT_CACHE_BYTES,
      reproject: None,
      progress: None,
      token: CancellationToken::new(),
    }
  }
}

impl fmt::Debug for ImportConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ImportConfig")
      .field("key", &self.key)
      .field("split_limit", &self.split_limit)
      .field("max_chunk_point_count", &self.max_chunk_point_count)
      .field("min_dist", &self.min_dist)
      .field("normalize_point_density_global", &self.normalize_point_density_global)
      .field("max_degree_of_parallelism", &self.max_degree_of_parallelism)
      .field("generate_lod", &self.generate_lod)
      .field("cache_size_bytes", &self.cache_size_bytes)
      .field("reproject", &self.reproject.is_some())
      .finish_non_exhaustive()
  }
}

impl ImportConfig {
  pub fn with_reproject(mut self, f: impl Fn(DVec3) -> DVec3 + Send + Sync + 'static) -> Self {
    self.reproject = Some(Arc::new(f));
    self
  }

  pub fn with_progress(mut self, f: impl Fn(f64) + Send + Sync + 'static) -> Self {
    self.progress = Some(Arc::new(f));
    self
  }

  pub fn with_token(mut self, token: CancellationToken) -> Self {
    self.token = token;
    self
  }

  /// Directory store using the configured cache budget.
  pub fn open_directory(&self, path: impl AsRef<Path>) -> Result<Storage> {
    Storage::open_directory(path, self.cache_size_bytes)
  }

  fn validate(&self) -> Result<()> {
    if self.split_limit == 0 {
      return Err(OctreeError::config("split_limit must be positive"));
    }
    if self.max_chunk_point_count == 0 {
      return Err(OctreeError::config("max_chunk_point_count must be positive"));
    }
    if self.min_dist.is_nan() || self.min_dist < 0.0 {
      return Err(OctreeError::config(format!("invalid min_dist {}", self.min_dist)));
    }
    Ok(())
  }

  fn report(&self, fraction: f64) {
    if let Some(progress) = &self.progress {
      progress(fraction.clamp(0.0, 1.0));
    }
  }
}

/// Import a sequence of point batches into `storage`.
#[tracing::instrument(skip_all, name = "import::import_chunks")]
pub fn import_chunks(
  storage: &Storage,
  chunks: impl IntoIterator<Item = Chunk>,
  config: &ImportConfig,
) -> Result<Arc<PointSet>> {
  config.validate()?;
  let start = Instant::now();
  let token = &config.token;
  config.report(0.0);

  let chunks = {
    let _span = tracing::info_span!("prepare").entered();
    prepare(chunks, config)?
  };
  let chunks = match &config.reproject {
    Some(f) => {
      let _span = tracing::info_span!("reproject").entered();
      let pool = WorkerPool::new(config.max_degree_of_parallelism)?;
      pool.map_ordered(chunks, token, |c| Ok(c.map_positions(|p| f(p))))?
    }
    None => chunks,
  };
  debug!(chunks = chunks.len(), "prepared chunks");

  let key = config
    .key
    .clone()
    .unwrap_or_else(|| NodeId::new().to_string());

  let Some(mut root) = build_and_reduce(storage, chunks, config)? else {
    info!("no points to import");
    config.report(1.0);
    return storage.put_point_set(PointSet::empty(key, config.split_limit));
  };

  if config.generate_lod {
    let report = config.progress.clone();
    let mut lod = LodConfig::default().with_token(token.clone());
    if let Some(report) = report {
      lod = lod.with_progress(move |x| report(BUILD_PROGRESS + x * (1.0 - BUILD_PROGRESS)));
    }
    root = generate_lod(storage, root.id, config.split_limit, &lod)?;
  }
  // the final root has to be readable before the handle is published
  storage.require_node(root.id)?;

  let point_set = storage.put_point_set(PointSet::new(key, config.split_limit, Some(root.id)))?;
  config.report(1.0);
  info!(
    key = %point_set.id,
    points = root.point_count_tree,
    elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
    "imported point set"
  );
  Ok(point_set)
}

/// Deduplicate, merge small, thin and merge small again.
fn prepare(chunks: impl IntoIterator<Item = Chunk>, config: &ImportConfig) -> Result<Vec<Chunk>> {
  let limit = config.max_chunk_point_count;
  let mut deduped = Vec::new();
  for chunk in chunks {
    config.token.check()?;
    deduped.push(chunk.deduplicate());
  }
  let merged = merge_small(limit, deduped);

  if config.min_dist <= 0.0 {
    return Ok(merged);
  }
  let thinned = merged
    .into_iter()
    .map(|c| {
      if config.normalize_point_density_global {
        c.filter_min_dist_by_cell(config.min_dist)
      } else {
        c.filter_sequential_min_dist_l1(config.min_dist)
      }
    })
    .collect();
  Ok(merge_small(limit, thinned))
}

/// Concatenate consecutive chunks smaller than `limit` until they reach it.
/// Large chunks pass through unchanged; empty chunks are dropped.
pub fn merge_small(limit: usize, chunks: Vec<Chunk>) -> Vec<Chunk> {
  let mut out = Vec::with_capacity(chunks.len());
  let mut current: Option<Chunk> = None;
  for chunk in chunks.into_iter().filter(|c| !c.is_empty()) {
    if chunk.len() >= limit {
      out.push(chunk);
      continue;
    }
    let acc = match current.take() {
      Some(acc) => acc.union(&chunk),
      None => chunk,
    };
    if acc.len() >= limit {
      out.push(acc);
    } else {
      current = Some(acc);
    }
  }
  out.extend(current);
  out
}

/// One tree per chunk, then pairwise merges until a single root remains.
fn build_and_reduce(
  storage: &Storage,
  chunks: Vec<Chunk>,
  config: &ImportConfig,
) -> Result<Option<Arc<PointSetNode>>> {
  let token = &config.token;
  let total = chunks.len().max(1);
  // builds plus merges
  let steps = (2 * total).saturating_sub(1) as f64;
  let done = AtomicUsize::new(0);
  let step = || {
    let n = done.fetch_add(1, Ordering::Relaxed) + 1;
    config.report(0.01 + (n as f64 / steps) * (BUILD_PROGRESS - 0.01));
  };

  let mut roots = Vec::with_capacity(chunks.len());
  for chunk in &chunks {
    token.check()?;
    let Some(cell) = Cell::from_box(&chunk.bounding_box()) else {
      continue;
    };
    roots.push(build_tree(storage, chunk, cell, config.split_limit)?);
    step();
  }

  let _span = tracing::info_span!("reduce", trees = roots.len()).entered();
  while roots.len() > 1 {
    token.check()?;
    roots = roots
      .par_chunks(2)
      .map(|pair| match pair {
        [a, b] => {
          let merged = merge_trees(storage, a, b, config.split_limit, token)?;
          step();
          Ok(merged)
        }
        [a] => Ok(Arc::clone(a)),
        _ => Err(OctreeError::invariant("empty merge pair")),
      })
      .collect::<Result<Vec<_>>>()?;
  }
  Ok(roots.pop())
}

#[cfg(test)]
#[path = "import_test.rs"]
mod import_test;
