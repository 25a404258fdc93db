//! Level-of-detail generation.
//!
//! A bottom-up pass over a persisted tree. Leaves get an index, normals (when
//! missing) and statistics. Inner nodes first process their children
//! concurrently, then store an evenly strided sample of exactly `split_limit`
//! points drawn proportionally from the children, together with a fresh
//! index, estimated normals and the same statistics.
//!
//! Nodes are re-persisted; raw leaf arrays keep their storage keys. A failing
//! or cancelled node aborts the whole pass before any ancestor is written.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use glam::{DVec3, Vec3};
use rayon::prelude::*;
use smallvec::SmallVec;
use tracing::{debug, error, info, warn};
use web_time::Instant;

use crate::error::{OctreeError, Result};
use crate::geometry::{Box3d, Box3f};
use crate::ids::NodeId;
use crate::knn::{KdTree, KdTreeData};
use crate::node::{AttributeRef, LodStats, PointSetNode};
use crate::normals::{estimate_normals, NORMAL_NEIGHBORS};
use crate::stats::TreeStats;
use crate::storage::{Storable, Storage};
use crate::threading::{CancellationToken, ProgressFn};

/// Which id a rewritten node is stored under.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NodeIdPolicy {
  /// Every rewritten node gets a new id; the input tree stays intact.
  #[default]
  Fresh,
  /// Nodes are overwritten under their existing ids.
  Keep,
}

#[derive(Clone, Default)]
pub struct LodConfig {
  pub node_ids: NodeIdPolicy,
  pub progress: Option<ProgressFn>,
  pub token: CancellationToken,
}

impl LodConfig {
  pub fn with_node_ids(mut self, node_ids: NodeIdPolicy) -> Self {
    self.node_ids = node_ids;
    self
  }

  pub fn with_progress(mut self, progress: impl Fn(f64) + Send + Sync + 'static) -> Self {
    self.progress = Some(Arc::new(progress));
    self
  }

  pub fn with_token(mut self, token: CancellationToken) -> Self {
    self.token = token;
    self
  }
}

impl fmt::Debug for LodConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LodConfig")
      .field("node_ids", &self.node_ids)
      .field("progress", &self.progress.is_some())
      .field("token", &self.token)
      .finish()
  }
}

/// Decorate the tree below `root` with LOD data and return the new root.
#[tracing::instrument(skip_all, name = "lod::generate_lod")]
pub fn generate_lod(
  storage: &Storage,
  root: NodeId,
  split_limit: usize,
  config: &LodConfig,
) -> Result<Arc<PointSetNode>> {
  if split_limit == 0 {
    return Err(OctreeError::config("split limit must be positive"));
  }
  let start = Instant::now();
  let root = storage.require_node(root)?;
  let total = TreeStats::collect(storage, &root)?.node_count as usize;

  let pass = LodPass {
    storage,
    split_limit,
    config,
    total,
    done: AtomicUsize::new(0),
  };
  match pass.node(&root) {
    Ok(lodded) => {
      if let Some(progress) = &config.progress {
        progress(1.0);
      }
      info!(
        nodes = total,
        root = %lodded.id,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "generated lod"
      );
      Ok(lodded)
    }
    Err(e) if e.is_cancelled() => {
      warn!(root = %root.id, "lod generation cancelled");
      Err(e)
    }
    Err(e) => {
      error!(root = %root.id, error = %e, "lod generation failed");
      Err(e)
    }
  }
}

struct LodPass<'a> {
  storage: &'a Storage,
  split_limit: usize,
  config: &'a LodConfig,
  total: usize,
  done: AtomicUsize,
}

impl LodPass<'_> {
  fn node(&self, node: &PointSetNode) -> Result<Arc<PointSetNode>> {
    self.config.token.check()?;
    let lodded = if node.is_leaf() {
      self.leaf(node)?
    } else {
      self.inner(node)?
    };
    self.report();
    Ok(lodded)
  }

  fn report(&self) {
    let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
    if let Some(progress) = &self.config.progress {
      progress((done as f64 / self.total.max(1) as f64).min(1.0));
    }
  }

  fn persist(&self, node: PointSetNode) -> Result<Arc<PointSetNode>> {
    let node = match self.config.node_ids {
      NodeIdPolicy::Fresh => node.with_new_id(),
      NodeIdPolicy::Keep => node,
    };
    self.storage.put_node(node)
  }

  fn leaf(&self, node: &PointSetNode) -> Result<Arc<PointSetNode>> {
    let positions = node
      .local_positions()?
      .ok_or_else(|| OctreeError::invariant(format!("leaf {} has no positions", node.id)))?;

    let (kd_ref, kd) = match (node.kd_tree.clone(), node.kd_tree()?) {
      (Some(r), Some(kd)) if kd.len() == positions.len() => (r, kd),
      _ => {
        let kd = KdTreeData::build(&positions);
        (store(self.storage, kd.clone())?, Arc::new(kd))
      }
    };
    let tree = kd.view(&positions)?;

    let normals = match &node.normals {
      Some(n) => n.clone(),
      None => store(
        self.storage,
        estimate_normals(&positions, &tree, NORMAL_NEIGHBORS),
      )?,
    };

    let local = Box3f::from_points(positions.iter());
    let stats = LodStats {
      min_tree_depth: 0,
      max_tree_depth: 0,
      ..point_stats(&positions, &tree)
    };

    self.persist(
      node
        .clone()
        .with_kd_tree(Some(kd_ref))
        .with_normals(Some(normals))
        .with_bounding_boxes(Some(local), Some(local.to_global(node.center())))
        .with_lod_stats(stats),
    )
  }

  fn inner(&self, node: &PointSetNode) -> Result<Arc<PointSetNode>> {
    let present: SmallVec<[(u8, NodeId); 8]> = node.children().collect();
    let children: Vec<(u8, Arc<PointSetNode>)> = present
      .par_iter()
      .map(|&(octant, id)| {
        let child = self.storage.require_node(id)?;
        Ok((octant, self.node(&child)?))
      })
      .collect::<Result<_>>()?;

    let _span = tracing::info_span!("aggregate", node = %node.id).entered();
    let tree_counts: SmallVec<[u64; 8]> = children.iter().map(|(_, c)| c.point_count_tree).collect();
    let counts = lod_counts(self.split_limit, &tree_counts)?;

    let center = node.center();
    let mut positions = Vec::with_capacity(self.split_limit);
    let mut picks: SmallVec<[Vec<usize>; 8]> = SmallVec::new();
    for ((_, child), &count) in children.iter().zip(counts.iter()) {
      let child_positions = child.local_positions()?.ok_or_else(|| {
        OctreeError::invariant(format!("node {} has no positions after lod", child.id))
      })?;
      let offset = child.center() - center;
      let indices = stride_indices(child_positions.len(), count);
      positions.extend(
        indices
          .iter()
          .map(|&i| (child_positions[i].as_dvec3() + offset).as_vec3()),
      );
      picks.push(indices);
    }

    let colors = resample(&children, &picks, |c| c.colors())?;
    let intensities = resample(&children, &picks, |c| c.intensities())?;
    let classifications = resample(&children, &picks, |c| c.classifications())?;

    let kd = KdTreeData::build(&positions);
    let normals = estimate_normals(&positions, &kd.view(&positions)?, NORMAL_NEIGHBORS);

    let mut subnodes = [None; 8];
    let mut min_depth = i32::MAX;
    let mut max_depth = 0;
    let mut global = Box3d::INVALID;
    for (octant, child) in &children {
      subnodes[*octant as usize] = Some(child.id);
      let depth = child.lod.unwrap_or_default();
      min_depth = min_depth.min(1 + depth.min_tree_depth);
      max_depth = max_depth.max(1 + depth.max_tree_depth);
      global = global.union(&child.bounding_box());
    }
    let stats = LodStats {
      min_tree_depth: min_depth,
      max_tree_depth: max_depth,
      ..point_stats(&positions, &kd.view(&positions)?)
    };
    let local = Box3f::from_points(positions.iter());
    debug!(
      node = %node.id,
      children = children.len(),
      sampled = positions.len(),
      "aggregated lod sample"
    );

    let count = positions.len();
    self.persist(
      node
        .clone()
        .with_subnodes(subnodes)
        .with_positions(AttributeRef::store(self.storage, positions)?, count)
        .with_kd_tree(Some(store(self.storage, kd)?))
        .with_normals(Some(store(self.storage, normals)?))
        .with_colors(colors.map(|c| AttributeRef::store(self.storage, c)).transpose()?)
        .with_intensities(intensities.map(|i| AttributeRef::store(self.storage, i)).transpose()?)
        .with_classifications(
          classifications
            .map(|k| AttributeRef::store(self.storage, k))
            .transpose()?,
        )
        .with_bounding_boxes(Some(local), Some(global))
        .with_lod_stats(stats),
    )
  }
}

fn store<T: Storable>(storage: &Storage, value: T) -> Result<AttributeRef<T>> {
  AttributeRef::store(storage, value)
}

/// Gather an attribute along the picked indices of every child. Children
/// without the attribute contribute default values; `None` when no child has
/// it.
fn resample<T, F>(
  children: &[(u8, Arc<PointSetNode>)],
  picks: &[Vec<usize>],
  get: F,
) -> Result<Option<Vec<T>>>
where
  T: Copy + Default,
  F: Fn(&PointSetNode) -> Result<Option<Arc<Vec<T>>>>,
{
  let values: Vec<Option<Arc<Vec<T>>>> = children
    .iter()
    .map(|(_, c)| get(c.as_ref()))
    .collect::<Result<_>>()?;
  if values.iter().all(Option::is_none) {
    return Ok(None);
  }

  let mut out = Vec::with_capacity(picks.iter().map(Vec::len).sum());
  for ((value, indices), (_, child)) in values.iter().zip(picks).zip(children) {
    match value {
      Some(vs) => {
        if vs.len() != child.point_count_cell as usize {
          return Err(OctreeError::invariant(format!(
            "node {} has {} attribute values for {} points",
            child.id,
            vs.len(),
            child.point_count_cell
          )));
        }
        out.extend(indices.iter().map(|&i| vs[i]));
      }
      None => out.extend(std::iter::repeat(T::default()).take(indices.len())),
    }
  }
  Ok(Some(out))
}

/// Split `split_limit` proportionally to `counts`, carrying the fractional
/// remainder from one child to the next. The result sums to `split_limit`
/// unless every count is zero.
pub fn lod_counts(split_limit: usize, counts: &[u64]) -> Result<SmallVec<[usize; 8]>> {
  let total: u64 = counts.iter().sum();
  if total == 0 {
    return Ok(counts.iter().map(|_| 0).collect());
  }

  let mut remainder = 0.1;
  let allocated: SmallVec<[usize; 8]> = counts
    .iter()
    .map(|&c| {
      let f = split_limit as f64 * (c as f64 / total as f64) + remainder;
      let n = f as usize;
      remainder = f - n as f64;
      n
    })
    .collect();

  let sum: usize = allocated.iter().sum();
  if sum != split_limit {
    return Err(OctreeError::invariant(format!(
      "lod allocation {allocated:?} sums to {sum}, expected {split_limit}"
    )));
  }
  Ok(allocated)
}

/// Evenly strided indices selecting `count` of `len` elements. Everything
/// is taken when `len <= count`.
pub fn stride_indices(len: usize, count: usize) -> Vec<usize> {
  if count == 0 {
    return Vec::new();
  }
  if len <= count {
    return (0..len).collect();
  }
  let step = (len as f64 + 0.49) / count as f64;
  let mut indices = Vec::with_capacity(count);
  let mut j = 0.0;
  while j < len as f64 && indices.len() < count {
    indices.push(j as usize);
    j += step;
  }
  indices
}

/// Centroid, distance-to-centroid and nearest-neighbor statistics.
fn point_stats(positions: &[Vec3], kd: &KdTree<'_>) -> LodStats {
  if positions.is_empty() {
    return LodStats::default();
  }
  let n = positions.len() as f64;
  let centroid = positions.iter().map(|p| p.as_dvec3()).sum::<DVec3>() / n;
  let (dist_avg, dist_sd) = average_and_std_dev(
    positions
      .iter()
      .map(|p| p.as_dvec3().distance(centroid)),
  );

  let (nn_avg, nn_sd) = if positions.len() < 2 {
    (0.0, 0.0)
  } else {
    let nearest: Vec<f64> = positions
      .par_iter()
      .map(|&p| {
        kd.closest(p, 2, f32::INFINITY)
          .get(1)
          .map_or(0.0, |n| n.distance as f64)
      })
      .collect();
    average_and_std_dev(nearest.into_iter())
  };

  LodStats {
    min_tree_depth: 0,
    max_tree_depth: 0,
    centroid: centroid.as_vec3(),
    dist_to_centroid_average: dist_avg,
    dist_to_centroid_std_dev: dist_sd,
    average_point_distance: nn_avg,
    average_point_distance_std_dev: nn_sd,
  }
}

fn average_and_std_dev(values: impl Iterator<Item = f64>) -> (f32, f32) {
  let (mut n, mut sum, mut sum_sq) = (0usize, 0.0, 0.0);
  for v in values {
    n += 1;
    sum += v;
    sum_sq += v * v;
  }
  if n == 0 {
    return (0.0, 0.0);
  }
  let avg = sum / n as f64;
  let var = (sum_sq / n as f64 - avg * avg).max(0.0);
  (avg as f32, var.sqrt() as f32)
}

#[cfg(test)]
#[path = "lod_test.rs"]
mod lod_test;
