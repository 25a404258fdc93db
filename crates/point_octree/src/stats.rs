//! Tree statistics gathered by walking a persisted octree.
//!
//! # Usage
//!
//! ```ignore
//! let stats = TreeStats::collect(&storage, &root)?;
//! println!("{} leaves, max depth {}", stats.leaf_count, stats.max_depth);
//! ```

use crate::error::Result;
use crate::node::PointSetNode;
use crate::storage::Storage;

/// Depth buckets; deeper levels are counted in the last one.
pub const DEPTH_BUCKETS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeStats {
  pub node_count: u64,
  pub leaf_count: u64,
  /// `point_count_tree` of the root.
  pub point_count_tree: u64,
  /// Sum of `point_count_cell` over all nodes, LOD samples included.
  pub point_count_cells: u64,
  pub max_depth: usize,
  /// Count of leaves at each depth (index = depth below the root).
  pub leaves_per_depth: [u64; DEPTH_BUCKETS],
  /// Leaf points at each depth.
  pub points_per_depth: [u64; DEPTH_BUCKETS],
  /// Nodes carrying LOD statistics.
  pub lod_node_count: u64,
}

impl Default for TreeStats {
  fn default() -> Self {
    Self {
      node_count: 0,
      leaf_count: 0,
      point_count_tree: 0,
      point_count_cells: 0,
      max_depth: 0,
      leaves_per_depth: [0; DEPTH_BUCKETS],
      points_per_depth: [0; DEPTH_BUCKETS],
      lod_node_count: 0,
    }
  }
}

impl TreeStats {
  /// Walk every node below `root`.
  pub fn collect(storage: &Storage, root: &PointSetNode) -> Result<Self> {
    let mut stats = Self {
      point_count_tree: root.point_count_tree,
      ..Self::default()
    };
    stats.record(root, 0);

    let mut stack: Vec<_> = root.children().map(|(_, id)| (id, 1usize)).collect();
    while let Some((id, depth)) = stack.pop() {
      let node = storage.require_node(id)?;
      stats.record(&node, depth);
      stack.extend(node.children().map(|(_, id)| (id, depth + 1)));
    }
    Ok(stats)
  }

  fn record(&mut self, node: &PointSetNode, depth: usize) {
    self.node_count += 1;
    self.point_count_cells += node.point_count_cell as u64;
    self.max_depth = self.max_depth.max(depth);
    if node.lod.is_some() {
      self.lod_node_count += 1;
    }
    if node.is_leaf() {
      let bucket = depth.min(DEPTH_BUCKETS - 1);
      self.leaf_count += 1;
      self.leaves_per_depth[bucket] += 1;
      self.points_per_depth[bucket] += node.point_count_tree;
    }
  }

  /// Average points per leaf, 0 for an empty tree.
  pub fn average_leaf_points(&self) -> f64 {
    if self.leaf_count == 0 {
      0.0
    } else {
      self.points_per_depth.iter().sum::<u64>() as f64 / self.leaf_count as f64
    }
  }

  /// Populated depth buckets as (depth, leaves, points).
  pub fn depth_histogram(&self) -> impl Iterator<Item = (usize, u64, u64)> + '_ {
    self
      .leaves_per_depth
      .iter()
      .zip(self.points_per_depth.iter())
      .enumerate()
      .filter(|(_, (&leaves, _))| leaves > 0)
      .map(|(depth, (&leaves, &points))| (depth, leaves, points))
  }
}

#[cfg(test)]
mod tests {
  use glam::DVec3;

  use super::*;
  use crate::builder::build_tree;
  use crate::cell::Cell;
  use crate::chunk::Chunk;

  #[test]
  fn test_single_leaf() {
    let storage = Storage::in_memory();
    let chunk = Chunk::new(vec![DVec3::splat(0.5)]);
    let root = build_tree(&storage, &chunk, Cell::new(0, 0, 0, 0), 8).unwrap();

    let stats = TreeStats::collect(&storage, &root).unwrap();
    assert_eq!(stats.node_count, 1);
    assert_eq!(stats.leaf_count, 1);
    assert_eq!(stats.max_depth, 0);
    assert_eq!(stats.average_leaf_points(), 1.0);
  }

  #[test]
  fn test_split_tree_histogram() {
    let storage = Storage::in_memory();
    let chunk = Chunk::new(vec![
      DVec3::new(0.1, 0.1, 0.1),
      DVec3::new(0.9, 0.1, 0.1),
      DVec3::new(0.1, 0.9, 0.1),
    ]);
    let root = build_tree(&storage, &chunk, Cell::new(0, 0, 0, 0), 2).unwrap();

    let stats = TreeStats::collect(&storage, &root).unwrap();
    assert_eq!(stats.node_count, 4);
    assert_eq!(stats.leaf_count, 3);
    assert_eq!(stats.point_count_tree, 3);
    assert_eq!(stats.point_count_cells, 3);
    assert_eq!(stats.depth_histogram().collect::<Vec<_>>(), vec![(1, 3, 3)]);
  }
}
