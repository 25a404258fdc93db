//! Nearest-neighbor index over a node's local positions.
//!
//! Wraps a `kiddo` immutable kd-tree whose items are indices into the
//! positions it was built from. The tree is persisted whole, as a bincode
//! blob.

use std::fmt;
use std::sync::Arc;

use glam::Vec3;
use kiddo::{ImmutableKdTree, SquaredEuclidean};

use crate::error::{OctreeError, Result};

type Tree = ImmutableKdTree<f32, 3>;

/// Persisted part of the index.
#[derive(Clone)]
pub struct KdTreeData {
  len: usize,
  tree: Option<Arc<Tree>>,
}

impl KdTreeData {
  pub fn build(positions: &[Vec3]) -> Self {
    let tree = (!positions.is_empty()).then(|| {
      let entries: Vec<[f32; 3]> = positions.iter().map(|p| p.to_array()).collect();
      Arc::new(Tree::new_from_slice(&entries))
    });
    Self {
      len: positions.len(),
      tree,
    }
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn to_bytes(&self) -> Result<Vec<u8>> {
    let tree = self.tree.as_deref();
    bincode::serialize(&(self.len as u64, tree))
      .map_err(|e| OctreeError::invariant(format!("kd-tree encoding failed: {e}")))
  }

  pub fn from_bytes(key: &str, bytes: &[u8]) -> Result<Self> {
    let (len, tree): (u64, Option<Tree>) =
      bincode::deserialize(bytes).map_err(|e| OctreeError::decode(key, e.to_string()))?;
    if (len == 0) != tree.is_none() {
      return Err(OctreeError::decode(key, "kd-tree length does not match its content"));
    }
    Ok(Self {
      len: len as usize,
      tree: tree.map(Arc::new),
    })
  }

  /// Borrow the index together with the positions it was built over.
  pub fn view<'a>(&'a self, positions: &'a [Vec3]) -> Result<KdTree<'a>> {
    if positions.len() != self.len {
      return Err(OctreeError::invariant(format!(
        "kd-tree over {} points used with {} positions",
        self.len,
        positions.len()
      )));
    }
    Ok(KdTree {
      positions,
      tree: self.tree.as_deref(),
    })
  }
}

impl fmt::Debug for KdTreeData {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("KdTreeData").field("len", &self.len).finish_non_exhaustive()
  }
}

/// One query result.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Neighbor {
  pub index: usize,
  pub distance: f32,
}

/// Queryable kd-tree paired with the positions it indexes.
#[derive(Clone, Copy)]
pub struct KdTree<'a> {
  positions: &'a [Vec3],
  tree: Option<&'a Tree>,
}

impl KdTree<'_> {
  pub fn positions(&self) -> &[Vec3] {
    self.positions
  }

  /// Up to `k` nearest points within `max_distance`, closest first. The
  /// query point itself is included when it is part of the indexed set.
  pub fn closest(&self, query: Vec3, k: usize, max_distance: f32) -> Vec<Neighbor> {
    let Some(tree) = self.tree else {
      return Vec::new();
    };
    if k == 0 {
      return Vec::new();
    }
    let max_sq = if max_distance.is_finite() {
      max_distance * max_distance
    } else {
      f32::INFINITY
    };

    let mut result: Vec<Neighbor> = tree
      .nearest_n::<SquaredEuclidean>(&query.to_array(), k)
      .into_iter()
      .filter(|n| n.distance <= max_sq)
      .map(|n| Neighbor {
        index: n.item as usize,
        distance: n.distance.sqrt(),
      })
      .collect();
    result.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.index.cmp(&b.index)));
    result
  }
}
