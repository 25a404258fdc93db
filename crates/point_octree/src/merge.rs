//! Two-tree merge.
//!
//! Both roots are placed under their common ancestor cell. Going down from
//! there, every cell collects the pieces that fall into it: whole subtrees
//! and loose points. A subtree that exactly fills an octant on its own is
//! reused by id. A subtree sitting at the current cell (or a centered one) is
//! opened up into its children, leaves into their points. Cells whose pieces
//! are only points and leaves are rebuilt with the builder, which keeps a
//! single leaf when the combined count fits the split limit and re-splits
//! otherwise.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;
use web_time::Instant;

use crate::builder::build_tree;
use crate::cell::Cell;
use crate::chunk::Chunk;
use crate::error::{OctreeError, Result};
use crate::geometry::Box3d;
use crate::node::PointSetNode;
use crate::storage::Storage;
use crate::threading::CancellationToken;

enum Piece {
  Node(Arc<PointSetNode>),
  Points(Chunk),
}

impl Piece {
  fn point_count(&self) -> u64 {
    match self {
      Piece::Node(n) => n.point_count_tree,
      Piece::Points(c) => c.len() as u64,
    }
  }
}

/// Merge two persisted trees of the same store into a new root. Both inputs
/// stay valid; untouched subtrees are shared.
#[tracing::instrument(skip_all, name = "merge::merge_trees")]
pub fn merge_trees(
  storage: &Storage,
  a: &Arc<PointSetNode>,
  b: &Arc<PointSetNode>,
  split_limit: usize,
  token: &CancellationToken,
) -> Result<Arc<PointSetNode>> {
  if split_limit == 0 {
    return Err(OctreeError::config("split limit must be positive"));
  }
  let start = Instant::now();
  let cell = Cell::common_ancestor(&a.cell, &b.cell);
  let merger = Merger {
    storage,
    split_limit,
    token,
  };

  let root = merger
    .assemble(cell, vec![Piece::Node(Arc::clone(a)), Piece::Node(Arc::clone(b))])?
    .ok_or_else(|| OctreeError::invariant("merge of two trees produced no points"))?;
  debug!(
    a = %a.id,
    b = %b.id,
    root = %root.id,
    points = root.point_count_tree,
    elapsed_ms = start.elapsed().as_millis() as u64,
    "merged trees"
  );
  Ok(root)
}

struct Merger<'a> {
  storage: &'a Storage,
  split_limit: usize,
  token: &'a CancellationToken,
}

impl Merger<'_> {
  /// Node for `cell` holding every piece, `None` when there are no points.
  fn assemble(&self, cell: Cell, pieces: Vec<Piece>) -> Result<Option<Arc<PointSetNode>>> {
    self.token.check()?;
    let pieces = self.open_up(cell, pieces)?;
    let total: u64 = pieces.iter().map(Piece::point_count).sum();
    if total == 0 {
      return Ok(None);
    }

    let only_leaves = pieces.iter().all(|p| match p {
      Piece::Node(n) => n.is_leaf(),
      Piece::Points(_) => true,
    });
    if only_leaves {
      let mut chunks = Vec::with_capacity(pieces.len());
      for piece in &pieces {
        match piece {
          Piece::Node(n) => chunks.push(n.to_chunk()?),
          Piece::Points(c) => chunks.push(c.clone()),
        }
      }
      let chunk = Chunk::union_all(&chunks);
      return build_tree(self.storage, &chunk, cell, self.split_limit).map(Some);
    }

    let mut buckets: [Vec<Piece>; 8] = Default::default();
    for piece in pieces {
      match piece {
        Piece::Node(n) => {
          let octant = cell.octant_index_of(n.cell.center());
          buckets[octant as usize].push(Piece::Node(n));
        }
        Piece::Points(c) => {
          let mut indices: [Vec<usize>; 8] = Default::default();
          for (i, &p) in c.positions().iter().enumerate() {
            indices[cell.octant_index_of(p) as usize].push(i);
          }
          for (octant, idx) in indices.iter().enumerate() {
            if !idx.is_empty() {
              buckets[octant].push(Piece::Points(c.subset(idx)));
            }
          }
        }
      }
    }

    let work: Vec<(u8, Vec<Piece>)> = buckets
      .into_iter()
      .enumerate()
      .filter(|(_, b)| !b.is_empty())
      .map(|(o, b)| (o as u8, b))
      .collect();
    let children: Vec<(u8, Option<Arc<PointSetNode>>)> = work
      .into_par_iter()
      .map(|(octant, bucket)| {
        let child_cell = cell.octant(octant);
        if let [Piece::Node(n)] = bucket.as_slice() {
          if n.cell == child_cell {
            return Ok((octant, Some(Arc::clone(n))));
          }
        }
        Ok((octant, self.assemble(child_cell, bucket)?))
      })
      .collect::<Result<_>>()?;

    let mut subnodes = [None; 8];
    let mut count = 0;
    let mut bbox = Box3d::INVALID;
    for (octant, child) in children.iter().filter_map(|(o, c)| c.as_ref().map(|c| (*o, c))) {
      subnodes[octant as usize] = Some(child.id);
      count += child.point_count_tree;
      bbox = bbox.union(&child.bounding_box());
    }
    self
      .storage
      .put_node(
        PointSetNode::new(cell)
          .with_subnodes(subnodes)
          .with_point_count_tree(count)
          .with_bounding_boxes(None, Some(bbox)),
      )
      .map(Some)
  }

  /// Replace subtrees that cannot go into a single octant of `cell` by their
  /// content.
  fn open_up(&self, cell: Cell, pieces: Vec<Piece>) -> Result<Vec<Piece>> {
    let mut out = Vec::with_capacity(pieces.len());
    let mut todo = pieces;
    while let Some(piece) = todo.pop() {
      match piece {
        Piece::Node(n) if n.cell == cell || n.cell.is_centered() => {
          if n.is_leaf() {
            out.push(Piece::Points(n.to_chunk()?));
          } else {
            for (_, id) in n.children() {
              todo.push(Piece::Node(self.storage.require_node(id)?));
            }
          }
        }
        Piece::Node(n) if !cell.is_ancestor_of(&n.cell) => {
          return Err(OctreeError::invariant(format!(
            "node {} at {:?} does not fit into {cell:?}",
            n.id, n.cell
          )));
        }
        other => out.push(other),
      }
    }
    Ok(out)
  }
}

#[cfg(test)]
#[path = "merge_test.rs"]
mod merge_test;
