//! Pruned traversal: point queries and counts under a [`Filter`].
//!
//! Subtrees classified fully outside are skipped, fully inside ones are
//! emitted without further tests, and partial leaves are filtered point by
//! point. With a minimum cell exponent, nodes at or below it that carry
//! points are taken as a unit.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::chunk::Chunk;
use crate::error::Result;
use crate::filter::{Classification, Filter, FilteredNode};
use crate::node::PointSetNode;
use crate::storage::Storage;

/// Lazy iterator over the matching points, one chunk per emitting node.
pub struct QueryPoints<'a> {
  storage: &'a Storage,
  filter: Filter,
  min_cell_exponent: Option<i32>,
  stack: Vec<(Arc<PointSetNode>, bool)>,
}

/// Points below `root` that pass `filter`.
pub fn query_points(
  storage: &Storage,
  root: Arc<PointSetNode>,
  filter: Filter,
  min_cell_exponent: Option<i32>,
) -> QueryPoints<'_> {
  QueryPoints {
    storage,
    filter,
    min_cell_exponent,
    stack: vec![(root, false)],
  }
}

impl<'a> QueryPoints<'a> {
  /// Query over no tree at all.
  pub(crate) fn empty(storage: &'a Storage, filter: Filter) -> Self {
    Self {
      storage,
      filter,
      min_cell_exponent: None,
      stack: Vec::new(),
    }
  }
}

fn is_unit(node: &PointSetNode, min_cell_exponent: Option<i32>) -> bool {
  node.has_positions() && min_cell_exponent.is_some_and(|e| node.cell.e <= e)
}

fn children(storage: &Storage, node: &PointSetNode) -> Result<SmallVec<[Arc<PointSetNode>; 8]>> {
  node
    .children()
    .map(|(_, id)| storage.require_node(id))
    .collect()
}

impl QueryPoints<'_> {
  fn visit(&mut self, node: Arc<PointSetNode>, inside: bool) -> Result<Option<Chunk>> {
    let class = if inside {
      Classification::FullyInside
    } else {
      self.filter.classify(&node)?
    };
    if class == Classification::FullyOutside {
      return Ok(None);
    }

    let unit = is_unit(&node, self.min_cell_exponent);
    if node.is_leaf() || unit {
      if class == Classification::FullyInside || unit {
        return node.to_chunk().map(Some);
      }
      return match FilteredNode::create(node, self.filter.clone())? {
        Some(view) => view.to_chunk().map(Some),
        None => Ok(None),
      };
    }

    let inside = class == Classification::FullyInside;
    // reversed so that octant 0 comes out first
    for child in children(self.storage, &node)?.into_iter().rev() {
      self.stack.push((child, inside));
    }
    Ok(None)
  }
}

impl Iterator for QueryPoints<'_> {
  type Item = Result<Chunk>;

  fn next(&mut self) -> Option<Self::Item> {
    while let Some((node, inside)) = self.stack.pop() {
      match self.visit(node, inside) {
        Ok(Some(chunk)) if !chunk.is_empty() => return Some(Ok(chunk)),
        Ok(_) => {}
        Err(e) => {
          self.stack.clear();
          return Some(Err(e));
        }
      }
    }
    None
  }
}

/// Number of points [`query_points`] would return.
pub fn count_points(
  storage: &Storage,
  root: &PointSetNode,
  filter: &Filter,
  min_cell_exponent: Option<i32>,
) -> Result<u64> {
  let class = filter.classify(root)?;
  count_exact(storage, root, filter, min_cell_exponent, class)
}

fn count_exact(
  storage: &Storage,
  node: &PointSetNode,
  filter: &Filter,
  min_cell_exponent: Option<i32>,
  class: Classification,
) -> Result<u64> {
  match class {
    Classification::FullyOutside => return Ok(0),
    Classification::FullyInside if min_cell_exponent.is_none() => {
      return Ok(node.point_count_tree)
    }
    _ => {}
  }

  let unit = is_unit(node, min_cell_exponent);
  if node.is_leaf() || unit {
    if class == Classification::FullyInside || unit {
      return Ok(node.point_count_cell as u64);
    }
    return Ok(filter.select(node)?.len() as u64);
  }

  let mut sum = 0;
  for child in children(storage, node)? {
    let child_class = match class {
      Classification::FullyInside => Classification::FullyInside,
      _ => filter.classify(&child)?,
    };
    sum += count_exact(storage, &child, filter, min_cell_exponent, child_class)?;
  }
  Ok(sum)
}

/// Upper bound of [`count_points`] from node classification alone; no point
/// is tested.
pub fn count_points_approximately(
  storage: &Storage,
  root: &PointSetNode,
  filter: &Filter,
  min_cell_exponent: Option<i32>,
) -> Result<u64> {
  match filter.classify(root)? {
    Classification::FullyOutside => Ok(0),
    Classification::FullyInside => Ok(root.point_count_tree),
    Classification::Partial if root.is_leaf() => Ok(root.point_count_cell as u64),
    Classification::Partial if is_unit(root, min_cell_exponent) => Ok(root.point_count_tree),
    Classification::Partial => {
      let mut sum = 0;
      for child in children(storage, root)? {
        sum += count_points_approximately(storage, &child, filter, min_cell_exponent)?;
      }
      Ok(sum)
    }
  }
}

#[cfg(test)]
#[path = "query_test.rs"]
mod query_test;
