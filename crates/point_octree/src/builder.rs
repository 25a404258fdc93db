//! In-memory octree builder.
//!
//! Points are binned into an ephemeral tree of index lists rooted at a given
//! cell. A leaf whose list grows beyond the split limit is split: its indices
//! are redistributed into lazily created octant children. Exact duplicates of
//! a leaf's first point are dropped. The finished tree is then materialized
//! bottom-up into persisted [`PointSetNode`]s.

use std::sync::Arc;

use glam::{DVec3, Vec3};
use rayon::prelude::*;
use tracing::debug;
use web_time::Instant;

use crate::cell::Cell;
use crate::chunk::Chunk;
use crate::error::{OctreeError, Result};
use crate::geometry::{Box3d, Box3f};
use crate::node::{AttributeRef, PointSetNode};
use crate::storage::Storage;

/// Ephemeral node of the build tree.
struct BuildNode {
  cell: Cell,
  center: DVec3,
  /// Point indices; empty once split.
  indices: Vec<u32>,
  /// Arena slots of the octant children, present after a split.
  children: Option<[Option<usize>; 8]>,
}

impl BuildNode {
  fn new(cell: Cell) -> Self {
    Self {
      cell,
      center: cell.center(),
      indices: Vec::new(),
      children: None,
    }
  }
}

/// Build tree over one chunk of points.
pub struct InMemoryPointSet<'a> {
  chunk: &'a Chunk,
  split_limit: usize,
  nodes: Vec<BuildNode>,
  point_count: usize,
}

impl<'a> InMemoryPointSet<'a> {
  /// Bin every point of `chunk` into a tree rooted at `root_cell`.
  ///
  /// Fails with a configuration error when there are no positions, the
  /// split limit is zero, or a point lies outside the root cell.
  pub fn build(chunk: &'a Chunk, root_cell: Cell, split_limit: usize) -> Result<Self> {
    if chunk.is_empty() {
      return Err(OctreeError::config("cannot build an octree without positions"));
    }
    if split_limit == 0 {
      return Err(OctreeError::config("split limit must be positive"));
    }
    if chunk.len() > u32::MAX as usize {
      return Err(OctreeError::config(format!(
        "{} points exceed a single build",
        chunk.len()
      )));
    }
    if !root_cell.bounding_box().contains_box(&chunk.bounding_box()) {
      return Err(OctreeError::config(format!(
        "root cell {root_cell:?} does not cover points in {:?}",
        chunk.bounding_box()
      )));
    }

    let mut set = Self {
      chunk,
      split_limit,
      nodes: vec![BuildNode::new(root_cell)],
      point_count: 0,
    };
    for i in 0..chunk.len() as u32 {
      set.insert(0, i);
    }
    Ok(set)
  }

  /// Points retained after duplicate suppression.
  pub fn point_count(&self) -> usize {
    self.point_count
  }

  pub fn root_cell(&self) -> Cell {
    self.nodes[0].cell
  }

  fn child_of(&mut self, node: usize, octant: u8) -> usize {
    if let Some(Some(child)) = self.nodes[node].children.map(|c| c[octant as usize]) {
      return child;
    }
    let cell = self.nodes[node].cell.octant(octant);
    let child = self.nodes.len();
    self.nodes.push(BuildNode::new(cell));
    if let Some(children) = self.nodes[node].children.as_mut() {
      children[octant as usize] = Some(child);
    }
    child
  }

  fn insert(&mut self, start: usize, index: u32) {
    let chunk = self.chunk;
    let ps = chunk.positions();
    let p = ps[index as usize];
    let mut node = start;
    while self.nodes[node].children.is_some() {
      let octant = self.nodes[node].cell.octant_index_of(p);
      node = self.child_of(node, octant);
    }

    let leaf = &mut self.nodes[node];
    if let Some(&first) = leaf.indices.first() {
      if ps[first as usize] == p {
        return;
      }
    }
    leaf.indices.push(index);
    self.point_count += 1;

    if leaf.indices.len() > self.split_limit {
      self.split(node);
    }
  }

  fn split(&mut self, node: usize) {
    let indices = std::mem::take(&mut self.nodes[node].indices);
    self.nodes[node].children = Some([None; 8]);
    // reinserted points are counted again
    self.point_count -= indices.len();
    for i in indices {
      self.insert(node, i);
    }
  }

  /// Persist the tree bottom-up and return the root node.
  #[tracing::instrument(skip_all, name = "builder::to_point_set_node")]
  pub fn to_point_set_node(&self, storage: &Storage) -> Result<Arc<PointSetNode>> {
    let start = Instant::now();
    let root = self.materialize(storage, 0)?;
    debug!(
      nodes = self.nodes.len(),
      points = root.point_count_tree,
      elapsed_ms = start.elapsed().as_millis() as u64,
      "materialized octree"
    );
    Ok(root)
  }

  fn materialize(&self, storage: &Storage, index: usize) -> Result<Arc<PointSetNode>> {
    let node = &self.nodes[index];
    match node.children {
      None => self.materialize_leaf(storage, node),
      Some(children) => {
        let built: Vec<(usize, Arc<PointSetNode>)> = children
          .par_iter()
          .enumerate()
          .filter_map(|(octant, c)| c.map(|c| (octant, c)))
          .map(|(octant, c)| Ok((octant, self.materialize(storage, c)?)))
          .collect::<Result<_>>()?;

        let mut subnodes = [None; 8];
        let mut count = 0u64;
        let mut bbox = Box3d::INVALID;
        for (octant, child) in &built {
          if child.cell.e != node.cell.e - 1 {
            return Err(OctreeError::invariant(format!(
              "child cell {:?} is not one level below {:?}",
              child.cell, node.cell
            )));
          }
          subnodes[*octant] = Some(child.id);
          count += child.point_count_tree;
          bbox = bbox.union(&child.bounding_box());
        }

        storage.put_node(
          PointSetNode::new(node.cell)
            .with_subnodes(subnodes)
            .with_point_count_tree(count)
            .with_bounding_boxes(None, Some(bbox)),
        )
      }
    }
  }

  fn materialize_leaf(&self, storage: &Storage, node: &BuildNode) -> Result<Arc<PointSetNode>> {
    let indices: Vec<usize> = node.indices.iter().map(|&i| i as usize).collect();
    let points = self.chunk.subset(&indices);
    let local: Vec<Vec3> = points
      .positions()
      .iter()
      .map(|p| (*p - node.center).as_vec3())
      .collect();
    let count = local.len();
    let bbox_local = Box3f::from_points(local.iter());
    let bbox_global = bbox_local.to_global(node.center);

    let colors = points
      .colors()
      .map(|c| AttributeRef::store(storage, c.to_vec()))
      .transpose()?;
    let normals = points
      .normals()
      .map(|n| AttributeRef::store(storage, n.to_vec()))
      .transpose()?;
    let intensities = points
      .intensities()
      .map(|j| AttributeRef::store(storage, j.to_vec()))
      .transpose()?;
    let classifications = points
      .classifications()
      .map(|k| AttributeRef::store(storage, k.to_vec()))
      .transpose()?;

    storage.put_node(
      PointSetNode::new(node.cell)
        .with_positions(AttributeRef::store(storage, local)?, count)
        .with_colors(colors)
        .with_normals(normals)
        .with_intensities(intensities)
        .with_classifications(classifications)
        .with_point_count_tree(count as u64)
        .with_bounding_boxes(Some(bbox_local), Some(bbox_global)),
    )
  }
}

/// Build and persist a tree for `chunk` rooted at `root_cell`.
pub fn build_tree(
  storage: &Storage,
  chunk: &Chunk,
  root_cell: Cell,
  split_limit: usize,
) -> Result<Arc<PointSetNode>> {
  InMemoryPointSet::build(chunk, root_cell, split_limit)?.to_point_set_node(storage)
}

#[cfg(test)]
#[path = "builder_test.rs"]
mod builder_test;
