//! Spatial and attribute filters with tri-state node classification.
//!
//! A [`Filter`] classifies a whole node in one call, which is what the query
//! traversal prunes on, and tests single points at uncertain nodes.
//! [`FilteredNode`] is a read-only view of a node restricted to the points a
//! filter accepts; the selection is computed on first access.

use std::sync::{Arc, OnceLock};

use glam::{DVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;
use crate::color::C4b;
use crate::error::Result;
use crate::geometry::{Box3d, Hull3d, Sphere3d};
use crate::node::PointSetNode;
use crate::storage::Storage;

/// Relation of a node to a filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
  /// Every point of the node passes.
  FullyInside,
  /// No point of the node passes.
  FullyOutside,
  /// Points have to be tested individually.
  Partial,
}

/// Point predicate. JSON form carries the variant in a `Type` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum Filter {
  InsideBox3d(Box3d),
  OutsideBox3d(Box3d),
  InsideConvexHull(Hull3d),
  /// Complement of [`Filter::InsideConvexHull`]; points on the hull
  /// boundary are inside, so they fail here.
  OutsideConvexHull(Hull3d),
  /// Intensity within `[min, max]`. Points without intensities fail.
  Intensity {
    #[serde(rename = "Min")]
    min: i32,
    #[serde(rename = "Max")]
    max: i32,
  },
  InsideSphere3d(Sphere3d),
  OutsideSphere3d(Sphere3d),
}

impl Filter {
  /// Classify an axis-aligned box. Attribute filters cannot decide on
  /// geometry alone and answer `Partial`.
  pub fn classify_box(&self, b: &Box3d) -> Classification {
    use Classification::*;
    if b.is_invalid() {
      return FullyOutside;
    }
    let (inside, outside) = match self {
      Filter::InsideBox3d(q) => (q.contains_box(b), !q.intersects(b)),
      Filter::OutsideBox3d(q) => (!q.intersects(b), q.contains_box(b)),
      Filter::InsideConvexHull(h) => (h.contains_box(b), !h.intersects_box(b)),
      Filter::OutsideConvexHull(h) => (!h.intersects_box(b), h.contains_box(b)),
      Filter::InsideSphere3d(s) => (s.contains_box(b), !s.intersects_box(b)),
      Filter::OutsideSphere3d(s) => (!s.intersects_box(b), s.contains_box(b)),
      Filter::Intensity { .. } => (false, false),
    };
    match (inside, outside) {
      (true, _) => FullyInside,
      (false, true) => FullyOutside,
      (false, false) => Partial,
    }
  }

  /// Classify a node by its global bounding box, or by its values for
  /// attribute filters on leaves.
  pub fn classify(&self, node: &PointSetNode) -> Result<Classification> {
    let Filter::Intensity { min, max } = *self else {
      return Ok(self.classify_box(&node.bounding_box()));
    };
    if !node.is_leaf() {
      return Ok(Classification::Partial);
    }
    let Some(values) = node.intensities()? else {
      return Ok(Classification::FullyOutside);
    };
    let passing = values.iter().filter(|&&j| j >= min && j <= max).count();
    Ok(if passing == 0 {
      Classification::FullyOutside
    } else if passing == values.len() {
      Classification::FullyInside
    } else {
      Classification::Partial
    })
  }

  /// Point predicate of spatial filters; attribute filters accept every
  /// position.
  pub fn test_point(&self, p: DVec3) -> bool {
    match self {
      Filter::InsideBox3d(q) => q.contains_point(p),
      Filter::OutsideBox3d(q) => !q.contains_point(p),
      Filter::InsideConvexHull(h) => h.contains(p),
      Filter::OutsideConvexHull(h) => !h.contains(p),
      Filter::InsideSphere3d(s) => s.contains(p),
      Filter::OutsideSphere3d(s) => !s.contains(p),
      Filter::Intensity { .. } => true,
    }
  }

  /// Indices of the node's own points that pass.
  pub fn select(&self, node: &PointSetNode) -> Result<Vec<usize>> {
    if let Filter::Intensity { min, max } = *self {
      return Ok(match node.intensities()? {
        Some(values) => values
          .iter()
          .enumerate()
          .filter(|(_, &j)| j >= min && j <= max)
          .map(|(i, _)| i)
          .collect(),
        None => Vec::new(),
      });
    }
    Ok(
      node
        .positions_absolute()?
        .iter()
        .enumerate()
        .filter(|(_, &p)| self.test_point(p))
        .map(|(i, _)| i)
        .collect(),
    )
  }
}

/// A node seen through a filter. Only the node's own points are covered.
#[derive(Debug)]
pub struct FilteredNode {
  node: Arc<PointSetNode>,
  filter: Filter,
  classification: Classification,
  selection: OnceLock<Arc<Vec<usize>>>,
}

impl FilteredNode {
  /// View of `node` under `filter`; `None` when the node is fully outside.
  pub fn create(node: Arc<PointSetNode>, filter: Filter) -> Result<Option<Self>> {
    let classification = filter.classify(&node)?;
    if classification == Classification::FullyOutside {
      return Ok(None);
    }
    Ok(Some(Self {
      node,
      filter,
      classification,
      selection: OnceLock::new(),
    }))
  }

  pub fn node(&self) -> &Arc<PointSetNode> {
    &self.node
  }

  pub fn filter(&self) -> &Filter {
    &self.filter
  }

  pub fn classification(&self) -> Classification {
    self.classification
  }

  /// Selected point indices, computed once.
  pub fn selected(&self) -> Result<Arc<Vec<usize>>> {
    if let Some(s) = self.selection.get() {
      return Ok(Arc::clone(s));
    }
    let indices = match self.classification {
      Classification::FullyInside => (0..self.node.point_count_cell as usize).collect(),
      _ => self.filter.select(&self.node)?,
    };
    Ok(Arc::clone(self.selection.get_or_init(|| Arc::new(indices))))
  }

  pub fn point_count(&self) -> Result<usize> {
    Ok(self.selected()?.len())
  }

  pub fn local_positions(&self) -> Result<Option<Vec<Vec3>>> {
    self.pick(self.node.local_positions()?)
  }

  pub fn positions_absolute(&self) -> Result<Vec<DVec3>> {
    let c = self.node.center();
    Ok(
      self
        .local_positions()?
        .unwrap_or_default()
        .into_iter()
        .map(|p| c + p.as_dvec3())
        .collect(),
    )
  }

  pub fn colors(&self) -> Result<Option<Vec<C4b>>> {
    self.pick(self.node.colors()?)
  }

  pub fn normals(&self) -> Result<Option<Vec<Vec3>>> {
    self.pick(self.node.normals()?)
  }

  pub fn intensities(&self) -> Result<Option<Vec<i32>>> {
    self.pick(self.node.intensities()?)
  }

  pub fn classifications(&self) -> Result<Option<Vec<u8>>> {
    self.pick(self.node.classifications()?)
  }

  /// Filtered views of the present children that are not fully outside.
  pub fn children(&self, storage: &Storage) -> Result<Vec<FilteredNode>> {
    let mut out = Vec::new();
    for (_, id) in self.node.children() {
      let child = storage.require_node(id)?;
      if let Some(view) = FilteredNode::create(child, self.filter.clone())? {
        out.push(view);
      }
    }
    Ok(out)
  }

  /// The selected points with every attribute the node carries.
  pub fn to_chunk(&self) -> Result<Chunk> {
    let mut chunk = Chunk::new(self.positions_absolute()?);
    if let Some(cs) = self.colors()? {
      chunk = chunk.with_colors(cs)?;
    }
    if let Some(ns) = self.normals()? {
      chunk = chunk.with_normals(ns)?;
    }
    if let Some(js) = self.intensities()? {
      chunk = chunk.with_intensities(js)?;
    }
    if let Some(ks) = self.classifications()? {
      chunk = chunk.with_classifications(ks)?;
    }
    Ok(chunk)
  }

  fn pick<T: Copy>(&self, values: Option<Arc<Vec<T>>>) -> Result<Option<Vec<T>>> {
    let Some(values) = values else {
      return Ok(None);
    };
    let selected = self.selected()?;
    Ok(Some(selected.iter().filter_map(|&i| values.get(i).copied()).collect()))
  }
}

#[cfg(test)]
#[path = "filter_test.rs"]
mod filter_test;
