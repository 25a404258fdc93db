//! PointSetNode - persisted octree node.
//!
//! One record type serves leaves and inner nodes: a node is a leaf iff all
//! eight subnode slots are empty. Attribute arrays are either inline or stored
//! as separate blobs behind a [`PersistentRef`]. Nodes are immutable once
//! stored; the `with_*` methods return modified copies that are persisted
//! under the same or a new id.

pub mod codec;

use std::sync::Arc;

use glam::{DVec3, Vec3};

use crate::cell::Cell;
use crate::chunk::Chunk;
use crate::color::C4b;
use crate::error::{OctreeError, Result};
use crate::geometry::{Box3d, Box3f};
use crate::ids::NodeId;
use crate::knn::KdTreeData;
use crate::storage::{PersistentRef, Storable, Storage};

/// Attribute array held inline or referenced by storage key.
#[derive(Clone, Debug)]
pub enum AttributeRef<T> {
  Inline(Arc<T>),
  Stored(PersistentRef<T>),
}

impl<T> AttributeRef<T> {
  pub fn inline(value: T) -> Self {
    Self::Inline(Arc::new(value))
  }

  pub fn value(&self) -> Result<Arc<T>> {
    match self {
      Self::Inline(v) => Ok(Arc::clone(v)),
      Self::Stored(r) => r.value(),
    }
  }

  /// Storage key of a referenced array.
  pub fn stored_id(&self) -> Option<&str> {
    match self {
      Self::Inline(_) => None,
      Self::Stored(r) => Some(r.id()),
    }
  }
}

impl<T: Storable> AttributeRef<T> {
  /// Write `value` as a new blob and reference it.
  pub fn store(storage: &Storage, value: T) -> Result<Self> {
    Ok(Self::Stored(storage.store_new(value)?))
  }
}

pub type PositionsRef = AttributeRef<Vec<Vec3>>;
pub type ColorsRef = AttributeRef<Vec<C4b>>;
pub type NormalsRef = AttributeRef<Vec<Vec3>>;
pub type IntensitiesRef = AttributeRef<Vec<i32>>;
pub type ClassificationsRef = AttributeRef<Vec<u8>>;
pub type KdTreeRef = AttributeRef<KdTreeData>;

/// Statistics written by the LOD pass.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LodStats {
  pub min_tree_depth: i32,
  pub max_tree_depth: i32,
  /// Centroid of the local positions.
  pub centroid: Vec3,
  pub dist_to_centroid_average: f32,
  pub dist_to_centroid_std_dev: f32,
  /// Distance from each point to its nearest other point.
  pub average_point_distance: f32,
  pub average_point_distance_std_dev: f32,
}

#[derive(Clone, Debug)]
pub struct PointSetNode {
  pub id: NodeId,
  pub cell: Cell,
  /// Points stored directly in this node.
  pub point_count_cell: u32,
  /// Points of all leaves below (or of this leaf).
  pub point_count_tree: u64,
  pub bounding_box_local: Option<Box3f>,
  pub bounding_box_global: Option<Box3d>,
  pub positions: Option<PositionsRef>,
  pub colors: Option<ColorsRef>,
  pub normals: Option<NormalsRef>,
  pub intensities: Option<IntensitiesRef>,
  pub classifications: Option<ClassificationsRef>,
  pub kd_tree: Option<KdTreeRef>,
  pub subnodes: [Option<NodeId>; 8],
  pub lod: Option<LodStats>,
}

impl PointSetNode {
  /// Empty leaf for `cell` under a fresh id.
  pub fn new(cell: Cell) -> Self {
    Self::with_id_and_cell(NodeId::new(), cell)
  }

  pub fn with_id_and_cell(id: NodeId, cell: Cell) -> Self {
    Self {
      id,
      cell,
      point_count_cell: 0,
      point_count_tree: 0,
      bounding_box_local: None,
      bounding_box_global: None,
      positions: None,
      colors: None,
      normals: None,
      intensities: None,
      classifications: None,
      kd_tree: None,
      subnodes: [None; 8],
      lod: None,
    }
  }

  #[inline]
  pub fn is_leaf(&self) -> bool {
    self.subnodes.iter().all(Option::is_none)
  }

  #[inline]
  pub fn center(&self) -> DVec3 {
    self.cell.center()
  }

  pub fn has_positions(&self) -> bool {
    self.positions.is_some()
  }

  pub fn has_colors(&self) -> bool {
    self.colors.is_some()
  }

  pub fn has_normals(&self) -> bool {
    self.normals.is_some()
  }

  pub fn has_intensities(&self) -> bool {
    self.intensities.is_some()
  }

  pub fn has_classifications(&self) -> bool {
    self.classifications.is_some()
  }

  pub fn has_kd_tree(&self) -> bool {
    self.kd_tree.is_some()
  }

  /// Present children as (octant, id).
  pub fn children(&self) -> impl Iterator<Item = (u8, NodeId)> + '_ {
    self
      .subnodes
      .iter()
      .enumerate()
      .filter_map(|(i, s)| s.map(|id| (i as u8, id)))
  }

  /// Global box, falling back to the cell box for nodes without one.
  pub fn bounding_box(&self) -> Box3d {
    self
      .bounding_box_global
      .unwrap_or_else(|| self.cell.bounding_box())
  }

  pub fn local_positions(&self) -> Result<Option<Arc<Vec<Vec3>>>> {
    self.positions.as_ref().map(AttributeRef::value).transpose()
  }

  /// Positions in global coordinates; empty when the node has none.
  pub fn positions_absolute(&self) -> Result<Vec<DVec3>> {
    let c = self.center();
    Ok(match self.local_positions()? {
      Some(ps) => ps.iter().map(|p| c + p.as_dvec3()).collect(),
      None => Vec::new(),
    })
  }

  pub fn colors(&self) -> Result<Option<Arc<Vec<C4b>>>> {
    self.colors.as_ref().map(AttributeRef::value).transpose()
  }

  pub fn normals(&self) -> Result<Option<Arc<Vec<Vec3>>>> {
    self.normals.as_ref().map(AttributeRef::value).transpose()
  }

  pub fn intensities(&self) -> Result<Option<Arc<Vec<i32>>>> {
    self.intensities.as_ref().map(AttributeRef::value).transpose()
  }

  pub fn classifications(&self) -> Result<Option<Arc<Vec<u8>>>> {
    self.classifications.as_ref().map(AttributeRef::value).transpose()
  }

  pub fn kd_tree(&self) -> Result<Option<Arc<KdTreeData>>> {
    self.kd_tree.as_ref().map(AttributeRef::value).transpose()
  }

  /// This node's own points with all attributes, in global coordinates.
  pub fn to_chunk(&self) -> Result<Chunk> {
    let mut chunk = Chunk::new(self.positions_absolute()?);
    if let Some(cs) = self.colors()? {
      chunk = chunk.with_colors(cs.to_vec())?;
    }
    if let Some(ns) = self.normals()? {
      chunk = chunk.with_normals(ns.to_vec())?;
    }
    if let Some(js) = self.intensities()? {
      chunk = chunk.with_intensities(js.to_vec())?;
    }
    if let Some(ks) = self.classifications()? {
      chunk = chunk.with_classifications(ks.to_vec())?;
    }
    Ok(chunk)
  }

  /// Check the structural invariants against the direct children.
  pub fn validate_children(&self, storage: &Storage) -> Result<()> {
    let mut sum = 0u64;
    for (octant, id) in self.children() {
      let child = storage.require_node(id)?;
      if child.cell != self.cell.octant(octant) {
        return Err(OctreeError::invariant(format!(
          "child {} of {} has cell {:?}, expected {:?}",
          child.id,
          self.id,
          child.cell,
          self.cell.octant(octant)
        )));
      }
      sum += child.point_count_tree;
    }
    if !self.is_leaf() && sum != self.point_count_tree {
      return Err(OctreeError::invariant(format!(
        "node {} counts {} points but children hold {sum}",
        self.id, self.point_count_tree
      )));
    }
    Ok(())
  }

  // ---- WithUpsert ----

  /// Copy detached under a fresh id.
  pub fn with_new_id(mut self) -> Self {
    self.id = NodeId::new();
    self
  }

  pub fn with_id(mut self, id: NodeId) -> Self {
    self.id = id;
    self
  }

  /// Replace positions and the point count of this cell.
  pub fn with_positions(mut self, positions: PositionsRef, count: usize) -> Self {
    self.positions = Some(positions);
    self.point_count_cell = count as u32;
    self
  }

  pub fn with_colors(mut self, colors: Option<ColorsRef>) -> Self {
    self.colors = colors;
    self
  }

  pub fn with_normals(mut self, normals: Option<NormalsRef>) -> Self {
    self.normals = normals;
    self
  }

  pub fn with_intensities(mut self, intensities: Option<IntensitiesRef>) -> Self {
    self.intensities = intensities;
    self
  }

  pub fn with_classifications(mut self, classifications: Option<ClassificationsRef>) -> Self {
    self.classifications = classifications;
    self
  }

  pub fn with_kd_tree(mut self, kd_tree: Option<KdTreeRef>) -> Self {
    self.kd_tree = kd_tree;
    self
  }

  pub fn with_subnodes(mut self, subnodes: [Option<NodeId>; 8]) -> Self {
    self.subnodes = subnodes;
    self
  }

  pub fn with_point_count_tree(mut self, count: u64) -> Self {
    self.point_count_tree = count;
    self
  }

  pub fn with_bounding_boxes(mut self, local: Option<Box3f>, global: Option<Box3d>) -> Self {
    self.bounding_box_local = local;
    self.bounding_box_global = global;
    self
  }

  pub fn with_lod_stats(mut self, lod: LodStats) -> Self {
    self.lod = Some(lod);
    self
  }
}
