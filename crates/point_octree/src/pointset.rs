//! PointSet - named handle to an octree root.
//!
//! The record is plain data (`id`, split limit, optional root id) persisted
//! as JSON under its own id. Operations take the [`Storage`] the tree lives
//! in.
//!
//! # Usage
//!
//! ```ignore
//! let storage = Storage::open_directory("store", DEFAULT_CACHE_BYTES)?;
//! let set = PointSet::create(&storage, "scan", &chunk, 8192, true, &token)?;
//! let n = set.count_points_inside_convex_hull(&storage, &hull, None)?;
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::builder::build_tree;
use crate::cell::Cell;
use crate::chunk::Chunk;
use crate::error::{OctreeError, Result};
use crate::filter::Filter;
use crate::geometry::{Box3d, Hull3d, Sphere3d};
use crate::ids::NodeId;
use crate::lod::{self, LodConfig};
use crate::merge::merge_trees;
use crate::node::PointSetNode;
use crate::query::{self, QueryPoints};
use crate::storage::Storage;
use crate::threading::CancellationToken;

/// Split limit assumed for records that do not carry one.
pub const DEFAULT_SPLIT_LIMIT: usize = 8192;

/// Value of the root type field written with every record.
pub const ROOT_TYPE: &str = "PointSetNode";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PointSet {
  pub id: String,
  pub split_limit: usize,
  pub root_id: Option<NodeId>,
}

/// JSON layout. `OctreeId` supersedes `RootCellId`; both are written.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PointSetRecord {
  id: String,
  #[serde(default)]
  root_cell_id: Option<String>,
  #[serde(default)]
  octree_id: Option<String>,
  #[serde(default = "default_split_limit")]
  split_limit: usize,
  #[serde(default = "default_root_type")]
  octree_root_type: String,
}

fn default_split_limit() -> usize {
  DEFAULT_SPLIT_LIMIT
}

fn default_root_type() -> String {
  ROOT_TYPE.to_string()
}

impl PointSet {
  pub fn new(id: impl Into<String>, split_limit: usize, root_id: Option<NodeId>) -> Self {
    Self {
      id: id.into(),
      split_limit,
      root_id,
    }
  }

  /// Point set without a tree.
  pub fn empty(id: impl Into<String>, split_limit: usize) -> Self {
    Self::new(id, split_limit, None)
  }

  pub fn is_empty(&self) -> bool {
    self.root_id.is_none()
  }

  pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
    let root = self.root_id.map(|id| id.key());
    let record = PointSetRecord {
      id: self.id.clone(),
      root_cell_id: root.clone(),
      octree_id: root,
      split_limit: self.split_limit,
      octree_root_type: ROOT_TYPE.to_string(),
    };
    Ok(serde_json::to_vec(&record)?)
  }

  pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
    let record: PointSetRecord = serde_json::from_slice(bytes)?;
    if record.octree_root_type != ROOT_TYPE {
      return Err(OctreeError::decode(
        &record.id,
        format!("unsupported root type {}", record.octree_root_type),
      ));
    }
    let root_id = record
      .octree_id
      .or(record.root_cell_id)
      .map(|s| s.parse::<NodeId>())
      .transpose()?;
    Ok(Self {
      id: record.id,
      split_limit: record.split_limit,
      root_id,
    })
  }

  /// Build, optionally LOD, and persist a point set for one batch of points.
  #[tracing::instrument(skip_all, name = "pointset::create", fields(key = %key))]
  pub fn create(
    storage: &Storage,
    key: &str,
    chunk: &Chunk,
    split_limit: usize,
    generate_lod: bool,
    token: &CancellationToken,
  ) -> Result<Arc<PointSet>> {
    let root_cell = Cell::from_box(&chunk.bounding_box())
      .ok_or_else(|| OctreeError::config("cannot create a point set without positions"))?;
    token.check()?;
    let mut root = build_tree(storage, chunk, root_cell, split_limit)?;
    if generate_lod {
      let config = LodConfig::default().with_token(token.clone());
      root = lod::generate_lod(storage, root.id, split_limit, &config)?;
    }
    info!(points = root.point_count_tree, root = %root.id, "created point set");
    storage.put_point_set(PointSet::new(key, split_limit, Some(root.id)))
  }

  /// Root node, `None` for an empty set.
  pub fn root(&self, storage: &Storage) -> Result<Option<Arc<PointSetNode>>> {
    self.root_id.map(|id| storage.require_node(id)).transpose()
  }

  pub fn point_count(&self, storage: &Storage) -> Result<u64> {
    Ok(self.root(storage)?.map_or(0, |r| r.point_count_tree))
  }

  /// Exact bounds of all points; invalid for an empty set.
  pub fn bounds(&self, storage: &Storage) -> Result<Box3d> {
    Ok(
      self
        .root(storage)?
        .map_or(Box3d::INVALID, |r| r.bounding_box()),
    )
  }

  /// Union with `other`, which must live in the same store and use the same
  /// split limit. An empty side yields the other set unchanged. The result
  /// has a fresh key and is not persisted.
  pub fn merge(
    &self,
    storage: &Storage,
    other: &PointSet,
    other_storage: &Storage,
    token: &CancellationToken,
  ) -> Result<PointSet> {
    if other.is_empty() {
      return Ok(self.clone());
    }
    if self.is_empty() {
      return Ok(other.clone());
    }
    if !storage.same_store(other_storage) {
      return Err(OctreeError::config(format!(
        "cannot merge {} and {} from different stores",
        self.id, other.id
      )));
    }
    if self.split_limit != other.split_limit {
      return Err(OctreeError::config(format!(
        "cannot merge split limits {} and {}",
        self.split_limit, other.split_limit
      )));
    }

    let (Some(a), Some(b)) = (self.root(storage)?, other.root(storage)?) else {
      return Err(OctreeError::invariant("non-empty point set without root"));
    };
    let merged = merge_trees(storage, &a, &b, self.split_limit, token)?;
    Ok(PointSet::new(
      format!("{}.json", NodeId::new()),
      self.split_limit,
      Some(merged.id),
    ))
  }

  /// Decorate the tree with LOD data and persist the result under `key`.
  pub fn generate_lod(&self, storage: &Storage, key: &str, config: &LodConfig) -> Result<Arc<PointSet>> {
    let Some(root) = self.root_id else {
      return storage.put_point_set(PointSet::empty(key, self.split_limit));
    };
    let lodded = lod::generate_lod(storage, root, self.split_limit, config)?;
    storage.put_point_set(PointSet::new(key, self.split_limit, Some(lodded.id)))
  }

  // ---- queries ----

  pub fn query<'a>(
    &self,
    storage: &'a Storage,
    filter: Filter,
    min_cell_exponent: Option<i32>,
  ) -> Result<QueryPoints<'a>> {
    Ok(match self.root(storage)? {
      Some(root) => query::query_points(storage, root, filter, min_cell_exponent),
      None => QueryPoints::empty(storage, filter),
    })
  }

  pub fn count(&self, storage: &Storage, filter: &Filter, min_cell_exponent: Option<i32>) -> Result<u64> {
    match self.root(storage)? {
      Some(root) => query::count_points(storage, &root, filter, min_cell_exponent),
      None => Ok(0),
    }
  }

  pub fn count_approximately(
    &self,
    storage: &Storage,
    filter: &Filter,
    min_cell_exponent: Option<i32>,
  ) -> Result<u64> {
    match self.root(storage)? {
      Some(root) => query::count_points_approximately(storage, &root, filter, min_cell_exponent),
      None => Ok(0),
    }
  }

  pub fn query_points_inside_box<'a>(
    &self,
    storage: &'a Storage,
    query: Box3d,
    min_cell_exponent: Option<i32>,
  ) -> Result<QueryPoints<'a>> {
    self.query(storage, Filter::InsideBox3d(query), min_cell_exponent)
  }

  pub fn query_points_outside_box<'a>(
    &self,
    storage: &'a Storage,
    query: Box3d,
    min_cell_exponent: Option<i32>,
  ) -> Result<QueryPoints<'a>> {
    self.query(storage, Filter::OutsideBox3d(query), min_cell_exponent)
  }

  pub fn query_points_inside_convex_hull<'a>(
    &self,
    storage: &'a Storage,
    query: &Hull3d,
    min_cell_exponent: Option<i32>,
  ) -> Result<QueryPoints<'a>> {
    self.query(storage, Filter::InsideConvexHull(query.clone()), min_cell_exponent)
  }

  pub fn query_points_outside_convex_hull<'a>(
    &self,
    storage: &'a Storage,
    query: &Hull3d,
    min_cell_exponent: Option<i32>,
  ) -> Result<QueryPoints<'a>> {
    self.query(storage, Filter::OutsideConvexHull(query.clone()), min_cell_exponent)
  }

  pub fn query_points_inside_sphere<'a>(
    &self,
    storage: &'a Storage,
    query: Sphere3d,
    min_cell_exponent: Option<i32>,
  ) -> Result<QueryPoints<'a>> {
    self.query(storage, Filter::InsideSphere3d(query), min_cell_exponent)
  }

  pub fn query_points_outside_sphere<'a>(
    &self,
    storage: &'a Storage,
    query: Sphere3d,
    min_cell_exponent: Option<i32>,
  ) -> Result<QueryPoints<'a>> {
    self.query(storage, Filter::OutsideSphere3d(query), min_cell_exponent)
  }

  pub fn count_points_inside_box(&self, storage: &Storage, query: Box3d, min_cell_exponent: Option<i32>) -> Result<u64> {
    self.count(storage, &Filter::InsideBox3d(query), min_cell_exponent)
  }

  pub fn count_points_inside_convex_hull(
    &self,
    storage: &Storage,
    query: &Hull3d,
    min_cell_exponent: Option<i32>,
  ) -> Result<u64> {
    self.count(storage, &Filter::InsideConvexHull(query.clone()), min_cell_exponent)
  }

  pub fn count_points_outside_convex_hull(
    &self,
    storage: &Storage,
    query: &Hull3d,
    min_cell_exponent: Option<i32>,
  ) -> Result<u64> {
    self.count(storage, &Filter::OutsideConvexHull(query.clone()), min_cell_exponent)
  }

  pub fn count_points_approximately_inside_convex_hull(
    &self,
    storage: &Storage,
    query: &Hull3d,
    min_cell_exponent: Option<i32>,
  ) -> Result<u64> {
    self.count_approximately(storage, &Filter::InsideConvexHull(query.clone()), min_cell_exponent)
  }

  pub fn count_points_approximately_outside_convex_hull(
    &self,
    storage: &Storage,
    query: &Hull3d,
    min_cell_exponent: Option<i32>,
  ) -> Result<u64> {
    self.count_approximately(storage, &Filter::OutsideConvexHull(query.clone()), min_cell_exponent)
  }
}

#[cfg(test)]
#[path = "pointset_test.rs"]
mod pointset_test;
