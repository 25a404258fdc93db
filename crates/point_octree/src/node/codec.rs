//! Durable node record: a tagged attribute dictionary.
//!
//! Layout (little-endian): magic `PON1`, then entries of
//! `[tag u16][len u32][payload]`. Readers skip unknown tags; a missing tag
//! means the attribute is not present. `NODE_ID`, `CELL` and
//! `POINT_COUNT_TREE_LEAFS` are required.

use glam::Vec3;

use crate::cell::Cell;
use crate::error::{OctreeError, Result};
use crate::geometry::{Box3d, Box3f};
use crate::ids::NodeId;
use crate::node::{AttributeRef, LodStats, PointSetNode};
use crate::storage::codec::Reader;
use crate::storage::{Storable, Storage};

pub const MAGIC: &[u8; 4] = b"PON1";

/// Stable attribute tags. Values are part of the on-disk format.
pub mod tag {
  pub const NODE_ID: u16 = 1;
  pub const CELL: u16 = 2;
  pub const POINT_COUNT_TREE_LEAFS: u16 = 3;
  pub const POINT_COUNT_CELL: u16 = 4;
  pub const BOUNDING_BOX_EXACT_LOCAL: u16 = 5;
  pub const BOUNDING_BOX_EXACT_GLOBAL: u16 = 6;

  pub const POSITIONS_LOCAL_3F: u16 = 10;
  pub const POSITIONS_LOCAL_3F_REFERENCE: u16 = 11;
  pub const COLORS_4B: u16 = 12;
  pub const COLORS_4B_REFERENCE: u16 = 13;
  pub const NORMALS_3F: u16 = 14;
  pub const NORMALS_3F_REFERENCE: u16 = 15;
  pub const INTENSITIES_1I: u16 = 16;
  pub const INTENSITIES_1I_REFERENCE: u16 = 17;
  pub const CLASSIFICATIONS_1B: u16 = 18;
  pub const CLASSIFICATIONS_1B_REFERENCE: u16 = 19;
  pub const KD_TREE_3F: u16 = 20;
  pub const KD_TREE_3F_REFERENCE: u16 = 21;

  pub const SUBNODES_GUIDS: u16 = 30;
  pub const MIN_TREE_DEPTH: u16 = 31;
  pub const MAX_TREE_DEPTH: u16 = 32;
  pub const POSITIONS_LOCAL_3F_CENTROID: u16 = 33;
  pub const DIST_TO_CENTROID_AVERAGE: u16 = 34;
  pub const DIST_TO_CENTROID_STD_DEV: u16 = 35;
  pub const AVERAGE_POINT_DISTANCE: u16 = 36;
  pub const AVERAGE_POINT_DISTANCE_STD_DEV: u16 = 37;
}

struct Writer {
  out: Vec<u8>,
}

impl Writer {
  fn entry(&mut self, tag: u16, payload: &[u8]) {
    self.out.extend_from_slice(&tag.to_le_bytes());
    self.out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    self.out.extend_from_slice(payload);
  }

  fn attribute<T: Storable>(
    &mut self,
    inline_tag: u16,
    ref_tag: u16,
    attr: &Option<AttributeRef<T>>,
  ) -> Result<()> {
    match attr {
      None => {}
      Some(AttributeRef::Inline(v)) => self.entry(inline_tag, &v.encode()?),
      Some(AttributeRef::Stored(r)) => self.entry(ref_tag, r.id().as_bytes()),
    }
    Ok(())
  }
}

fn f32s(values: &[f32]) -> Vec<u8> {
  values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn f64s(values: &[f64]) -> Vec<u8> {
  values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn encode(node: &PointSetNode) -> Result<Vec<u8>> {
  let mut w = Writer {
    out: MAGIC.to_vec(),
  };

  w.entry(tag::NODE_ID, &node.id.to_le_bytes());

  let mut cell = Vec::with_capacity(28);
  cell.extend_from_slice(&node.cell.x.to_le_bytes());
  cell.extend_from_slice(&node.cell.y.to_le_bytes());
  cell.extend_from_slice(&node.cell.z.to_le_bytes());
  cell.extend_from_slice(&node.cell.e.to_le_bytes());
  w.entry(tag::CELL, &cell);

  w.entry(tag::POINT_COUNT_TREE_LEAFS, &node.point_count_tree.to_le_bytes());
  if node.point_count_cell > 0 {
    w.entry(tag::POINT_COUNT_CELL, &node.point_count_cell.to_le_bytes());
  }

  if let Some(b) = node.bounding_box_local {
    w.entry(
      tag::BOUNDING_BOX_EXACT_LOCAL,
      &f32s(&[b.min.x, b.min.y, b.min.z, b.max.x, b.max.y, b.max.z]),
    );
  }
  if let Some(b) = node.bounding_box_global {
    w.entry(
      tag::BOUNDING_BOX_EXACT_GLOBAL,
      &f64s(&[b.min.x, b.min.y, b.min.z, b.max.x, b.max.y, b.max.z]),
    );
  }

  w.attribute(tag::POSITIONS_LOCAL_3F, tag::POSITIONS_LOCAL_3F_REFERENCE, &node.positions)?;
  w.attribute(tag::COLORS_4B, tag::COLORS_4B_REFERENCE, &node.colors)?;
  w.attribute(tag::NORMALS_3F, tag::NORMALS_3F_REFERENCE, &node.normals)?;
  w.attribute(tag::INTENSITIES_1I, tag::INTENSITIES_1I_REFERENCE, &node.intensities)?;
  w.attribute(
    tag::CLASSIFICATIONS_1B,
    tag::CLASSIFICATIONS_1B_REFERENCE,
    &node.classifications,
  )?;
  w.attribute(tag::KD_TREE_3F, tag::KD_TREE_3F_REFERENCE, &node.kd_tree)?;

  if !node.is_leaf() {
    let ids: Vec<u8> = node
      .subnodes
      .iter()
      .flat_map(|s| s.unwrap_or(NodeId::NIL).to_le_bytes())
      .collect();
    w.entry(tag::SUBNODES_GUIDS, &ids);
  }

  if let Some(lod) = &node.lod {
    w.entry(tag::MIN_TREE_DEPTH, &lod.min_tree_depth.to_le_bytes());
    w.entry(tag::MAX_TREE_DEPTH, &lod.max_tree_depth.to_le_bytes());
    let c = lod.centroid;
    w.entry(tag::POSITIONS_LOCAL_3F_CENTROID, &f32s(&[c.x, c.y, c.z]));
    w.entry(tag::DIST_TO_CENTROID_AVERAGE, &lod.dist_to_centroid_average.to_le_bytes());
    w.entry(tag::DIST_TO_CENTROID_STD_DEV, &lod.dist_to_centroid_std_dev.to_le_bytes());
    w.entry(tag::AVERAGE_POINT_DISTANCE, &lod.average_point_distance.to_le_bytes());
    w.entry(
      tag::AVERAGE_POINT_DISTANCE_STD_DEV,
      &lod.average_point_distance_std_dev.to_le_bytes(),
    );
  }

  Ok(w.out)
}

fn reference<T: Storable>(
  storage: &Storage,
  key: &str,
  payload: &[u8],
) -> Result<AttributeRef<T>> {
  let id = std::str::from_utf8(payload)
    .map_err(|_| OctreeError::decode(key, "attribute reference is not UTF-8"))?;
  Ok(AttributeRef::Stored(storage.reference(id)))
}

fn inline<T: Storable>(key: &str, payload: &[u8]) -> Result<AttributeRef<T>> {
  Ok(AttributeRef::inline(T::decode(key, payload)?))
}

/// Decode a node record read from `key`. Stored attribute references resolve
/// lazily through `storage`.
pub fn decode(storage: &Storage, key: &str, bytes: &[u8]) -> Result<PointSetNode> {
  let mut r = Reader::new(key, bytes);
  if r.take(4)? != MAGIC {
    return Err(OctreeError::decode(key, "not a node record"));
  }

  let mut id = None;
  let mut cell = None;
  let mut point_count_tree = None;
  let mut node = PointSetNode::with_id_and_cell(NodeId::NIL, Cell::new(0, 0, 0, 0));
  let mut lod = LodStats::default();
  let mut has_lod = false;

  while !r.is_empty() {
    let t = r.u16()?;
    let len = r.u32()? as usize;
    let payload = r.take(len)?;
    let mut p = Reader::new(key, payload);

    match t {
      tag::NODE_ID => id = Some(NodeId::from_u128(p.u128()?)),
      tag::CELL => {
        cell = Some(Cell {
          x: p.i64()?,
          y: p.i64()?,
          z: p.i64()?,
          e: p.i32()?,
        })
      }
      tag::POINT_COUNT_TREE_LEAFS => point_count_tree = Some(p.u64()?),
      tag::POINT_COUNT_CELL => node.point_count_cell = p.u32()?,
      tag::BOUNDING_BOX_EXACT_LOCAL => {
        node.bounding_box_local = Some(Box3f {
          min: p.vec3()?,
          max: p.vec3()?,
        });
      }
      tag::BOUNDING_BOX_EXACT_GLOBAL => {
        node.bounding_box_global = Some(Box3d {
          min: p.dvec3()?,
          max: p.dvec3()?,
        });
      }

      tag::POSITIONS_LOCAL_3F => node.positions = Some(inline(key, payload)?),
      tag::POSITIONS_LOCAL_3F_REFERENCE => node.positions = Some(reference(storage, key, payload)?),
      tag::COLORS_4B => node.colors = Some(inline(key, payload)?),
      tag::COLORS_4B_REFERENCE => node.colors = Some(reference(storage, key, payload)?),
      tag::NORMALS_3F => node.normals = Some(inline(key, payload)?),
      tag::NORMALS_3F_REFERENCE => node.normals = Some(reference(storage, key, payload)?),
      tag::INTENSITIES_1I => node.intensities = Some(inline(key, payload)?),
      tag::INTENSITIES_1I_REFERENCE => node.intensities = Some(reference(storage, key, payload)?),
      tag::CLASSIFICATIONS_1B => node.classifications = Some(inline(key, payload)?),
      tag::CLASSIFICATIONS_1B_REFERENCE => {
        node.classifications = Some(reference(storage, key, payload)?)
      }
      tag::KD_TREE_3F => node.kd_tree = Some(inline(key, payload)?),
      tag::KD_TREE_3F_REFERENCE => node.kd_tree = Some(reference(storage, key, payload)?),

      tag::SUBNODES_GUIDS => {
        for slot in node.subnodes.iter_mut() {
          let sub = NodeId::from_u128(p.u128()?);
          *slot = (!sub.is_nil()).then_some(sub);
        }
      }
      tag::MIN_TREE_DEPTH => {
        lod.min_tree_depth = p.i32()?;
        has_lod = true;
      }
      tag::MAX_TREE_DEPTH => {
        lod.max_tree_depth = p.i32()?;
        has_lod = true;
      }
      tag::POSITIONS_LOCAL_3F_CENTROID => {
        lod.centroid = Vec3::new(p.f32()?, p.f32()?, p.f32()?);
        has_lod = true;
      }
      tag::DIST_TO_CENTROID_AVERAGE => lod.dist_to_centroid_average = p.f32()?,
      tag::DIST_TO_CENTROID_STD_DEV => lod.dist_to_centroid_std_dev = p.f32()?,
      tag::AVERAGE_POINT_DISTANCE => lod.average_point_distance = p.f32()?,
      tag::AVERAGE_POINT_DISTANCE_STD_DEV => lod.average_point_distance_std_dev = p.f32()?,
      _ => {}
    }
  }

  let missing = |name: &str| OctreeError::decode(key, format!("node record lacks {name}"));
  node.id = id.ok_or_else(|| missing("node id"))?;
  node.cell = cell.ok_or_else(|| missing("cell"))?;
  node.point_count_tree = point_count_tree.ok_or_else(|| missing("tree point count"))?;
  if has_lod {
    node.lod = Some(lod);
  }
  Ok(node)
}
