//! Chunk - a batch of points in global coordinates with optional parallel
//! attribute arrays.
//!
//! Chunks are what parsers emit, what the builder consumes and what queries
//! return. Every transform returns a new chunk.

use std::collections::HashSet;

use glam::{DVec3, Vec3};

use crate::color::C4b;
use crate::error::{OctreeError, Result};
use crate::geometry::Box3d;

#[derive(Clone, Debug)]
pub struct Chunk {
  positions: Vec<DVec3>,
  colors: Option<Vec<C4b>>,
  normals: Option<Vec<Vec3>>,
  intensities: Option<Vec<i32>>,
  classifications: Option<Vec<u8>>,
  bounding_box: Box3d,
}

impl Default for Chunk {
  fn default() -> Self {
    Self::empty()
  }
}

fn check_len(what: &str, len: usize, expected: usize) -> Result<()> {
  if len != expected {
    return Err(OctreeError::config(format!(
      "{what} has {len} entries but there are {expected} positions"
    )));
  }
  Ok(())
}

fn pick<T: Copy>(values: &Option<Vec<T>>, indices: &[usize]) -> Option<Vec<T>> {
  values
    .as_ref()
    .map(|vs| indices.iter().map(|&i| vs[i]).collect())
}

fn concat<T: Clone>(a: &Option<Vec<T>>, b: &Option<Vec<T>>) -> Option<Vec<T>> {
  match (a, b) {
    (Some(a), Some(b)) => {
      let mut out = Vec::with_capacity(a.len() + b.len());
      out.extend_from_slice(a);
      out.extend_from_slice(b);
      Some(out)
    }
    _ => None,
  }
}

impl Chunk {
  pub fn empty() -> Self {
    Self {
      positions: Vec::new(),
      colors: None,
      normals: None,
      intensities: None,
      classifications: None,
      bounding_box: Box3d::INVALID,
    }
  }

  pub fn new(positions: Vec<DVec3>) -> Self {
    let bounding_box = Box3d::from_points(positions.iter());
    Self {
      positions,
      bounding_box,
      ..Self::empty()
    }
  }

  pub fn with_colors(mut self, colors: Vec<C4b>) -> Result<Self> {
    check_len("colors", colors.len(), self.len())?;
    self.colors = Some(colors);
    Ok(self)
  }

  pub fn with_normals(mut self, normals: Vec<Vec3>) -> Result<Self> {
    check_len("normals", normals.len(), self.len())?;
    self.normals = Some(normals);
    Ok(self)
  }

  pub fn with_intensities(mut self, intensities: Vec<i32>) -> Result<Self> {
    check_len("intensities", intensities.len(), self.len())?;
    self.intensities = Some(intensities);
    Ok(self)
  }

  pub fn with_classifications(mut self, classifications: Vec<u8>) -> Result<Self> {
    check_len("classifications", classifications.len(), self.len())?;
    self.classifications = Some(classifications);
    Ok(self)
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.positions.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.positions.is_empty()
  }

  pub fn positions(&self) -> &[DVec3] {
    &self.positions
  }

  pub fn colors(&self) -> Option<&[C4b]> {
    self.colors.as_deref()
  }

  pub fn normals(&self) -> Option<&[Vec3]> {
    self.normals.as_deref()
  }

  pub fn intensities(&self) -> Option<&[i32]> {
    self.intensities.as_deref()
  }

  pub fn classifications(&self) -> Option<&[u8]> {
    self.classifications.as_deref()
  }

  /// Tight box of the positions, invalid when empty.
  pub fn bounding_box(&self) -> Box3d {
    self.bounding_box
  }

  /// Points at `indices`, in that order.
  pub fn subset(&self, indices: &[usize]) -> Chunk {
    let positions: Vec<DVec3> = indices.iter().map(|&i| self.positions[i]).collect();
    Chunk {
      bounding_box: Box3d::from_points(positions.iter()),
      positions,
      colors: pick(&self.colors, indices),
      normals: pick(&self.normals, indices),
      intensities: pick(&self.intensities, indices),
      classifications: pick(&self.classifications, indices),
    }
  }

  /// Concatenation. An attribute survives only when both sides carry it;
  /// an empty side contributes nothing and removes nothing.
  pub fn union(&self, other: &Chunk) -> Chunk {
    if self.is_empty() {
      return other.clone();
    }
    if other.is_empty() {
      return self.clone();
    }
    let mut positions = Vec::with_capacity(self.len() + other.len());
    positions.extend_from_slice(&self.positions);
    positions.extend_from_slice(&other.positions);
    Chunk {
      positions,
      colors: concat(&self.colors, &other.colors),
      normals: concat(&self.normals, &other.normals),
      intensities: concat(&self.intensities, &other.intensities),
      classifications: concat(&self.classifications, &other.classifications),
      bounding_box: self.bounding_box.union(&other.bounding_box),
    }
  }

  /// Union of many chunks.
  pub fn union_all<'a>(chunks: impl IntoIterator<Item = &'a Chunk>) -> Chunk {
    chunks
      .into_iter()
      .fold(Chunk::empty(), |acc, c| acc.union(c))
  }

  /// Drop exact positional duplicates; the first occurrence wins.
  pub fn deduplicate(&self) -> Chunk {
    let mut seen = HashSet::with_capacity(self.len());
    let keep: Vec<usize> = (0..self.len())
      .filter(|&i| {
        let p = self.positions[i];
        seen.insert([p.x.to_bits(), p.y.to_bits(), p.z.to_bits()])
      })
      .collect();
    if keep.len() == self.len() {
      return self.clone();
    }
    self.subset(&keep)
  }

  /// Keep a point only if its L1 distance to the previously kept point is at
  /// least `min_dist`. Order dependent.
  pub fn filter_sequential_min_dist_l1(&self, min_dist: f64) -> Chunk {
    if min_dist <= 0.0 || self.is_empty() {
      return self.clone();
    }
    let mut keep = vec![0usize];
    let mut last = self.positions[0];
    for (i, &p) in self.positions.iter().enumerate().skip(1) {
      let d = p - last;
      if d.x.abs() + d.y.abs() + d.z.abs() >= min_dist {
        keep.push(i);
        last = p;
      }
    }
    self.subset(&keep)
  }

  /// Keep the first point of each grid cell whose side is the largest power
  /// of two not exceeding `min_dist`. Order independent up to which point of
  /// a cell survives.
  pub fn filter_min_dist_by_cell(&self, min_dist: f64) -> Chunk {
    if min_dist <= 0.0 || self.is_empty() {
      return self.clone();
    }
    let size = 2.0_f64.powi(min_dist.log2().floor() as i32);
    let mut seen = HashSet::with_capacity(self.len());
    let keep: Vec<usize> = (0..self.len())
      .filter(|&i| {
        let g = (self.positions[i] / size).floor();
        seen.insert([g.x as i64, g.y as i64, g.z as i64])
      })
      .collect();
    self.subset(&keep)
  }

  pub fn filter_by_position(&self, predicate: impl Fn(DVec3) -> bool) -> Chunk {
    let keep: Vec<usize> = (0..self.len())
      .filter(|&i| predicate(self.positions[i]))
      .collect();
    self.subset(&keep)
  }

  /// Transform every position (e.g. reprojection); attributes are kept.
  pub fn map_positions(&self, f: impl Fn(DVec3) -> DVec3) -> Chunk {
    let positions: Vec<DVec3> = self.positions.iter().map(|&p| f(p)).collect();
    Chunk {
      bounding_box: Box3d::from_points(positions.iter()),
      positions,
      ..self.clone()
    }
  }
}
