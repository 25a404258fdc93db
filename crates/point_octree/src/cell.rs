//! Cell - immutable value type for a cubic octree partition.
//!
//! A cell (x, y, z, e) covers the cube of side 2^e anchored at
//! (x·2^e, y·2^e, z·2^e). Cells straddling the origin cannot be expressed on
//! that grid, so a second family of *centered* cells covers
//! [-2^(e-1), 2^(e-1)]³; their octants are ordinary grid cells.

use glam::DVec3;

use crate::geometry::Box3d;

/// Sentinel coordinate marking a centered cell.
const CENTERED: i64 = i64::MAX;

/// Octree cell - immutable value type.
///
/// Octant index bits: bit 0 = +X half, bit 1 = +Y half, bit 2 = +Z half.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Cell {
  /// Grid X position at this cell's exponent
  pub x: i64,
  /// Grid Y position at this cell's exponent
  pub y: i64,
  /// Grid Z position at this cell's exponent
  pub z: i64,
  /// Side length is 2^e
  pub e: i32,
}

impl Cell {
  /// Create a new grid cell.
  pub fn new(x: i64, y: i64, z: i64, e: i32) -> Self {
    debug_assert!(x != CENTERED && y != CENTERED && z != CENTERED);
    Self { x, y, z, e }
  }

  /// Cell of side 2^e centered at the origin.
  pub fn centered(e: i32) -> Self {
    Self {
      x: CENTERED,
      y: CENTERED,
      z: CENTERED,
      e,
    }
  }

  #[inline]
  pub fn is_centered(&self) -> bool {
    self.x == CENTERED && self.y == CENTERED && self.z == CENTERED
  }

  /// Side length 2^e.
  #[inline]
  pub fn size(&self) -> f64 {
    2.0_f64.powi(self.e)
  }

  pub fn bounding_box(&self) -> Box3d {
    if self.is_centered() {
      let h = DVec3::splat(2.0_f64.powi(self.e - 1));
      return Box3d::new(-h, h);
    }
    let s = self.size();
    let min = DVec3::new(self.x as f64 * s, self.y as f64 * s, self.z as f64 * s);
    Box3d::new(min, min + DVec3::splat(s))
  }

  pub fn center(&self) -> DVec3 {
    if self.is_centered() {
      return DVec3::ZERO;
    }
    let s = self.size();
    DVec3::new(
      (self.x as f64 + 0.5) * s,
      (self.y as f64 + 0.5) * s,
      (self.z as f64 + 0.5) * s,
    )
  }

  /// Child cell (exponent e - 1) for the given octant 0-7.
  pub fn octant(&self, octant: u8) -> Self {
    debug_assert!(octant < 8);
    let cx = (octant & 1) as i64;
    let cy = ((octant >> 1) & 1) as i64;
    let cz = ((octant >> 2) & 1) as i64;
    if self.is_centered() {
      return Self::new(cx - 1, cy - 1, cz - 1, self.e - 1);
    }
    Self::new(
      self.x * 2 + cx,
      self.y * 2 + cy,
      self.z * 2 + cz,
      self.e - 1,
    )
  }

  /// All 8 octants in index order.
  pub fn octants(&self) -> [Cell; 8] {
    std::array::from_fn(|i| self.octant(i as u8))
  }

  /// Parent cell (exponent e + 1). The parent of a centered cell is the next
  /// larger centered cell.
  pub fn parent(&self) -> Self {
    if self.is_centered() {
      return Self::centered(self.e + 1);
    }
    Self::new(
      self.x.div_euclid(2),
      self.y.div_euclid(2),
      self.z.div_euclid(2),
      self.e + 1,
    )
  }

  /// Octant of this cell that `p` falls into, comparing against the center
  /// per axis.
  #[inline]
  pub fn octant_index_of(&self, p: DVec3) -> u8 {
    let c = self.center();
    let mut i = 0u8;
    if p.x >= c.x {
      i |= 1;
    }
    if p.y >= c.y {
      i |= 2;
    }
    if p.z >= c.z {
      i |= 4;
    }
    i
  }

  /// True when `other` is a strict descendant reachable by octant descent.
  pub fn is_ancestor_of(&self, other: &Cell) -> bool {
    !other.is_centered()
      && other.e < self.e
      && self.bounding_box().contains_box(&other.bounding_box())
  }

  /// Smallest cell containing the box. Boxes straddling the origin on any
  /// axis get a centered cell. Returns `None` for an invalid box.
  pub fn from_box(b: &Box3d) -> Option<Self> {
    if b.is_invalid() || !b.min.is_finite() || !b.max.is_finite() {
      return None;
    }

    let straddles = (b.min.x < 0.0 && b.max.x > 0.0)
      || (b.min.y < 0.0 && b.max.y > 0.0)
      || (b.min.z < 0.0 && b.max.z > 0.0);
    if straddles {
      let reach = b.min.abs().max(b.max.abs()).max_element();
      let mut cell = Self::centered(reach.log2().ceil() as i32 + 1);
      while !cell.bounding_box().contains_box(b) {
        cell = cell.parent();
      }
      return Some(cell);
    }

    let extent = b.size().max_element();
    let e = if extent > 0.0 {
      extent.log2().ceil() as i32
    } else {
      // degenerate box: a cell much smaller than the magnitude of the point
      b.min.abs().max_element().max(1.0).log2().floor() as i32 - 24
    };
    let s = 2.0_f64.powi(e);
    let mut cell = Self::new(
      (b.min.x / s).floor() as i64,
      (b.min.y / s).floor() as i64,
      (b.min.z / s).floor() as i64,
      e,
    );
    while !cell.bounding_box().contains_box(b) {
      cell = cell.parent();
    }
    Some(cell)
  }

  /// Smallest cell that contains both cells.
  pub fn common_ancestor(a: &Cell, b: &Cell) -> Self {
    let union = a.bounding_box().union(&b.bounding_box());
    // both boxes are valid, so from_box cannot fail
    Self::from_box(&union).unwrap_or(if a.e >= b.e { *a } else { *b })
  }
}

#[cfg(test)]
#[path = "cell_test.rs"]
mod cell_test;
