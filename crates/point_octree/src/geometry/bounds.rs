//! Axis-aligned bounding boxes in double (global) and single (node-local)
//! precision.

use glam::{DVec3, Vec3};
use serde::{Deserialize, Serialize};

/// Double-precision axis-aligned bounding box.
///
/// Bounds are closed: points on the boundary are contained. The invalid box
/// (min = +inf, max = -inf) is the identity for `union`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Box3d {
  /// Minimum corner (inclusive).
  pub min: DVec3,
  /// Maximum corner (inclusive).
  pub max: DVec3,
}

impl Box3d {
  pub const INVALID: Box3d = Box3d {
    min: DVec3::splat(f64::INFINITY),
    max: DVec3::splat(f64::NEG_INFINITY),
  };

  /// Create a new box from min and max corners.
  ///
  /// # Panics
  /// Debug-asserts that min <= max on all axes.
  pub fn new(min: DVec3, max: DVec3) -> Self {
    debug_assert!(
      min.x <= max.x && min.y <= max.y && min.z <= max.z,
      "box min must be <= max on all axes"
    );
    Self { min, max }
  }

  /// Create a new box from center and half-extents.
  pub fn from_center_half_extents(center: DVec3, half_extents: DVec3) -> Self {
    Self {
      min: center - half_extents,
      max: center + half_extents,
    }
  }

  /// Tight box around the given points (invalid when empty).
  pub fn from_points<'a>(points: impl IntoIterator<Item = &'a DVec3>) -> Self {
    points.into_iter().fold(Self::INVALID, |b, p| b.extended(*p))
  }

  /// True when min > max on any axis, e.g. the box of no points.
  #[inline]
  pub fn is_invalid(&self) -> bool {
    self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
  }

  #[inline]
  pub fn extended(&self, p: DVec3) -> Self {
    Self {
      min: self.min.min(p),
      max: self.max.max(p),
    }
  }

  #[inline]
  pub fn union(&self, other: &Box3d) -> Self {
    Self {
      min: self.min.min(other.min),
      max: self.max.max(other.max),
    }
  }

  /// Check if this box overlaps with another.
  ///
  /// Two boxes overlap if they share any interior or boundary points.
  #[inline]
  pub fn intersects(&self, other: &Box3d) -> bool {
    self.min.x <= other.max.x
      && self.max.x >= other.min.x
      && self.min.y <= other.max.y
      && self.max.y >= other.min.y
      && self.min.z <= other.max.z
      && self.max.z >= other.min.z
  }

  /// Check if this box contains a point.
  #[inline]
  pub fn contains_point(&self, point: DVec3) -> bool {
    point.x >= self.min.x
      && point.x <= self.max.x
      && point.y >= self.min.y
      && point.y <= self.max.y
      && point.z >= self.min.z
      && point.z <= self.max.z
  }

  /// Check if `other` lies completely inside this box.
  #[inline]
  pub fn contains_box(&self, other: &Box3d) -> bool {
    self.contains_point(other.min) && self.contains_point(other.max)
  }

  /// The 8 corners, indexed by the same 3-bit code as octants.
  pub fn corners(&self) -> [DVec3; 8] {
    std::array::from_fn(|i| {
      DVec3::new(
        if i & 1 == 0 { self.min.x } else { self.max.x },
        if i & 2 == 0 { self.min.y } else { self.max.y },
        if i & 4 == 0 { self.min.z } else { self.max.z },
      )
    })
  }

  /// Get the size of the box (max - min).
  #[inline]
  pub fn size(&self) -> DVec3 {
    self.max - self.min
  }

  /// Get the center of the box.
  #[inline]
  pub fn center(&self) -> DVec3 {
    (self.min + self.max) * 0.5
  }

  #[inline]
  pub fn translated(&self, offset: DVec3) -> Self {
    Self {
      min: self.min + offset,
      max: self.max + offset,
    }
  }
}

/// Single-precision box for node-local (center-relative) coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Box3f {
  pub min: Vec3,
  pub max: Vec3,
}

impl Box3f {
  pub const INVALID: Box3f = Box3f {
    min: Vec3::splat(f32::INFINITY),
    max: Vec3::splat(f32::NEG_INFINITY),
  };

  pub fn new(min: Vec3, max: Vec3) -> Self {
    Self { min, max }
  }

  pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Self {
    points.into_iter().fold(Self::INVALID, |b, p| Self {
      min: b.min.min(*p),
      max: b.max.max(*p),
    })
  }

  #[inline]
  pub fn is_invalid(&self) -> bool {
    self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
  }

  /// Lift into global coordinates by adding the node center.
  pub fn to_global(&self, center: DVec3) -> Box3d {
    Box3d {
      min: self.min.as_dvec3() + center,
      max: self.max.as_dvec3() + center,
    }
  }
}
