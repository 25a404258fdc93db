//! Convex hull as an intersection of half-spaces.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use super::Box3d;

/// Oriented plane `normal · p = distance`. Points with positive height lie
/// in front of (outside) the plane.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Plane3d {
  pub normal: DVec3,
  pub distance: f64,
}

impl Plane3d {
  /// Plane through `point` with the given outward normal (normalized here).
  pub fn from_normal_and_point(normal: DVec3, point: DVec3) -> Self {
    let normal = normal.normalize();
    Self {
      normal,
      distance: normal.dot(point),
    }
  }

  #[inline]
  pub fn height(&self, p: DVec3) -> f64 {
    self.normal.dot(p) - self.distance
  }
}

/// Convex region bounded by planes whose normals point outward.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Hull3d {
  pub planes: Vec<Plane3d>,
}

impl Hull3d {
  pub fn new(planes: Vec<Plane3d>) -> Self {
    Self { planes }
  }

  /// Hull equivalent to an axis-aligned box.
  pub fn from_box(b: &Box3d) -> Self {
    Self::new(vec![
      Plane3d::from_normal_and_point(DVec3::NEG_X, b.min),
      Plane3d::from_normal_and_point(DVec3::X, b.max),
      Plane3d::from_normal_and_point(DVec3::NEG_Y, b.min),
      Plane3d::from_normal_and_point(DVec3::Y, b.max),
      Plane3d::from_normal_and_point(DVec3::NEG_Z, b.min),
      Plane3d::from_normal_and_point(DVec3::Z, b.max),
    ])
  }

  /// Point inside or on the boundary.
  #[inline]
  pub fn contains(&self, p: DVec3) -> bool {
    self.planes.iter().all(|plane| plane.height(p) <= 0.0)
  }

  /// Every corner of the box is inside the hull.
  pub fn contains_box(&self, b: &Box3d) -> bool {
    let corners = b.corners();
    self
      .planes
      .iter()
      .all(|plane| corners.iter().all(|c| plane.height(*c) <= 0.0))
  }

  /// Conservative intersection test: false only if some plane has the whole
  /// box strictly in front of it.
  pub fn intersects_box(&self, b: &Box3d) -> bool {
    let corners = b.corners();
    !self
      .planes
      .iter()
      .any(|plane| corners.iter().all(|c| plane.height(*c) > 0.0))
  }
}
