//! Sphere3d - closed ball used by sphere filters.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use super::Box3d;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Sphere3d {
  pub center: DVec3,
  pub radius: f64,
}

impl Sphere3d {
  pub fn new(center: DVec3, radius: f64) -> Self {
    Self { center, radius }
  }

  #[inline]
  pub fn radius_squared(&self) -> f64 {
    self.radius * self.radius
  }

  #[inline]
  pub fn contains(&self, p: DVec3) -> bool {
    self.center.distance_squared(p) <= self.radius_squared()
  }

  /// All 8 corners inside the ball.
  pub fn contains_box(&self, b: &Box3d) -> bool {
    b.corners().iter().all(|c| self.contains(*c))
  }

  /// Closest point of the box within the radius.
  pub fn intersects_box(&self, b: &Box3d) -> bool {
    let closest = self.center.clamp(b.min, b.max);
    self.contains(closest)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn box_relations() {
    let s = Sphere3d::new(DVec3::ZERO, 1.0);
    let small = Box3d::new(DVec3::splat(-0.5), DVec3::splat(0.5));
    let corner_out = Box3d::new(DVec3::splat(-0.9), DVec3::splat(0.9));
    let far = Box3d::new(DVec3::splat(2.0), DVec3::splat(3.0));

    assert!(s.contains_box(&small));
    assert!(!s.contains_box(&corner_out));
    assert!(s.intersects_box(&corner_out));
    assert!(!s.intersects_box(&far));
  }
}
