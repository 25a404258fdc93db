//! Per-point normal estimation by principal component analysis of the k
//! nearest neighbors.

use glam::{DMat3, DVec3, Vec3};
use rayon::prelude::*;

use crate::knn::KdTree;

/// Neighbors used per point.
pub const NORMAL_NEIGHBORS: usize = 16;

/// Estimate one unit normal per position. Points with fewer than three
/// neighbors get +Z. Normals are oriented towards +Z.
pub fn estimate_normals(positions: &[Vec3], kd: &KdTree<'_>, k: usize) -> Vec<Vec3> {
  positions
    .par_iter()
    .map(|&p| {
      let neighbors = kd.closest(p, k, f32::INFINITY);
      if neighbors.len() < 3 {
        return Vec3::Z;
      }
      let points: Vec<DVec3> = neighbors
        .iter()
        .map(|n| positions[n.index].as_dvec3())
        .collect();
      plane_normal(&points).as_vec3()
    })
    .collect()
}

/// Normal of the least-squares plane through the points.
fn plane_normal(points: &[DVec3]) -> DVec3 {
  let n = points.len() as f64;
  let mean = points.iter().copied().sum::<DVec3>() / n;

  let (mut xx, mut xy, mut xz, mut yy, mut yz, mut zz) = (0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
  for p in points {
    let d = *p - mean;
    xx += d.x * d.x;
    xy += d.x * d.y;
    xz += d.x * d.z;
    yy += d.y * d.y;
    yz += d.y * d.z;
    zz += d.z * d.z;
  }
  let cov = DMat3::from_cols(
    DVec3::new(xx, xy, xz) / n,
    DVec3::new(xy, yy, yz) / n,
    DVec3::new(xz, yz, zz) / n,
  );

  let normal = smallest_eigenvector(&cov);
  if normal.z < 0.0 {
    -normal
  } else {
    normal
  }
}

/// Eigenvector of the smallest eigenvalue of a symmetric 3x3 matrix, using
/// the closed-form trigonometric eigenvalue solution.
fn smallest_eigenvector(a: &DMat3) -> DVec3 {
  let (a00, a01, a02) = (a.x_axis.x, a.y_axis.x, a.z_axis.x);
  let (a11, a12, a22) = (a.y_axis.y, a.z_axis.y, a.z_axis.z);

  let p1 = a01 * a01 + a02 * a02 + a12 * a12;
  let q = (a00 + a11 + a22) / 3.0;
  let p2 = (a00 - q).powi(2) + (a11 - q).powi(2) + (a22 - q).powi(2) + 2.0 * p1;
  let p = (p2 / 6.0).sqrt();
  if p < 1e-30 {
    // isotropic spread, any direction fits
    return DVec3::Z;
  }

  let b = (*a - DMat3::from_diagonal(DVec3::splat(q))) * (1.0 / p);
  let r = (b.determinant() / 2.0).clamp(-1.0, 1.0);
  let phi = r.acos() / 3.0;
  // smallest of the three eigenvalues
  let l2 = q + 2.0 * p * (phi + 2.0 * std::f64::consts::PI / 3.0).cos();

  let m = *a - DMat3::from_diagonal(DVec3::splat(l2));
  let r0 = m.row(0);
  let r1 = m.row(1);
  let r2 = m.row(2);
  let candidates = [r0.cross(r1), r0.cross(r2), r1.cross(r2)];
  let best = candidates
    .into_iter()
    .max_by(|u, v| u.length_squared().total_cmp(&v.length_squared()))
    .unwrap_or(DVec3::Z);
  if best.length_squared() < 1e-30 {
    DVec3::Z
  } else {
    best.normalize()
  }
}
