use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use glam::DVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;

/// Two cells with same x, y, z, e should be equal and hash equally.
#[test]
fn test_cell_equality_and_hash() {
  let a = Cell::new(1, 2, 3, 5);
  let b = Cell::new(1, 2, 3, 5);
  let c = Cell::new(1, 2, 3, 6);

  assert_eq!(a, b);
  assert_ne!(a, c);

  let hash = |cell: &Cell| {
    let mut hasher = DefaultHasher::new();
    cell.hash(&mut hasher);
    hasher.finish()
  };
  assert_eq!(hash(&a), hash(&b), "Equal cells must have equal hashes");
}

/// All 8 octants should produce children with doubled coordinates plus the
/// octant bits, one exponent below.
#[test]
fn test_octant_all_8() {
  let parent = Cell::new(3, -4, 5, 10);

  for octant in 0u8..8 {
    let child = parent.octant(octant);
    assert_eq!(child.x, parent.x * 2 + (octant & 1) as i64, "Octant {} X", octant);
    assert_eq!(child.y, parent.y * 2 + ((octant >> 1) & 1) as i64, "Octant {} Y", octant);
    assert_eq!(child.z, parent.z * 2 + ((octant >> 2) & 1) as i64, "Octant {} Z", octant);
    assert_eq!(child.e, parent.e - 1, "Octant {} exponent", octant);
  }
}

/// parent(octant(cell, i)) should equal cell for any octant, including
/// negative coordinates.
#[test]
fn test_octant_parent_roundtrip() {
  for original in [Cell::new(7, 8, 9, 10), Cell::new(-7, -1, 0, -3)] {
    for octant in 0u8..8 {
      let back = original.octant(octant).parent();
      assert_eq!(back, original, "Roundtrip failed for octant {}", octant);
    }
  }
}

#[test]
fn test_bounding_box_and_center() {
  let cell = Cell::new(1, 0, -1, 1);
  let b = cell.bounding_box();
  assert_eq!(b.min, DVec3::new(2.0, 0.0, -2.0));
  assert_eq!(b.max, DVec3::new(4.0, 2.0, 0.0));
  assert_eq!(cell.center(), DVec3::new(3.0, 1.0, -1.0));

  let half = Cell::new(1, 1, 1, -1);
  assert_eq!(half.bounding_box().min, DVec3::splat(0.5));
  assert_eq!(half.size(), 0.5);
}

/// Routing a point from the root by center comparison always lands in a
/// cell containing the point.
#[test]
fn test_octant_routing_reaches_containing_cell() {
  let mut rng = StdRng::seed_from_u64(7);
  let root = Cell::new(0, 0, 0, 0);

  for _ in 0..200 {
    let p = DVec3::new(rng.random(), rng.random(), rng.random());
    let mut cell = root;
    for _ in 0..12 {
      let c = cell.center();
      let expected = (p.x >= c.x) as u8 | (((p.y >= c.y) as u8) << 1) | (((p.z >= c.z) as u8) << 2);
      let i = cell.octant_index_of(p);
      assert_eq!(i, expected);
      cell = cell.octant(i);
      assert!(cell.bounding_box().contains_point(p), "{p} not in {cell:?}");
    }
  }
}

#[test]
fn test_centered_cell_octants_are_grid_cells() {
  let c = Cell::centered(2);
  assert!(c.is_centered());
  assert_eq!(c.bounding_box().min, DVec3::splat(-2.0));
  assert_eq!(c.center(), DVec3::ZERO);

  for octant in 0u8..8 {
    let child = c.octant(octant);
    assert!(!child.is_centered());
    assert_eq!(child.e, 1);
    assert!(c.bounding_box().contains_box(&child.bounding_box()));
  }
  assert_eq!(c.octant(0), Cell::new(-1, -1, -1, 1));
  assert_eq!(c.octant(7), Cell::new(0, 0, 0, 1));
  assert_eq!(c.parent(), Cell::centered(3));
}

#[test]
fn test_from_box_unit_cube() {
  let b = Box3d::new(DVec3::ZERO, DVec3::ONE);
  assert_eq!(Cell::from_box(&b), Some(Cell::new(0, 0, 0, 0)));

  let inner = Box3d::new(DVec3::splat(0.1), DVec3::splat(0.2));
  let cell = Cell::from_box(&inner).unwrap();
  assert!(cell.bounding_box().contains_box(&inner));
  assert!(cell.e <= -2);
}

#[test]
fn test_from_box_straddling_origin_is_centered() {
  let b = Box3d::new(DVec3::new(-0.1, 1.0, 1.0), DVec3::new(0.1, 1.5, 1.5));
  let cell = Cell::from_box(&b).unwrap();
  assert!(cell.is_centered());
  assert!(cell.bounding_box().contains_box(&b));
}

#[test]
fn test_from_box_single_point() {
  let p = DVec3::new(10.0, 20.0, 30.0);
  let cell = Cell::from_box(&Box3d::new(p, p)).unwrap();
  assert!(cell.bounding_box().contains_point(p));
  assert!(Cell::from_box(&Box3d::INVALID).is_none());
}

#[test]
fn test_common_ancestor_contains_both() {
  let a = Cell::new(0, 0, 0, 0);
  let b = Cell::new(5, 1, 0, 0);
  let t = Cell::common_ancestor(&a, &b);
  assert!(t.is_ancestor_of(&a));
  assert!(t.is_ancestor_of(&b));

  let inside = Cell::new(1, 1, 1, -1);
  assert_eq!(Cell::common_ancestor(&a, &inside), a);
}
