use glam::DVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::color::C4b;

fn random_chunk(n: usize, seed: u64) -> Chunk {
  let mut rng = StdRng::seed_from_u64(seed);
  Chunk::new(
    (0..n)
      .map(|_| DVec3::new(rng.random(), rng.random(), rng.random()))
      .collect(),
  )
}

/// Walk the tree and check the structural invariants at every node.
fn check_tree(storage: &Storage, node: &PointSetNode, split_limit: usize, leaves: &mut u64) {
  node.validate_children(storage).unwrap();
  if node.is_leaf() {
    assert!(node.point_count_cell as usize <= split_limit);
    assert_eq!(node.point_count_cell as u64, node.point_count_tree);
    assert!(node.bounding_box_local.is_some());
    *leaves += node.point_count_tree;
    for p in node.positions_absolute().unwrap() {
      assert!(node.cell.bounding_box().contains_point(p));
    }
  } else {
    assert!(!node.has_positions());
    assert!(node.bounding_box_local.is_none());
    for (_, id) in node.children() {
      let child = storage.require_node(id).unwrap();
      assert!(node.bounding_box().contains_box(&child.bounding_box()));
      check_tree(storage, &child, split_limit, leaves);
    }
  }
}

#[test]
fn test_single_leaf_below_split_limit() {
  let storage = Storage::in_memory();
  let chunk = Chunk::new(vec![DVec3::splat(0.25), DVec3::splat(0.75)]);
  let root = build_tree(&storage, &chunk, Cell::new(0, 0, 0, 0), 4).unwrap();

  assert!(root.is_leaf());
  assert_eq!(root.point_count_tree, 2);
  let abs = root.positions_absolute().unwrap();
  assert_eq!(abs, vec![DVec3::splat(0.25), DVec3::splat(0.75)]);
  let local = root.bounding_box_local.unwrap();
  assert_eq!(local.min, glam::Vec3::splat(-0.25));
}

/// Exceeding the split limit routes points into their octants.
#[test]
fn test_split_routes_points_by_octant() {
  let storage = Storage::in_memory();
  let chunk = Chunk::new(vec![
    DVec3::new(0.1, 0.1, 0.1),
    DVec3::new(0.9, 0.1, 0.1),
    DVec3::new(0.1, 0.9, 0.9),
  ]);
  let root = build_tree(&storage, &chunk, Cell::new(0, 0, 0, 0), 2).unwrap();

  assert!(!root.is_leaf());
  let octants: Vec<u8> = root.children().map(|(o, _)| o).collect();
  assert_eq!(octants, vec![0, 1, 6]);
  assert_eq!(root.point_count_tree, 3);
  root.validate_children(&storage).unwrap();
}

#[test]
fn test_random_points_satisfy_tree_invariants() {
  let storage = Storage::in_memory();
  let chunk = random_chunk(2_000, 7);
  let root = build_tree(&storage, &chunk, Cell::new(0, 0, 0, 0), 32).unwrap();

  assert_eq!(root.point_count_tree, 2_000);
  let mut leaves = 0;
  check_tree(&storage, &root, 32, &mut leaves);
  assert_eq!(leaves, 2_000);
}

#[test]
fn test_exact_duplicates_are_dropped() {
  let storage = Storage::in_memory();
  let p = DVec3::new(0.3, 0.6, 0.2);
  let chunk = Chunk::new(vec![p, p, p]);

  let set = InMemoryPointSet::build(&chunk, Cell::new(0, 0, 0, 0), 1).unwrap();
  assert_eq!(set.point_count(), 1);
  let root = set.to_point_set_node(&storage).unwrap();
  assert!(root.is_leaf());
  assert_eq!(root.point_count_tree, 1);
}

/// Attributes follow their points into the leaves.
#[test]
fn test_attributes_are_sliced_with_points() {
  let storage = Storage::in_memory();
  let chunk = Chunk::new(vec![
    DVec3::new(0.1, 0.1, 0.1),
    DVec3::new(0.9, 0.9, 0.9),
    DVec3::new(0.2, 0.2, 0.2),
  ])
  .with_colors(vec![C4b::new(1, 0, 0, 255), C4b::new(2, 0, 0, 255), C4b::new(3, 0, 0, 255)])
  .unwrap()
  .with_intensities(vec![10, 20, 30])
  .unwrap();

  let root = build_tree(&storage, &chunk, Cell::new(0, 0, 0, 0), 2).unwrap();
  let low = storage.require_node(root.subnodes[0].unwrap()).unwrap();
  let high = storage.require_node(root.subnodes[7].unwrap()).unwrap();

  assert_eq!(*low.intensities().unwrap().unwrap(), vec![10, 30]);
  assert_eq!(low.colors().unwrap().unwrap()[1].r, 3);
  assert_eq!(*high.intensities().unwrap().unwrap(), vec![20]);
  assert!(!high.has_normals());
}

#[test]
fn test_centered_root_covers_points_around_origin() {
  let storage = Storage::in_memory();
  let chunk = Chunk::new(vec![DVec3::splat(-0.5), DVec3::splat(0.5), DVec3::new(0.5, -0.5, 0.1)]);
  let root_cell = Cell::from_box(&chunk.bounding_box()).unwrap();
  assert!(root_cell.is_centered());

  let root = build_tree(&storage, &chunk, root_cell, 1).unwrap();
  let mut leaves = 0;
  check_tree(&storage, &root, 1, &mut leaves);
  assert_eq!(leaves, 3);
}

#[test]
fn test_invalid_builds_are_config_errors() {
  let cell = Cell::new(0, 0, 0, 0);
  assert!(matches!(
    InMemoryPointSet::build(&Chunk::empty(), cell, 8),
    Err(OctreeError::Config(_))
  ));

  let chunk = Chunk::new(vec![DVec3::splat(0.5)]);
  assert!(matches!(
    InMemoryPointSet::build(&chunk, cell, 0),
    Err(OctreeError::Config(_))
  ));

  let outside = Chunk::new(vec![DVec3::splat(3.0)]);
  assert!(matches!(
    InMemoryPointSet::build(&outside, cell, 8),
    Err(OctreeError::Config(_))
  ));
}
