use glam::DVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::ids::NodeId;

fn random_points(n: usize, seed: u64, min: DVec3, extent: f64) -> Chunk {
  let mut rng = StdRng::seed_from_u64(seed);
  Chunk::new(
    (0..n)
      .map(|_| min + DVec3::new(rng.random(), rng.random(), rng.random()) * extent)
      .collect(),
  )
}

fn build(storage: &Storage, chunk: &Chunk, split_limit: usize) -> Arc<PointSetNode> {
  let cell = Cell::from_box(&chunk.bounding_box()).unwrap();
  build_tree(storage, chunk, cell, split_limit).unwrap()
}

/// Every node satisfies the split invariants; returns the leaf point total.
fn check_tree(storage: &Storage, node: &PointSetNode, split_limit: usize) -> u64 {
  node.validate_children(storage).unwrap();
  if node.is_leaf() {
    assert!(node.point_count_cell as usize <= split_limit);
    return node.point_count_tree;
  }
  node
    .children()
    .map(|(_, id)| check_tree(storage, &storage.require_node(id).unwrap(), split_limit))
    .sum()
}

fn collect_ids(storage: &Storage, node: &PointSetNode, out: &mut Vec<NodeId>) {
  out.push(node.id);
  for (_, id) in node.children() {
    collect_ids(storage, &storage.require_node(id).unwrap(), out);
  }
}

#[test]
fn test_disjoint_trees_sum_counts() {
  let storage = Storage::in_memory();
  let a = build(&storage, &random_points(200, 1, DVec3::ZERO, 1.0), 16);
  let b = build(&storage, &random_points(150, 2, DVec3::splat(5.0), 1.0), 16);

  let merged = merge_trees(&storage, &a, &b, 16, &CancellationToken::new()).unwrap();
  assert_eq!(merged.point_count_tree, 350);
  assert_eq!(check_tree(&storage, &merged, 16), 350);
  assert!(merged.bounding_box().contains_box(&a.bounding_box()));
  assert!(merged.bounding_box().contains_box(&b.bounding_box()));
}

/// Overlapping trees are re-split where their points meet.
#[test]
fn test_overlapping_trees_are_resplit() {
  let storage = Storage::in_memory();
  let a = build(&storage, &random_points(300, 3, DVec3::ZERO, 1.0), 32);
  let b = build(&storage, &random_points(300, 4, DVec3::ZERO, 1.0), 32);

  let merged = merge_trees(&storage, &a, &b, 32, &CancellationToken::new()).unwrap();
  assert_eq!(merged.point_count_tree, 600);
  assert_eq!(check_tree(&storage, &merged, 32), 600);
}

#[test]
fn test_small_leaves_merge_into_one_leaf() {
  let storage = Storage::in_memory();
  let cell = Cell::new(0, 0, 0, 0);
  let a = build_tree(&storage, &Chunk::new(vec![DVec3::splat(0.2)]), cell, 8).unwrap();
  let b = build_tree(&storage, &Chunk::new(vec![DVec3::splat(0.8)]), cell, 8).unwrap();

  let merged = merge_trees(&storage, &a, &b, 8, &CancellationToken::new()).unwrap();
  assert!(merged.is_leaf());
  assert_eq!(merged.cell, cell);
  assert_eq!(merged.point_count_tree, 2);
}

/// Subtrees that land alone in an octant are shared, not copied.
#[test]
fn test_untouched_subtrees_are_shared() {
  let storage = Storage::in_memory();
  let a = build(&storage, &random_points(100, 5, DVec3::ZERO, 1.0), 8);
  let b = build(&storage, &random_points(100, 6, DVec3::splat(4.0), 1.0), 8);

  let merged = merge_trees(&storage, &a, &b, 8, &CancellationToken::new()).unwrap();
  let mut ids = Vec::new();
  collect_ids(&storage, &merged, &mut ids);
  assert!(ids.contains(&a.id));
  assert!(ids.contains(&b.id));

  // inputs are still complete trees
  assert_eq!(check_tree(&storage, &a, 8), 100);
  assert_eq!(check_tree(&storage, &b, 8), 100);
}

#[test]
fn test_trees_on_both_sides_of_origin() {
  let storage = Storage::in_memory();
  let a = build(&storage, &random_points(120, 7, DVec3::splat(-1.0), 2.0), 16);
  let b = build(&storage, &random_points(80, 8, DVec3::new(3.0, -2.0, 0.5), 1.0), 16);
  assert!(a.cell.is_centered());

  let merged = merge_trees(&storage, &a, &b, 16, &CancellationToken::new()).unwrap();
  assert!(merged.cell.is_centered());
  assert_eq!(check_tree(&storage, &merged, 16), 200);
}

#[test]
fn test_cancelled_merge() {
  let storage = Storage::in_memory();
  let a = build(&storage, &random_points(50, 9, DVec3::ZERO, 1.0), 8);
  let b = build(&storage, &random_points(50, 10, DVec3::ZERO, 1.0), 8);
  let token = CancellationToken::new();
  token.cancel();

  assert!(merge_trees(&storage, &a, &b, 8, &token)
    .unwrap_err()
    .is_cancelled());
}
