use std::sync::atomic::AtomicU64;

use glam::DVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::builder::build_tree;
use crate::cell::Cell;
use crate::chunk::Chunk;
use crate::color::C4b;

fn random_chunk(n: usize, seed: u64) -> Chunk {
  let mut rng = StdRng::seed_from_u64(seed);
  let positions: Vec<DVec3> = (0..n)
    .map(|_| DVec3::new(rng.random(), rng.random(), rng.random()))
    .collect();
  let colors = (0..n).map(|i| C4b::new(i as u8, 0, 0, 255)).collect();
  Chunk::new(positions).with_colors(colors).unwrap()
}

fn walk(storage: &Storage, node: &PointSetNode, visit: &mut impl FnMut(&PointSetNode)) {
  visit(node);
  for (_, id) in node.children() {
    walk(storage, &storage.require_node(id).unwrap(), visit);
  }
}

#[test]
fn test_lod_counts_sum_to_split_limit() {
  for (limit, counts) in [
    (16, vec![1u64, 1, 1]),
    (8192, vec![5000, 12, 90_000, 1, 0, 3]),
    (7, vec![100, 100, 100, 100, 100, 100, 100, 100]),
    (1, vec![3, 3]),
  ] {
    let allocated = lod_counts(limit, &counts).unwrap();
    assert_eq!(allocated.iter().sum::<usize>(), limit, "counts {counts:?}");
    assert_eq!(allocated.len(), counts.len());
  }
  assert_eq!(lod_counts(16, &[0, 0]).unwrap().as_slice(), &[0, 0]);
}

/// Allocation follows the share of each child.
#[test]
fn test_lod_counts_are_proportional() {
  let allocated = lod_counts(100, &[300, 100]).unwrap();
  assert_eq!(allocated.as_slice(), &[75, 25]);
}

#[test]
fn test_stride_indices_spread_evenly() {
  assert_eq!(stride_indices(10, 3), vec![0, 3, 6]);
  assert_eq!(stride_indices(5, 10), vec![0, 1, 2, 3, 4]);
  assert!(stride_indices(5, 0).is_empty());

  let picked = stride_indices(1000, 16);
  assert_eq!(picked.len(), 16);
  assert!(picked.windows(2).all(|w| w[1] - w[0] >= 62));
}

#[test]
fn test_generate_lod_decorates_every_node() {
  let storage = Storage::in_memory();
  let input = build_tree(&storage, &random_chunk(1_500, 3), Cell::new(0, 0, 0, 0), 64).unwrap();
  assert!(!input.is_leaf());

  let root = generate_lod(&storage, input.id, 64, &LodConfig::default()).unwrap();
  assert_ne!(root.id, input.id);
  assert_eq!(root.point_count_tree, input.point_count_tree);

  walk(&storage, &root, &mut |node| {
    node.validate_children(&storage).unwrap();
    let lod = node.lod.expect("lod stats");
    assert!(node.has_kd_tree());
    assert!(node.has_normals());
    assert_eq!(
      node.normals().unwrap().unwrap().len(),
      node.point_count_cell as usize
    );
    if node.is_leaf() {
      assert_eq!((lod.min_tree_depth, lod.max_tree_depth), (0, 0));
    } else {
      assert!(lod.min_tree_depth >= 1);
      assert!(lod.max_tree_depth >= lod.min_tree_depth);
      assert_eq!(node.point_count_cell, 64);
      assert_eq!(node.colors().unwrap().unwrap().len(), 64);
      assert!(lod.average_point_distance > 0.0);
    }
  });
}

/// The input tree stays readable and undecorated.
#[test]
fn test_fresh_ids_leave_input_untouched() {
  let storage = Storage::in_memory();
  let input = build_tree(&storage, &random_chunk(300, 5), Cell::new(0, 0, 0, 0), 32).unwrap();
  generate_lod(&storage, input.id, 32, &LodConfig::default()).unwrap();

  let reloaded = storage.require_node(input.id).unwrap();
  assert!(reloaded.lod.is_none());
  assert!(!reloaded.has_positions());
}

#[test]
fn test_keep_policy_rewrites_in_place() {
  let storage = Storage::in_memory();
  let input = build_tree(&storage, &random_chunk(300, 6), Cell::new(0, 0, 0, 0), 32).unwrap();
  let config = LodConfig::default().with_node_ids(NodeIdPolicy::Keep);

  let root = generate_lod(&storage, input.id, 32, &config).unwrap();
  assert_eq!(root.id, input.id);
  let reloaded = storage.require_node(input.id).unwrap();
  assert!(reloaded.lod.is_some());
  assert_eq!(reloaded.point_count_cell, 32);
}

#[test]
fn test_small_leaf_stats() {
  let storage = Storage::in_memory();
  let chunk = Chunk::new(vec![DVec3::new(0.25, 0.5, 0.5), DVec3::new(0.75, 0.5, 0.5)]);
  let leaf = build_tree(&storage, &chunk, Cell::new(0, 0, 0, 0), 8).unwrap();

  let lodded = generate_lod(&storage, leaf.id, 8, &LodConfig::default()).unwrap();
  let lod = lodded.lod.unwrap();
  assert_eq!(lod.centroid, glam::Vec3::ZERO);
  assert!((lod.dist_to_centroid_average - 0.25).abs() < 1e-6);
  assert!(lod.dist_to_centroid_std_dev.abs() < 1e-6);
  assert!((lod.average_point_distance - 0.5).abs() < 1e-6);
  // fewer than three neighbors
  assert_eq!(*lodded.normals().unwrap().unwrap(), vec![glam::Vec3::Z; 2]);
}

#[test]
fn test_progress_reaches_one() {
  let storage = Storage::in_memory();
  let input = build_tree(&storage, &random_chunk(400, 9), Cell::new(0, 0, 0, 0), 16).unwrap();
  let last = Arc::new(AtomicU64::new(0));
  let seen = Arc::clone(&last);
  let config = LodConfig::default().with_progress(move |p| {
    assert!((0.0..=1.0).contains(&p));
    seen.store(p.to_bits(), Ordering::SeqCst);
  });

  generate_lod(&storage, input.id, 16, &config).unwrap();
  assert_eq!(f64::from_bits(last.load(Ordering::SeqCst)), 1.0);
}

#[test]
fn test_cancelled_pass_fails_cleanly() {
  let storage = Storage::in_memory();
  let input = build_tree(&storage, &random_chunk(400, 11), Cell::new(0, 0, 0, 0), 16).unwrap();
  let token = CancellationToken::new();
  token.cancel();

  let err = generate_lod(&storage, input.id, 16, &LodConfig::default().with_token(token)).unwrap_err();
  assert!(err.is_cancelled());
  assert!(storage.require_node(input.id).unwrap().lod.is_none());
}

#[test]
fn test_missing_root_is_not_found() {
  let storage = Storage::in_memory();
  assert!(matches!(
    generate_lod(&storage, NodeId::new(), 16, &LodConfig::default()),
    Err(OctreeError::NotFound { .. })
  ));
}
