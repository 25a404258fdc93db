//! Octree construction and traversal benchmarks.
//!
//! - **build**: binning a batch into a persisted tree
//! - **lod**: decorating a built tree
//! - **merge**: union of two overlapping trees
//! - **query**: box and hull queries, exact and approximate counts

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::DVec3;
use point_octree::{
  builder::build_tree, count_points, count_points_approximately, generate_lod, merge_trees,
  query_points, Box3d, CancellationToken, Cell, Chunk, Filter, Hull3d, LodConfig, PointSetNode,
  Storage,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SPLIT_LIMIT: usize = 1024;

fn random_chunk(n: usize, seed: u64, offset: DVec3) -> Chunk {
  let mut rng = StdRng::seed_from_u64(seed);
  Chunk::new(
    (0..n)
      .map(|_| offset + DVec3::new(rng.random(), rng.random(), rng.random()) * 100.0)
      .collect(),
  )
}

fn built(storage: &Storage, chunk: &Chunk) -> Arc<PointSetNode> {
  let cell = Cell::from_box(&chunk.bounding_box()).expect("non-empty chunk");
  build_tree(storage, chunk, cell, SPLIT_LIMIT).expect("build")
}

// =============================================================================
// Construction
// =============================================================================

fn bench_build(c: &mut Criterion) {
  let mut group = c.benchmark_group("construction/build");
  group.sample_size(10);

  for &n in &[10_000usize, 100_000] {
    let chunk = random_chunk(n, 1, DVec3::ZERO);
    group.bench_with_input(BenchmarkId::from_parameter(n), &chunk, |b, chunk| {
      b.iter(|| {
        let storage = Storage::in_memory();
        black_box(built(&storage, chunk))
      })
    });
  }

  group.finish();
}

fn bench_lod(c: &mut Criterion) {
  let mut group = c.benchmark_group("construction/lod");
  group.sample_size(10);

  let chunk = random_chunk(50_000, 2, DVec3::ZERO);
  group.bench_function("50k", |b| {
    b.iter_with_setup(
      || {
        let storage = Storage::in_memory();
        let root = built(&storage, &chunk);
        (storage, root)
      },
      |(storage, root)| {
        black_box(generate_lod(&storage, root.id, SPLIT_LIMIT, &LodConfig::default()).expect("lod"))
      },
    )
  });

  group.finish();
}

fn bench_merge(c: &mut Criterion) {
  let mut group = c.benchmark_group("construction/merge");
  group.sample_size(10);

  let a = random_chunk(30_000, 3, DVec3::ZERO);
  let b_chunk = random_chunk(30_000, 4, DVec3::splat(50.0));
  let token = CancellationToken::new();
  group.bench_function("overlapping_30k_30k", |b| {
    b.iter_with_setup(
      || {
        let storage = Storage::in_memory();
        let ra = built(&storage, &a);
        let rb = built(&storage, &b_chunk);
        (storage, ra, rb)
      },
      |(storage, ra, rb)| black_box(merge_trees(&storage, &ra, &rb, SPLIT_LIMIT, &token).expect("merge")),
    )
  });

  group.finish();
}

// =============================================================================
// Traversal
// =============================================================================

fn bench_queries(c: &mut Criterion) {
  let mut group = c.benchmark_group("traversal/query");

  let storage = Storage::in_memory();
  let root = built(&storage, &random_chunk(200_000, 5, DVec3::ZERO));
  let query = Box3d::new(DVec3::splat(20.0), DVec3::splat(60.0));
  let boxed = Filter::InsideBox3d(query);
  let hull = Filter::InsideConvexHull(Hull3d::from_box(&query));

  group.bench_function("points_inside_box", |b| {
    b.iter(|| {
      let n: usize = query_points(&storage, Arc::clone(&root), boxed.clone(), None)
        .map(|c| c.map(|c| c.len()).unwrap_or(0))
        .sum();
      black_box(n)
    })
  });
  group.bench_function("count_inside_hull", |b| {
    b.iter(|| black_box(count_points(&storage, &root, &hull, None).expect("count")))
  });
  group.bench_function("count_inside_hull_approximately", |b| {
    b.iter(|| black_box(count_points_approximately(&storage, &root, &hull, None).expect("count")))
  });

  group.finish();
}

criterion_group!(construction, bench_build, bench_lod, bench_merge);
criterion_group!(traversal, bench_queries);
criterion_main!(construction, traversal);
