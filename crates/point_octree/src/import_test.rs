use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;

fn random_chunks(count: usize, per_chunk: usize, seed: u64) -> Vec<Chunk> {
  let mut rng = StdRng::seed_from_u64(seed);
  (0..count)
    .map(|_| {
      Chunk::new(
        (0..per_chunk)
          .map(|_| DVec3::new(rng.random(), rng.random(), rng.random()) * 10.0)
          .collect(),
      )
    })
    .collect()
}

fn small_config() -> ImportConfig {
  ImportConfig {
    key: Some("scan.json".into()),
    split_limit: 64,
    max_chunk_point_count: 500,
    ..Default::default()
  }
}

#[test]
fn test_merge_small_concatenates_until_limit() {
  let sizes = |chunks: &[Chunk]| chunks.iter().map(Chunk::len).collect::<Vec<_>>();
  let chunks: Vec<Chunk> = [3, 4, 10, 2, 0, 1]
    .iter()
    .enumerate()
    .map(|(i, &n)| Chunk::new(vec![DVec3::splat(i as f64); n]))
    .collect();

  // 3+4 reaches 7, 10 passes through, 2+1 is left over
  assert_eq!(sizes(&merge_small(6, chunks)), vec![7, 10, 3]);
  assert!(merge_small(6, Vec::new()).is_empty());
}

#[test]
fn test_import_builds_and_persists() {
  let storage = Storage::in_memory();
  let chunks = random_chunks(5, 300, 1);
  let ps = import_chunks(&storage, chunks, &small_config()).unwrap();

  assert_eq!(ps.id, "scan.json");
  assert_eq!(ps.split_limit, 64);
  assert_eq!(ps.point_count(&storage).unwrap(), 1_500);
  let stored = storage.get_point_set("scan.json").unwrap().unwrap();
  assert_eq!(*stored, *ps);

  let root = ps.root(&storage).unwrap().unwrap();
  assert!(root.has_positions());
  assert!(root.has_normals());
}

#[test]
fn test_import_without_points_gives_empty_set() {
  let storage = Storage::in_memory();
  let config = ImportConfig::default();
  let ps = import_chunks(&storage, vec![Chunk::empty()], &config).unwrap();
  assert!(ps.is_empty());
  assert!(storage.get_point_set(&ps.id).unwrap().is_some());
}

#[test]
fn test_duplicates_are_removed() {
  let storage = Storage::in_memory();
  let chunk = Chunk::new(vec![DVec3::ONE, DVec3::ONE, DVec3::splat(2.0), DVec3::ONE]);
  let config = ImportConfig {
    generate_lod: false,
    ..small_config()
  };
  let ps = import_chunks(&storage, vec![chunk], &config).unwrap();
  assert_eq!(ps.point_count(&storage).unwrap(), 2);
}

#[test]
fn test_min_dist_thins_points() {
  let storage = Storage::in_memory();
  let line: Vec<DVec3> = (0..100).map(|i| DVec3::new(i as f64 * 0.1, 0.0, 0.0)).collect();

  let sequential = ImportConfig {
    min_dist: 0.5,
    ..small_config()
  };
  let ps = import_chunks(&storage, vec![Chunk::new(line.clone())], &sequential).unwrap();
  let n = ps.point_count(&storage).unwrap();
  assert!((16..=20).contains(&n), "{n}");

  let global = ImportConfig {
    key: Some("grid.json".into()),
    min_dist: 1.0,
    normalize_point_density_global: true,
    ..small_config()
  };
  let ps = import_chunks(&storage, vec![Chunk::new(line)], &global).unwrap();
  assert_eq!(ps.point_count(&storage).unwrap(), 10);
}

#[test]
fn test_reprojection_moves_points() {
  let storage = Storage::in_memory();
  let config = ImportConfig {
    max_degree_of_parallelism: 2,
    ..small_config()
  }
  .with_reproject(|p| p + DVec3::new(1000.0, 0.0, 0.0));
  let ps = import_chunks(&storage, random_chunks(3, 200, 2), &config).unwrap();

  let bounds = ps.bounds(&storage).unwrap();
  assert!(bounds.min.x >= 999.99);
  assert!(bounds.max.x <= 1010.01);
}

#[test]
fn test_progress_spans_zero_to_one() {
  let storage = Storage::in_memory();
  let seen = Arc::new(Mutex::new(Vec::new()));
  let sink = Arc::clone(&seen);
  let config = small_config().with_progress(move |p| sink.lock().unwrap().push(p));
  import_chunks(&storage, random_chunks(4, 300, 3), &config).unwrap();

  let seen = seen.lock().unwrap();
  assert_eq!(seen.first().copied(), Some(0.0));
  assert_eq!(seen.last().copied(), Some(1.0));
  assert!(seen.iter().all(|p| (0.0..=1.0).contains(p)));
}

#[test]
fn test_cancelled_import_fails() {
  let storage = Storage::in_memory();
  let token = CancellationToken::new();
  token.cancel();
  let config = small_config().with_token(token);
  let err = import_chunks(&storage, random_chunks(2, 10, 4), &config).unwrap_err();
  assert!(err.is_cancelled());
  assert!(storage.get_point_set("scan.json").unwrap().is_none());
}

#[test]
fn test_config_deserializes_with_defaults() {
  let config: ImportConfig =
    serde_json::from_str(r#"{"split_limit": 100, "min_dist": 0.25}"#).unwrap();
  assert_eq!(config.split_limit, 100);
  assert_eq!(config.min_dist, 0.25);
  assert_eq!(config.max_chunk_point_count, 1_048_576);
  assert!(config.generate_lod);

  let bad = ImportConfig {
    split_limit: 0,
    ..Default::default()
  };
  assert!(matches!(
    import_chunks(&Storage::in_memory(), Vec::new(), &bad),
    Err(OctreeError::Config(_))
  ));
}
