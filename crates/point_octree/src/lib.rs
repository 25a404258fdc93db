//! point_octree - out-of-core point cloud octrees
//!
//! Point clouds are stored as immutable octree nodes in a key-value blob
//! store. Nodes address each other by id and are loaded on demand through a
//! shared byte-budget cache, so trees far larger than memory can be built,
//! merged and queried.
//!
//! # Features
//!
//! - **Builder**: bins a point batch into an octree rooted at an aligned
//!   power-of-two cell, splitting leaves above a split limit
//! - **LOD**: decorates inner nodes with subsampled points, kd-trees, normals
//!   and centroid/distance statistics
//! - **Merge**: unions two trees, reusing untouched subtrees by id
//! - **Queries**: pruned traversal under box, hull, sphere and intensity
//!   filters, with exact and approximate counts
//! - **Import**: chunk ingestion pipeline with dedup, thinning and
//!   reprojection on a bounded worker pool
//!
//! # Example
//!
//! ```ignore
//! use point_octree::{Chunk, ImportConfig, Storage, import_chunks};
//!
//! let storage = Storage::open_directory("store", point_octree::DEFAULT_CACHE_BYTES)?;
//! let config = ImportConfig { key: Some("scan.json".into()), ..Default::default() };
//! let set = import_chunks(&storage, batches, &config)?;
//!
//! let inside = set.query_points_inside_box(&storage, query_box, None)?;
//! for chunk in inside {
//!     println!("{} points", chunk?.len());
//! }
//! ```

pub mod cell;
pub mod chunk;
pub mod color;
pub mod error;
pub mod geometry;
pub mod ids;
pub mod knn;
pub mod normals;

// Persistence
pub mod node;
pub mod storage;

// Tree construction and transformation
pub mod builder;
pub mod lod;
pub mod merge;

// Filters and traversal
pub mod filter;
pub mod query;

// Point set handle and ingestion
pub mod import;
pub mod pointset;

pub mod stats;
pub mod threading;

pub use cell::Cell;
pub use chunk::Chunk;
pub use color::C4b;
pub use error::{OctreeError, Result};
pub use filter::{Classification, Filter, FilteredNode};
pub use geometry::{Box3d, Box3f, Hull3d, Plane3d, Sphere3d};
pub use ids::NodeId;
pub use import::{import_chunks, ImportConfig};
pub use lod::{generate_lod, LodConfig, NodeIdPolicy};
pub use merge::merge_trees;
pub use node::PointSetNode;
pub use pointset::PointSet;
pub use query::{count_points, count_points_approximately, query_points, QueryPoints};
pub use stats::TreeStats;
pub use storage::{BlobStore, DirectoryBlobStore, MemoryBlobStore, Storage, DEFAULT_CACHE_BYTES};
pub use threading::{CancellationToken, WorkerPool};
