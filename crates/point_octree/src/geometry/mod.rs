//! Geometry primitives consumed by the octree: boxes, convex hulls and
//! spheres over glam vectors.

pub mod bounds;
pub mod hull;
pub mod sphere;

pub use bounds::{Box3d, Box3f};
pub use hull::{Hull3d, Plane3d};
pub use sphere::Sphere3d;
