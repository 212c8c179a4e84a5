//! Spatial sort trees for near-neighbor search over 3D point sets.
//!
//! Items are brought into the order of a coordinate-interleaved spatial
//! hash and a shallow tree is carved out of the sorted range. Two
//! engines share this substrate: an 8-way hashed octree driven by a
//! 30-bit Morton key and a 256-way wide tree driven by an 8-bit cell
//! key and counting sort. Both answer radius-bounded neighborhood
//! queries under the L-infinity metric, the workhorse of vertex
//! deduplication over large meshes.

pub mod constants;
pub mod helpers;
pub mod morton;
pub mod octree;
pub mod parallel;
pub mod sort;
pub mod tree;
pub mod types;
pub mod widetree;

#[cfg(test)]
pub(crate) mod testing;

pub use octree::HashedOctree;
pub use parallel::{HashedOctreeParallel, WideTreeParallel};
pub use tree::{SpatialSortTree, VertexVisitor};
pub use types::{BoundingBox, Item, Point};
pub use widetree::WideTree;
