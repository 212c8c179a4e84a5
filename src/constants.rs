//! Crate wide constants.

use crate::types::KeyType;

/// Number of fine hash bits per coordinate axis.
pub const BITS_PER_DIM: u32 = 10;

/// Number of fine hash buckets along each axis.
pub const NUM_LEAF_BUCKETS: KeyType = 1 << BITS_PER_DIM;

/// Deepest level of the hashed octree. The root is level 0.
pub const MAX_TREE_DEPTH: u32 = BITS_PER_DIM;

/// Octree nodes with more items than this are subdivided.
pub const MAX_LEAF_ITEMS: usize = 32;

/// Default leaf capacity of the wide tree.
pub const WIDE_MAX_LEAF_ITEMS: usize = 256;

/// Block length used by the data-parallel build and query paths.
pub const PARALLEL_GRAIN_SIZE: usize = 1 << 10;
