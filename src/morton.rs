//! Routines for the fine spatial hash and level-encoded node keys.
//!
//! A point is hashed by bucketing each coordinate into 2^10 bins and
//! interleaving the three bucket indices into a 30-bit Morton key.
//! Points that share a key prefix share octree ancestry, so a sorted
//! key vector can be split among subtrees by binary search alone.

use std::fmt;

use rayon::prelude::*;

use crate::constants::{BITS_PER_DIM, MAX_TREE_DEPTH, NUM_LEAF_BUCKETS, PARALLEL_GRAIN_SIZE};
use crate::types::{BoundingBox, Item, KeyType, Point, PointType};

/// Map a coordinate to an integer bucket in `[0, num_buckets)`.
///
/// Coordinates outside `[min, max)` wrap around periodically, so the
/// function is total for every finite input. The domain must be
/// non-degenerate.
pub fn compute_bucket(
    min: PointType,
    max: PointType,
    pos: PointType,
    num_buckets: KeyType,
) -> KeyType {
    assert!(max > min, "degenerate hash domain");
    let width = max - min;
    let mut folded = (pos - min) % width;
    if folded < 0.0 {
        folded += width;
    }
    let bucket = (num_buckets as PointType * folded / width) as KeyType;
    bucket.min(num_buckets - 1)
}

/// Spread the low 10 bits of `a` so that bit i lands at position 3i.
fn part_1_by_2(mut a: KeyType) -> KeyType {
    a &= 0x0000_03ff; // a = ---- ---- ---- ---- ---- --98 7654 3210
    a = (a ^ (a << 16)) & 0xff00_00ff; // a = ---- --98 ---- ---- ---- ---- 7654 3210
    a = (a ^ (a << 8)) & 0x0300_f00f; // a = ---- --98 ---- ---- 7654 ---- ---- 3210
    a = (a ^ (a << 4)) & 0x030c_30c3; // a = ---- --98 ---- 76-- --54 ---- 32-- --10
    a = (a ^ (a << 2)) & 0x0924_9249; // a = ---- 9--8 --7- -6-- 5--4 --3- -2-- 1--0
    a
}

/// Interleave three 10-bit bucket indices into a 30-bit Morton key.
fn morton_encode(a: KeyType, b: KeyType, c: KeyType) -> KeyType {
    part_1_by_2(a) | (part_1_by_2(b) << 1) | (part_1_by_2(c) << 2)
}

/// Compute the 30-bit fine key of a point within a bounding box.
pub fn compute_hash(bbox: &BoundingBox, point: &Point) -> KeyType {
    let a = compute_bucket(
        bbox.min.coord[0],
        bbox.max.coord[0],
        point.coord[0],
        NUM_LEAF_BUCKETS,
    );
    let b = compute_bucket(
        bbox.min.coord[1],
        bbox.max.coord[1],
        point.coord[1],
        NUM_LEAF_BUCKETS,
    );
    let c = compute_bucket(
        bbox.min.coord[2],
        bbox.max.coord[2],
        point.coord[2],
        NUM_LEAF_BUCKETS,
    );
    morton_encode(a, b, c)
}

/// Compute fine keys for a whole item slice.
pub fn compute_item_keys(bbox: &BoundingBox, items: &[Item]) -> Vec<KeyType> {
    items
        .iter()
        .map(|item| compute_hash(bbox, &item.position))
        .collect()
}

/// Compute fine keys for a whole item slice in parallel blocks.
pub fn par_compute_item_keys(bbox: &BoundingBox, items: &[Item]) -> Vec<KeyType> {
    items
        .par_iter()
        .with_min_len(PARALLEL_GRAIN_SIZE)
        .map(|item| compute_hash(bbox, &item.position))
        .collect()
}

/// Level-encoded key of a node in the implicit 8-way hierarchy.
///
/// The leading 1-bit encodes the level: the root has key `1` (level 0)
/// and the children of a node with key `k` are `8k .. 8k + 8`. Each
/// node covers a contiguous half-open range of fine keys, so a sorted
/// key vector can be partitioned among the children of any node with
/// `range_begin` lookups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey(pub KeyType);

impl NodeKey {
    /// The root node, covering the whole fine-key domain.
    pub fn root() -> NodeKey {
        NodeKey(1)
    }

    /// Keys of the eight children, in octant order.
    pub fn children(self) -> [NodeKey; 8] {
        let first = self.0 << 3;
        std::array::from_fn(|octant| NodeKey(first + octant as KeyType))
    }

    /// Level of the node. The root is level 0.
    pub fn level(self) -> u32 {
        debug_assert!(self.0 != 0);
        (31 - self.0.leading_zeros()) / 3
    }

    /// Key of the parent node.
    pub fn parent(self) -> NodeKey {
        NodeKey(self.0 >> 3)
    }

    /// First fine key covered by the node.
    pub fn range_begin(self) -> KeyType {
        let level = self.level();
        let begin = self.0 ^ (1 << (3 * level));
        begin << (3 * (MAX_TREE_DEPTH - level))
    }

    /// One past the last fine key covered by the node.
    pub fn range_end(self) -> KeyType {
        let level = self.level();
        let end = (self.0 ^ (1 << (3 * level))) + 1;
        end << (3 * (MAX_TREE_DEPTH - level))
    }

    /// Whether this is a well-formed level-encoded node key.
    ///
    /// The key must be nonzero and its leading 1-bit must sit on a
    /// multiple-of-3 position no higher than bit 30.
    pub fn is_valid(self) -> bool {
        if self.0 == 0 {
            return false;
        }
        let leading = 31 - self.0.leading_zeros();
        leading <= 3 * BITS_PER_DIM && leading % 3 == 0
    }

    /// Octant of this node within its parent.
    pub fn octant(self) -> usize {
        (self.0 & 0x7) as usize
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:032b}", self.0)
    }
}
