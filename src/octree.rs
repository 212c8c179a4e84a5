//! The hashed octree spatial sort engine.
//!
//! Items are hashed with the 30-bit fine key, brought into key order,
//! and an 8-way tree is carved out of the sorted range. Nodes never
//! own items; they hold index ranges into the tree's contiguous key
//! and item buffers, so building a node costs eight binary searches
//! and no data movement.

use std::mem;

use tracing::debug;

use crate::constants::{MAX_LEAF_ITEMS, MAX_TREE_DEPTH};
use crate::helpers::{distance_from_boundary, l_infinity, l_infinity_box};
use crate::morton::{compute_hash, compute_item_keys, NodeKey};
use crate::sort::{apply_permutation, sort_permutation};
use crate::tree::{SpatialSortTree, VertexVisitor};
use crate::types::{BoundingBox, Item, KeyType, Point};

/// An 8-way spatial sort tree over Morton-hashed items.
pub struct HashedOctree {
    bbox: BoundingBox,
    items: Vec<Item>,
    keys: Vec<KeyType>,
    root: Option<Box<OctreeNode>>,
}

struct OctreeNode {
    key: NodeKey,
    bbox: BoundingBox,
    children: [Option<Box<OctreeNode>>; 8],
    begin: usize,
    end: usize,
}

impl HashedOctree {
    /// Create an empty tree over `bbox`.
    pub fn new(bbox: BoundingBox) -> HashedOctree {
        HashedOctree {
            bbox,
            items: Vec::new(),
            keys: Vec::new(),
            root: None,
        }
    }

    /// Replace the tree contents with `items`.
    ///
    /// The previous contents are discarded; an empty slice resets the
    /// tree to empty.
    // TODO: Merge with the existing contents instead of replacing them.
    pub fn insert_items(&mut self, items: &[Item]) {
        let keys = compute_item_keys(&self.bbox, items);
        let permutation = sort_permutation(&keys);
        let keys = apply_permutation(&permutation, &keys);
        let items = apply_permutation(&permutation, items);
        self.rebuild_from_sorted(keys, items);
    }

    /// Install already hash-sorted buffers and rebuild the node tree.
    pub(crate) fn rebuild_from_sorted(&mut self, keys: Vec<KeyType>, items: Vec<Item>) {
        debug_assert_eq!(keys.len(), items.len());
        self.keys = keys;
        self.items = items;
        self.rebuild_nodes();
        debug!(
            num_items = self.items.len(),
            num_nodes = self.num_nodes(),
            depth = self.depth(),
            "rebuilt hashed octree"
        );
    }

    fn rebuild_nodes(&mut self) {
        if self.keys.is_empty() {
            self.root = None;
            return;
        }
        self.root = Some(OctreeNode::build(
            NodeKey::root(),
            self.bbox,
            &self.keys,
            0,
            self.keys.len(),
        ));
    }

    /// Visit every item within L-infinity distance `eps` of `position`.
    ///
    /// Returns `true` if the traversal ran to completion and `false`
    /// if the visitor stopped it. Positions farther than `eps` from
    /// the tree's bounding box produce no visits.
    pub fn visit_near_vertices(
        &self,
        visitor: &mut dyn VertexVisitor,
        position: Point,
        eps: f64,
    ) -> bool {
        if let Some(root) = &self.root {
            if l_infinity_box(&self.bbox, &position) < eps {
                let visitor_key = compute_hash(&self.bbox, &position);
                return root.visit_near_vertices(visitor, &self.items, visitor_key, &position, eps);
            }
        }
        true
    }

    /// The items in fine-key order.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// The box the tree hashes against.
    pub fn bounding_box(&self) -> BoundingBox {
        self.bbox
    }

    /// Number of nodes in the tree.
    pub fn num_nodes(&self) -> usize {
        self.root.as_ref().map_or(0, |root| root.num_nodes())
    }

    /// Number of levels in the tree; a lone root counts as one.
    pub fn depth(&self) -> usize {
        self.root.as_ref().map_or(0, |root| root.depth())
    }

    /// Total size of the tree and its buffers in bytes.
    pub fn size(&self) -> usize {
        let mut size = mem::size_of::<Self>();
        size += self.items.len() * mem::size_of::<Item>();
        size += self.keys.len() * mem::size_of::<KeyType>();
        if let Some(root) = &self.root {
            size += root.size();
        }
        size
    }

    /// Print every node key with its item count, one node per line.
    pub fn print_num_items(&self) {
        if let Some(root) = &self.root {
            root.print_num_items(0);
        }
    }
}

impl SpatialSortTree for HashedOctree {
    fn insert_items(&mut self, items: &[Item]) {
        HashedOctree::insert_items(self, items)
    }

    fn visit_near_vertices(
        &self,
        visitor: &mut dyn VertexVisitor,
        position: Point,
        eps: f64,
    ) -> bool {
        HashedOctree::visit_near_vertices(self, visitor, position, eps)
    }

    fn items(&self) -> &[Item] {
        HashedOctree::items(self)
    }
}

impl OctreeNode {
    fn build(
        key: NodeKey,
        bbox: BoundingBox,
        keys: &[KeyType],
        begin: usize,
        end: usize,
    ) -> Box<OctreeNode> {
        let mut node = Box::new(OctreeNode {
            key,
            bbox,
            children: Default::default(),
            begin,
            end,
        });
        if key.level() < MAX_TREE_DEPTH && end - begin > MAX_LEAF_ITEMS {
            let child_keys = key.children();
            let partition = compute_partition_offsets(keys, begin, end, &child_keys);
            for octant in 0..8 {
                if partition[octant + 1] > partition[octant] {
                    node.children[octant] = Some(OctreeNode::build(
                        child_keys[octant],
                        bbox.octant_box(octant),
                        keys,
                        partition[octant],
                        partition[octant + 1],
                    ));
                }
            }
        }
        node
    }

    fn visit_near_vertices(
        &self,
        visitor: &mut dyn VertexVisitor,
        items: &[Item],
        visitor_key: KeyType,
        position: &Point,
        eps: f64,
    ) -> bool {
        let level = self.key.level();
        if level < MAX_TREE_DEPTH {
            let shift = 3 * (MAX_TREE_DEPTH - level - 1);
            let visitor_octant = ((visitor_key >> shift) & 0x7) as usize;
            if let Some(child) = &self.children[visitor_octant] {
                // Most common case: the query point is comfortably
                // interior to the child that owns its key. The octant
                // bits are only meaningful for nodes that contain the
                // query point, hence the containment check.
                if child.bbox.contains(position)
                    && distance_from_boundary(&child.bbox, position) > eps
                {
                    return child.visit_near_vertices(visitor, items, visitor_key, position, eps);
                }
            }
        }
        // Either a leaf or a query near a child boundary.
        let mut leaf = true;
        for child in self.children.iter().flatten() {
            leaf = false;
            if l_infinity_box(&child.bbox, position) < eps {
                if !child.visit_near_vertices(visitor, items, visitor_key, position, eps) {
                    return false;
                }
            }
        }
        if !leaf {
            return true;
        }
        for item in &items[self.begin..self.end] {
            if l_infinity(&item.position, position) < eps {
                if !visitor.visit(item) {
                    return false;
                }
            }
        }
        true
    }

    fn num_items(&self) -> usize {
        self.end - self.begin
    }

    fn num_nodes(&self) -> usize {
        1 + self
            .children
            .iter()
            .flatten()
            .map(|child| child.num_nodes())
            .sum::<usize>()
    }

    fn depth(&self) -> usize {
        1 + self
            .children
            .iter()
            .flatten()
            .map(|child| child.depth())
            .max()
            .unwrap_or(0)
    }

    fn size(&self) -> usize {
        mem::size_of::<Self>()
            + self
                .children
                .iter()
                .flatten()
                .map(|child| child.size())
                .sum::<usize>()
    }

    fn print_num_items(&self, indent: usize) {
        println!("{} {} {}", self.key, ".".repeat(indent), self.num_items());
        for child in self.children.iter().flatten() {
            child.print_num_items(indent + 1);
        }
    }
}

/// Split a sorted key range among the eight children of a node.
///
/// Returns nine offsets; child `octant` covers
/// `offsets[octant]..offsets[octant + 1]`. The offsets are located by
/// binary search in a logarithmic cascade that halves the candidate
/// range at every step: the midpoint by the z bit, the quarter points
/// by the y bit and the eighth points by the x bit.
fn compute_partition_offsets(
    keys: &[KeyType],
    begin: usize,
    end: usize,
    child_keys: &[NodeKey; 8],
) -> [usize; 9] {
    let mut offsets = [0usize; 9];
    offsets[0] = begin;
    offsets[8] = end;
    for &(octant, lo, hi) in &[
        (4usize, 0usize, 8usize),
        (2, 0, 4),
        (6, 4, 8),
        (1, 0, 2),
        (3, 2, 4),
        (5, 4, 6),
        (7, 6, 8),
    ] {
        offsets[octant] = lower_bound(
            keys,
            offsets[lo],
            offsets[hi],
            child_keys[octant].range_begin(),
        );
    }
    offsets
}

/// Index of the first key in `keys[lo..hi]` that is not below `target`.
fn lower_bound(keys: &[KeyType], lo: usize, hi: usize, target: KeyType) -> usize {
    lo + keys[lo..hi].partition_point(|&key| key < target)
}
