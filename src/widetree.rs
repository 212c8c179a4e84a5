//! The wide spatial sort tree.
//!
//! A 256-way sibling of the hashed octree. Every level hashes its item
//! range with an 8-bit cell key that partitions the node's box into
//! 8 x 8 x 4 cells, sorts the range with a counting sort, and recurses
//! into the non-empty cells. The shallow, wide fan-out trades pointer
//! chasing for a little extra hashing work per level.

use std::mem;

use rayon::prelude::*;
use tracing::debug;

use crate::constants::{PARALLEL_GRAIN_SIZE, WIDE_MAX_LEAF_ITEMS};
use crate::helpers::{distance_from_boundary, l_infinity, l_infinity_box};
use crate::sort::{apply_permutation, counting_sort, par_apply_permutation};
use crate::tree::{SpatialSortTree, VertexVisitor};
use crate::types::{BoundingBox, Item, Point, PointType, WideKeyType};

/// Per-axis scale of a box at the wide tree's (8, 8, 4) split.
///
/// Bucket indices are computed from precomputed reciprocal bucket
/// widths so that hashing a batch of points is exactly equivalent to
/// hashing them one by one.
#[derive(Clone, Copy)]
struct WideScale {
    min: [PointType; 3],
    width: [PointType; 3],
    recip: [PointType; 3],
}

const WIDE_BUCKETS: [PointType; 3] = [8.0, 8.0, 4.0];
const WIDE_LIMITS: [u32; 3] = [7, 7, 3];
const WIDE_SHIFTS: [u32; 3] = [5, 2, 0];

impl WideScale {
    fn new(bbox: &BoundingBox) -> WideScale {
        let width = [bbox.width(0), bbox.width(1), bbox.width(2)];
        assert!(
            width.iter().all(|&w| w > 0.0),
            "degenerate hash domain"
        );
        WideScale {
            min: bbox.min.coord,
            width,
            recip: [
                WIDE_BUCKETS[0] / width[0],
                WIDE_BUCKETS[1] / width[1],
                WIDE_BUCKETS[2] / width[2],
            ],
        }
    }

    fn key(&self, point: &Point) -> WideKeyType {
        let mut key = 0u32;
        for axis in 0..3 {
            let mut folded = (point.coord[axis] - self.min[axis]) % self.width[axis];
            if folded < 0.0 {
                folded += self.width[axis];
            }
            let bucket = ((folded * self.recip[axis]) as u32).min(WIDE_LIMITS[axis]);
            key |= bucket << WIDE_SHIFTS[axis];
        }
        key as WideKeyType
    }
}

/// Compute the 8-bit wide key of a point at the scale of `bbox`.
pub fn compute_wide_key(bbox: &BoundingBox, point: &Point) -> WideKeyType {
    WideScale::new(bbox).key(point)
}

/// Compute wide keys for a whole item slice.
pub fn compute_wide_keys(bbox: &BoundingBox, items: &[Item]) -> Vec<WideKeyType> {
    let scale = WideScale::new(bbox);
    items.iter().map(|item| scale.key(&item.position)).collect()
}

/// Compute wide keys for a whole item slice in parallel blocks.
pub fn par_compute_wide_keys(bbox: &BoundingBox, items: &[Item]) -> Vec<WideKeyType> {
    let scale = WideScale::new(bbox);
    items
        .par_iter()
        .with_min_len(PARALLEL_GRAIN_SIZE)
        .map(|item| scale.key(&item.position))
        .collect()
}

/// A 256-way spatial sort tree built by per-level counting sort.
pub struct WideTree {
    bbox: BoundingBox,
    items: Vec<Item>,
    root: Option<Box<WideNode>>,
    max_leaf_items: usize,
}

struct WideNode {
    bbox: BoundingBox,
    children: [Option<Box<WideNode>>; 256],
    begin: usize,
    end: usize,
    /// Entry `i` is the offset of the first item with wide key `>= i`,
    /// relative to `begin`. All zero in leaves.
    partition: [usize; 257],
}

impl WideTree {
    /// Create an empty tree over `bbox` with the default leaf capacity.
    pub fn new(bbox: BoundingBox) -> WideTree {
        WideTree {
            bbox,
            items: Vec::new(),
            root: None,
            max_leaf_items: WIDE_MAX_LEAF_ITEMS,
        }
    }

    /// Override the leaf capacity used by subsequent inserts.
    pub fn set_max_num_leaf_items(&mut self, max_leaf_items: usize) {
        self.max_leaf_items = max_leaf_items.max(1);
    }

    /// Replace the tree contents with `items`.
    ///
    /// The previous contents are discarded; an empty slice resets the
    /// tree to empty.
    pub fn insert_items(&mut self, items: &[Item]) {
        self.rebuild(items, false);
    }

    pub(crate) fn rebuild(&mut self, items: &[Item], parallel: bool) {
        self.items = items.to_vec();
        if self.items.is_empty() {
            self.root = None;
            return;
        }
        let bbox = self.bbox;
        let max_leaf_items = self.max_leaf_items;
        self.root = Some(WideNode::build(
            bbox,
            &mut self.items,
            0,
            max_leaf_items,
            parallel,
        ));
        debug!(
            num_items = self.items.len(),
            num_nodes = self.num_nodes(),
            depth = self.depth(),
            "rebuilt wide tree"
        );
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
                return root.visit_near_vertices(visitor, &self.items, &position, eps);
            }
        }
        true
    }

    /// The items in hash order.
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
        if let Some(root) = &self.root {
            size += root.size();
        }
        size
    }

    /// Print every node's item count, one node per line.
    pub fn print_num_items(&self) {
        if let Some(root) = &self.root {
            root.print_num_items(0);
        }
    }
}

impl SpatialSortTree for WideTree {
    fn insert_items(&mut self, items: &[Item]) {
        WideTree::insert_items(self, items)
    }

    fn visit_near_vertices(
        &self,
        visitor: &mut dyn VertexVisitor,
        position: Point,
        eps: f64,
    ) -> bool {
        WideTree::visit_near_vertices(self, visitor, position, eps)
    }

    fn items(&self) -> &[Item] {
        WideTree::items(self)
    }
}

impl WideNode {
    /// Build a node over `items`, reordering the slice in place.
    ///
    /// `offset` is the slice's position within the tree's item buffer.
    fn build(
        bbox: BoundingBox,
        items: &mut [Item],
        offset: usize,
        max_leaf_items: usize,
        parallel: bool,
    ) -> Box<WideNode> {
        const NO_CHILD: Option<Box<WideNode>> = None;
        let mut node = Box::new(WideNode {
            bbox,
            children: [NO_CHILD; 256],
            begin: offset,
            end: offset + items.len(),
            partition: [0; 257],
        });
        if items.len() <= max_leaf_items {
            return node;
        }

        let use_blocks = parallel && items.len() >= PARALLEL_GRAIN_SIZE;
        let keys = if use_blocks {
            par_compute_wide_keys(&bbox, items)
        } else {
            compute_wide_keys(&bbox, items)
        };
        if keys.iter().all(|&key| key == keys[0]) {
            // Coincident positions share a cell at every scale and can
            // never be separated by further subdivision.
            return node;
        }

        let (permutation, partition) = counting_sort(&keys);
        let sorted = if use_blocks {
            par_apply_permutation(&permutation, items)
        } else {
            apply_permutation(&permutation, items)
        };
        items.copy_from_slice(&sorted);
        node.partition = partition;

        let mut rest = items;
        for cell in 0..256 {
            let len = partition[cell + 1] - partition[cell];
            let (chunk, tail) = rest.split_at_mut(len);
            rest = tail;
            if len > 0 {
                node.children[cell] = Some(WideNode::build(
                    bbox.cell_box(cell),
                    chunk,
                    offset + partition[cell],
                    max_leaf_items,
                    parallel,
                ));
            }
        }
        node
    }

    fn visit_near_vertices(
        &self,
        visitor: &mut dyn VertexVisitor,
        items: &[Item],
        position: &Point,
        eps: f64,
    ) -> bool {
        let visitor_cell = compute_wide_key(&self.bbox, position) as usize;
        if let Some(child) = &self.children[visitor_cell] {
            // Most common case: the query point is comfortably interior
            // to the cell that owns its key. The wrapped cell index is
            // only meaningful for nodes that contain the query point,
            // hence the containment check.
            if child.bbox.contains(position)
                && distance_from_boundary(&child.bbox, position) > eps
            {
                return child.visit_near_vertices(visitor, items, position, eps);
            }
        }
        // Either a leaf or a query near a cell boundary.
        let mut leaf = true;
        for child in self.children.iter().flatten() {
            leaf = false;
            if l_infinity_box(&child.bbox, position) < eps {
                if !child.visit_near_vertices(visitor, items, position, eps) {
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
        println!("{} {}", ".".repeat(indent), self.num_items());
        for child in self.children.iter().flatten() {
            child.print_num_items(indent + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{build_items, entities_at_random_locations, unit_cube};

    #[test]
    fn test_wide_key_at_the_center() {
        let key = compute_wide_key(&unit_cube(), &Point::new(0.5, 0.5, 0.5));
        assert_eq!((4 << 5) | (4 << 2) | 2, key);
    }

    #[test]
    fn test_wide_key_fields_are_packed_high_to_low() {
        let bbox = unit_cube();
        assert_eq!(0, compute_wide_key(&bbox, &Point::new(0.0, 0.0, 0.0)));
        assert_eq!(1 << 5, compute_wide_key(&bbox, &Point::new(0.2, 0.0, 0.0)));
        assert_eq!(1 << 2, compute_wide_key(&bbox, &Point::new(0.0, 0.2, 0.0)));
        assert_eq!(1, compute_wide_key(&bbox, &Point::new(0.0, 0.0, 0.3)));
    }

    #[test]
    fn test_wide_key_works_for_out_of_bounds_coords() {
        let key = compute_wide_key(&unit_cube(), &Point::new(-0.5, 10.5, 0.5));
        assert_eq!(key, compute_wide_key(&unit_cube(), &Point::new(0.5, 0.5, 0.5)));
    }

    #[test]
    fn test_batched_wide_keys_match_the_scalar_form() {
        let bbox = unit_cube();
        let mut entities = entities_at_random_locations(bbox, 1000, 101);
        // Include out-of-box positions.
        entities[0].position = Point::new(-0.5, 1.5, 7.25);
        entities[1].position = Point::new(1.0, -1.0, 0.0);
        let items = build_items(&entities);

        let batched = compute_wide_keys(&bbox, &items);
        for (item, &key) in items.iter().zip(batched.iter()) {
            assert_eq!(compute_wide_key(&bbox, &item.position), key);
        }
        assert_eq!(batched, par_compute_wide_keys(&bbox, &items));
    }

    #[test]
    fn test_few_items_stay_in_the_root() {
        let mut tree = WideTree::new(unit_cube());
        let entities = entities_at_random_locations(unit_cube(), 100, 103);
        tree.insert_items(&build_items(&entities));
        assert_eq!(1, tree.num_nodes());
        assert_eq!(1, tree.depth());
    }

    #[test]
    fn test_small_leaf_capacity_forces_subdivision() {
        let mut tree = WideTree::new(unit_cube());
        tree.set_max_num_leaf_items(5);
        let entities = entities_at_random_locations(unit_cube(), 100, 107);
        tree.insert_items(&build_items(&entities));
        assert!(tree.num_nodes() > 1);
        assert!(tree.depth() > 1);
    }

    #[test]
    fn test_partition_table_is_monotone() {
        let mut tree = WideTree::new(unit_cube());
        tree.set_max_num_leaf_items(5);
        let entities = entities_at_random_locations(unit_cube(), 200, 109);
        tree.insert_items(&build_items(&entities));

        fn check(node: &WideNode) {
            if node.children.iter().all(|child| child.is_none()) {
                return;
            }
            assert!(node.partition.windows(2).all(|pair| pair[0] <= pair[1]));
            assert_eq!(node.num_items(), node.partition[256]);
            for (cell, child) in node.children.iter().enumerate() {
                if let Some(child) = child {
                    assert_eq!(node.begin + node.partition[cell], child.begin);
                    assert_eq!(node.begin + node.partition[cell + 1], child.end);
                    check(child);
                }
            }
        }
        check(tree.root.as_ref().unwrap());
    }

    #[test]
    fn test_coincident_items_terminate_in_a_leaf() {
        let mut tree = WideTree::new(unit_cube());
        tree.set_max_num_leaf_items(2);
        let items: Vec<Item> = (0..16)
            .map(|index| Item {
                position: Point::new(0.3, 0.3, 0.3),
                data: index,
            })
            .collect();
        tree.insert_items(&items);
        assert_eq!(16, tree.items().len());

        let mut visits = 0usize;
        tree.visit_near_vertices(
            &mut |_: &Item| {
                visits += 1;
                true
            },
            Point::new(0.3, 0.3, 0.3),
            1.0e-10,
        );
        assert_eq!(16, visits);
    }

    #[test]
    fn test_size_grows_when_inserting_items() {
        let mut tree = WideTree::new(unit_cube());
        let empty_size = tree.size();
        let entities = entities_at_random_locations(unit_cube(), 100, 113);
        tree.insert_items(&build_items(&entities));
        assert!(tree.size() > empty_size);
    }
}
