//! Data-parallel variants of the tree engines.
//!
//! rayon supplies the fork/join work partitioning: index ranges are
//! split into blocks of at least `PARALLEL_GRAIN_SIZE` and handed to
//! worker threads in unspecified order, joining before the next build
//! step. The node structure and query semantics are identical to the
//! sequential engines; only the insert pipelines differ.

use crate::morton::par_compute_item_keys;
use crate::octree::HashedOctree;
use crate::sort::{par_apply_permutation, par_sort_permutation};
use crate::tree::{SpatialSortTree, VertexVisitor};
use crate::types::{BoundingBox, Item, Point};
use crate::widetree::WideTree;

/// A hashed octree whose insert pipeline hashes, sorts and permutes in
/// parallel blocks.
pub struct HashedOctreeParallel {
    tree: HashedOctree,
}

impl HashedOctreeParallel {
    /// Create an empty tree over `bbox`.
    pub fn new(bbox: BoundingBox) -> HashedOctreeParallel {
        HashedOctreeParallel {
            tree: HashedOctree::new(bbox),
        }
    }

    /// Replace the tree contents with `items`.
    ///
    /// Key computation, the permutation sort and the permutation
    /// application all run data-parallel; the node build is shared
    /// with the sequential engine.
    pub fn insert_items(&mut self, items: &[Item]) {
        let bbox = self.tree.bounding_box();
        let keys = par_compute_item_keys(&bbox, items);
        let permutation = par_sort_permutation(&keys);
        let keys = par_apply_permutation(&permutation, &keys);
        let items = par_apply_permutation(&permutation, items);
        self.tree.rebuild_from_sorted(keys, items);
    }

    /// Visit every item within L-infinity distance `eps` of `position`.
    pub fn visit_near_vertices(
        &self,
        visitor: &mut dyn VertexVisitor,
        position: Point,
        eps: f64,
    ) -> bool {
        self.tree.visit_near_vertices(visitor, position, eps)
    }

    /// The items in fine-key order.
    pub fn items(&self) -> &[Item] {
        self.tree.items()
    }

    pub fn num_nodes(&self) -> usize {
        self.tree.num_nodes()
    }

    pub fn depth(&self) -> usize {
        self.tree.depth()
    }

    pub fn size(&self) -> usize {
        self.tree.size()
    }

    pub fn print_num_items(&self) {
        self.tree.print_num_items()
    }
}

impl SpatialSortTree for HashedOctreeParallel {
    fn insert_items(&mut self, items: &[Item]) {
        HashedOctreeParallel::insert_items(self, items)
    }

    fn visit_near_vertices(
        &self,
        visitor: &mut dyn VertexVisitor,
        position: Point,
        eps: f64,
    ) -> bool {
        HashedOctreeParallel::visit_near_vertices(self, visitor, position, eps)
    }

    fn items(&self) -> &[Item] {
        HashedOctreeParallel::items(self)
    }
}

/// A wide tree whose per-node hashing and permutation application run
/// in parallel blocks for ranges above the grain size.
pub struct WideTreeParallel {
    tree: WideTree,
}

impl WideTreeParallel {
    /// Create an empty tree over `bbox` with the default leaf capacity.
    pub fn new(bbox: BoundingBox) -> WideTreeParallel {
        WideTreeParallel {
            tree: WideTree::new(bbox),
        }
    }

    /// Override the leaf capacity used by subsequent inserts.
    pub fn set_max_num_leaf_items(&mut self, max_leaf_items: usize) {
        self.tree.set_max_num_leaf_items(max_leaf_items)
    }

    /// Replace the tree contents with `items`.
    pub fn insert_items(&mut self, items: &[Item]) {
        self.tree.rebuild(items, true);
    }

    /// Visit every item within L-infinity distance `eps` of `position`.
    pub fn visit_near_vertices(
        &self,
        visitor: &mut dyn VertexVisitor,
        position: Point,
        eps: f64,
    ) -> bool {
        self.tree.visit_near_vertices(visitor, position, eps)
    }

    /// The items in hash order.
    pub fn items(&self) -> &[Item] {
        self.tree.items()
    }

    pub fn num_nodes(&self) -> usize {
        self.tree.num_nodes()
    }

    pub fn depth(&self) -> usize {
        self.tree.depth()
    }

    pub fn size(&self) -> usize {
        self.tree.size()
    }

    pub fn print_num_items(&self) {
        self.tree.print_num_items()
    }
}

impl SpatialSortTree for WideTreeParallel {
    fn insert_items(&mut self, items: &[Item]) {
        WideTreeParallel::insert_items(self, items)
    }

    fn visit_near_vertices(
        &self,
        visitor: &mut dyn VertexVisitor,
        position: Point,
        eps: f64,
    ) -> bool {
        WideTreeParallel::visit_near_vertices(self, visitor, position, eps)
    }

    fn items(&self) -> &[Item] {
        WideTreeParallel::items(self)
    }
}

#[cfg(test)]
mod tests {
    use rayon::prelude::*;

    use super::*;
    use crate::constants::PARALLEL_GRAIN_SIZE;
    use crate::testing::{build_items, entities_at_random_locations, unit_cube, CountVisits};

    /// The parallel insert pipeline must reproduce the sequential item
    /// order exactly; both sorts are stable over the same keys.
    #[test]
    fn test_parallel_octree_matches_the_serial_one() {
        let entities = entities_at_random_locations(unit_cube(), 5000, 127);
        let items = build_items(&entities);

        let mut serial = HashedOctree::new(unit_cube());
        serial.insert_items(&items);
        let mut parallel = HashedOctreeParallel::new(unit_cube());
        parallel.insert_items(&items);

        let serial_order: Vec<usize> = serial.items().iter().map(|item| item.data).collect();
        let parallel_order: Vec<usize> = parallel.items().iter().map(|item| item.data).collect();
        assert_eq!(serial_order, parallel_order);
        assert_eq!(serial.num_nodes(), parallel.num_nodes());
        assert_eq!(serial.depth(), parallel.depth());
    }

    #[test]
    fn test_parallel_wide_tree_matches_the_serial_one() {
        let entities = entities_at_random_locations(unit_cube(), 5000, 131);
        let items = build_items(&entities);

        let mut serial = WideTree::new(unit_cube());
        serial.set_max_num_leaf_items(64);
        serial.insert_items(&items);
        let mut parallel = WideTreeParallel::new(unit_cube());
        parallel.set_max_num_leaf_items(64);
        parallel.insert_items(&items);

        let serial_order: Vec<usize> = serial.items().iter().map(|item| item.data).collect();
        let parallel_order: Vec<usize> = parallel.items().iter().map(|item| item.data).collect();
        assert_eq!(serial_order, parallel_order);
        assert_eq!(serial.num_nodes(), parallel.num_nodes());
        assert_eq!(serial.depth(), parallel.depth());
    }

    /// Queries take `&self`, so one tree can serve many threads with
    /// per-block visitors.
    #[test]
    fn test_concurrent_queries_share_the_tree() {
        let entities = entities_at_random_locations(unit_cube(), 4000, 137);
        let items = build_items(&entities);
        let mut tree = HashedOctreeParallel::new(unit_cube());
        tree.insert_items(&items);

        let eps = 1.0e-3;
        let total: usize = tree
            .items()
            .par_chunks(PARALLEL_GRAIN_SIZE)
            .map(|block| {
                let mut neighbours = 0;
                for item in block {
                    let mut counter = CountVisits::new(item.data);
                    assert!(tree.visit_near_vertices(&mut counter, item.position, eps));
                    neighbours += counter.count;
                }
                neighbours
            })
            .sum();

        let mut expected = 0;
        for item in tree.items() {
            let mut counter = CountVisits::new(item.data);
            tree.visit_near_vertices(&mut counter, item.position, eps);
            expected += counter.count;
        }
        assert_eq!(expected, total);
    }
}
