//! The polymorphic spatial sort tree surface.

use crate::types::{Item, Point};

/// Callback invoked once per item matched by a near-vertex query.
pub trait VertexVisitor {
    /// Handle one matched item. Return `false` to stop the traversal.
    fn visit(&mut self, item: &Item) -> bool;
}

impl<F: FnMut(&Item) -> bool> VertexVisitor for F {
    fn visit(&mut self, item: &Item) -> bool {
        self(item)
    }
}

/// Common surface of the spatial sort tree variants.
///
/// Inserting is destructive: each call replaces the current contents
/// and reorders the new items by their spatial hash. Queries are
/// read-only, so a tree may be shared across threads while it is being
/// queried.
pub trait SpatialSortTree: Send + Sync {
    /// Replace the tree contents with `items`.
    fn insert_items(&mut self, items: &[Item]);

    /// Visit every item within L-infinity distance `eps` of `position`.
    ///
    /// Returns `true` if the traversal ran to completion and `false`
    /// if the visitor stopped it.
    fn visit_near_vertices(
        &self,
        visitor: &mut dyn VertexVisitor,
        position: Point,
        eps: f64,
    ) -> bool;

    /// The inserted items, in hash order.
    fn items(&self) -> &[Item];
}
