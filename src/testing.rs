//! Shared fixtures and visitors for the test suite.

use std::collections::HashSet;

use rand::prelude::*;

use crate::tree::VertexVisitor;
use crate::types::{BoundingBox, Item, Point};

/// An entity with an identity, standing in for user payloads.
pub(crate) struct Entity {
    pub position: Point,
    pub id: usize,
}

pub(crate) fn unit_cube() -> BoundingBox {
    BoundingBox::new(Point::new(0.0, 0.0, 0.0), Point::new(1.0, 1.0, 1.0))
}

/// Entities uniformly distributed over `bbox`, reproducible per seed.
pub(crate) fn entities_at_random_locations(
    bbox: BoundingBox,
    n: usize,
    seed: u64,
) -> Vec<Entity> {
    let mut rng = StdRng::seed_from_u64(seed);
    let dist_x = rand::distributions::Uniform::from(bbox.min.coord[0]..bbox.max.coord[0]);
    let dist_y = rand::distributions::Uniform::from(bbox.min.coord[1]..bbox.max.coord[1]);
    let dist_z = rand::distributions::Uniform::from(bbox.min.coord[2]..bbox.max.coord[2]);
    (0..n)
        .map(|id| Entity {
            position: Point::new(
                dist_x.sample(&mut rng),
                dist_y.sample(&mut rng),
                dist_z.sample(&mut rng),
            ),
            id,
        })
        .collect()
}

pub(crate) fn build_items(entities: &[Entity]) -> Vec<Item> {
    entities
        .iter()
        .map(|entity| Item {
            position: entity.position,
            data: entity.id,
        })
        .collect()
}

/// Counts visited items, excluding the query item itself.
pub(crate) struct CountVisits {
    pub count: usize,
    pub data: usize,
}

impl CountVisits {
    pub fn new(data: usize) -> CountVisits {
        CountVisits { count: 0, data }
    }
}

impl VertexVisitor for CountVisits {
    fn visit(&mut self, item: &Item) -> bool {
        if item.data != self.data {
            self.count += 1;
        }
        true
    }
}

/// Records the payload ids of all visited items.
#[derive(Default)]
pub(crate) struct RecordIdsVisitor {
    pub ids: HashSet<usize>,
}

impl RecordIdsVisitor {
    pub fn entity_visited(&self, id: usize) -> bool {
        self.ids.contains(&id)
    }
}

impl VertexVisitor for RecordIdsVisitor {
    fn visit(&mut self, item: &Item) -> bool {
        self.ids.insert(item.data);
        true
    }
}
