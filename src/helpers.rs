//! Assorted geometric helper functions.

use itertools::izip;

use crate::types::{BoundingBox, Item, Point, PointType};

/// Distance of `x` from the closed interval `[a, b]`. Zero inside.
pub fn distance_from_interval(a: PointType, b: PointType, x: PointType) -> PointType {
    debug_assert!(b >= a);
    let mut dist: PointType = 0.0;
    dist = dist.max((a - x).max(0.0));
    dist = dist.max((x - b).max(0.0));
    dist
}

/// L-infinity distance between a box and a point. Zero inside the box.
pub fn l_infinity_box(bbox: &BoundingBox, point: &Point) -> PointType {
    let mut dist: PointType = 0.0;
    for axis in 0..3 {
        dist = dist.max(distance_from_interval(
            bbox.min.coord[axis],
            bbox.max.coord[axis],
            point.coord[axis],
        ));
    }
    dist
}

/// L-infinity (Chebyshev) distance between two points.
pub fn l_infinity(p0: &Point, p1: &Point) -> PointType {
    let mut dist: PointType = 0.0;
    for axis in 0..3 {
        dist = dist.max((p0.coord[axis] - p1.coord[axis]).abs());
    }
    dist
}

/// Distance of `x` from the nearest endpoint of `[a, b]`.
pub fn distance_from_edges_of_interval(a: PointType, b: PointType, x: PointType) -> PointType {
    debug_assert!(b >= a);
    (a - x).abs().min((b - x).abs())
}

/// Distance of a point from the nearest face of a box.
pub fn distance_from_boundary(bbox: &BoundingBox, point: &Point) -> PointType {
    let mut dist = PointType::MAX;
    for axis in 0..3 {
        dist = dist.min(distance_from_edges_of_interval(
            bbox.min.coord[axis],
            bbox.max.coord[axis],
            point.coord[axis],
        ));
    }
    dist
}

/// Compute a bounding box enclosing the positions of all items.
///
/// The box is inflated slightly beyond the raw bounds so that every
/// item hashes strictly inside it, and axes along which all items
/// coincide are given a small positive extent. Returns `None` for an
/// empty slice.
pub fn compute_bounds(items: &[Item]) -> Option<BoundingBox> {
    const TOL: PointType = 1.0e-5;

    let first = items.first()?;
    let mut lower = first.position.coord;
    let mut upper = first.position.coord;
    for item in &items[1..] {
        for (lo, hi, &x) in izip!(&mut lower, &mut upper, &item.position.coord) {
            *lo = lo.min(x);
            *hi = hi.max(x);
        }
    }

    let mut max = [0.0; 3];
    for (corner, &lo, &hi) in izip!(&mut max, &lower, &upper) {
        let width = hi - lo;
        let inflated = if width > 0.0 { width * (1.0 + TOL) } else { TOL };
        *corner = lo + inflated;
    }

    Some(BoundingBox::new(Point { coord: lower }, Point { coord: max }))
}
