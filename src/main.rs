//! Vertex dedup benchmark over the spatial sort tree variants.
//!
//! Builds a tree over random vertices, runs a full neighborhood query
//! pass (the dedup workload), rebuilds the tree from the already
//! hash-ordered items, runs the pass again and finally runs it with
//! block-parallel queries. Timings are reported as a JSON document.

use std::time::Instant;

use anyhow::Result;
use clap::error::ErrorKind;
use clap::{Parser, ValueEnum};
use rand::Rng;
use rayon::prelude::*;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use spatial_sort::constants::PARALLEL_GRAIN_SIZE;
use spatial_sort::{
    BoundingBox, HashedOctree, HashedOctreeParallel, Item, Point, SpatialSortTree, WideTree,
    WideTreeParallel,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TreeType {
    #[value(name = "HashedOctree")]
    HashedOctree,
    #[value(name = "WideTree")]
    WideTree,
    #[value(name = "HashedOctreeParallel")]
    HashedOctreeParallel,
    #[value(name = "WideTreeParallel")]
    WideTreeParallel,
}

#[derive(Parser, Debug)]
#[command(
    name = "vertex_dedup",
    about = "Vertex dedup benchmark over the spatial sort tree variants."
)]
struct Configuration {
    /// Number of random vertices per iteration.
    #[arg(long = "num_vertices", default_value_t = 100)]
    num_vertices: usize,

    /// Number of benchmark iterations.
    #[arg(long = "num_iter", default_value_t = 10)]
    num_iter: usize,

    /// Number of worker threads for the parallel paths.
    #[arg(long = "num_threads", default_value_t = 1)]
    num_threads: usize,

    /// Tree variant under test.
    #[arg(long = "tree_type", value_enum, default_value = "HashedOctree")]
    tree_type: TreeType,
}

/// Wall-clock timings of one iteration, in milliseconds.
#[derive(Clone, Copy, Default, Serialize)]
struct IterationTimings {
    construct_tree_with_random_items: f64,
    vertex_dedup: f64,
    build_tree_from_ordered_items: f64,
    vertex_dedup_ordered: f64,
    parallel_vertex_dedup: f64,
}

#[derive(Serialize)]
struct Report {
    num_vertices: usize,
    num_iter: usize,
    num_threads: usize,
    tree_type: String,
    iterations: Vec<IterationTimings>,
    totals: IterationTimings,
    averages: IterationTimings,
}

fn main() -> Result<()> {
    let conf = match Configuration::try_parse() {
        Ok(conf) => conf,
        Err(err) if err.kind() == ErrorKind::DisplayHelp => {
            err.print()?;
            return Ok(());
        }
        Err(err) => {
            err.print()?;
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(conf.num_threads)
        .build()?;
    let report = pool.install(|| run(&conf));

    serde_json::to_writer_pretty(std::io::stdout().lock(), &report)?;
    println!();
    Ok(())
}

fn run(conf: &Configuration) -> Report {
    let mut iterations = Vec::with_capacity(conf.num_iter);
    let mut totals = IterationTimings::default();

    for _ in 0..conf.num_iter {
        let timings = run_iteration(conf);
        totals.construct_tree_with_random_items += timings.construct_tree_with_random_items;
        totals.vertex_dedup += timings.vertex_dedup;
        totals.build_tree_from_ordered_items += timings.build_tree_from_ordered_items;
        totals.vertex_dedup_ordered += timings.vertex_dedup_ordered;
        totals.parallel_vertex_dedup += timings.parallel_vertex_dedup;
        iterations.push(timings);
    }

    let scale = 1.0 / conf.num_iter.max(1) as f64;
    let averages = IterationTimings {
        construct_tree_with_random_items: totals.construct_tree_with_random_items * scale,
        vertex_dedup: totals.vertex_dedup * scale,
        build_tree_from_ordered_items: totals.build_tree_from_ordered_items * scale,
        vertex_dedup_ordered: totals.vertex_dedup_ordered * scale,
        parallel_vertex_dedup: totals.parallel_vertex_dedup * scale,
    };

    Report {
        num_vertices: conf.num_vertices,
        num_iter: conf.num_iter,
        num_threads: conf.num_threads,
        tree_type: format!("{:?}", conf.tree_type),
        iterations,
        totals,
        averages,
    }
}

fn run_iteration(conf: &Configuration) -> IterationTimings {
    let mut timings = IterationTimings::default();
    let bbox = unit_cube();

    let items = random_items(bbox, conf.num_vertices);
    let start = Instant::now();
    let mut tree = tree_from_type(bbox, conf.tree_type);
    tree.insert_items(&items);
    timings.construct_tree_with_random_items = elapsed_ms(start);

    let start = Instant::now();
    vertex_dedup(tree.as_ref());
    timings.vertex_dedup = elapsed_ms(start);

    let ordered: Vec<Item> = tree.items().to_vec();
    let start = Instant::now();
    let mut tree2 = tree_from_type(bbox, conf.tree_type);
    tree2.insert_items(&ordered);
    timings.build_tree_from_ordered_items = elapsed_ms(start);

    let start = Instant::now();
    vertex_dedup(tree2.as_ref());
    timings.vertex_dedup_ordered = elapsed_ms(start);

    let start = Instant::now();
    parallel_vertex_dedup(tree2.as_ref());
    timings.parallel_vertex_dedup = elapsed_ms(start);

    timings
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1.0e3
}

fn unit_cube() -> BoundingBox {
    BoundingBox::new(Point::new(0.0, 0.0, 0.0), Point::new(1.0, 1.0, 1.0))
}

fn tree_from_type(bbox: BoundingBox, tree_type: TreeType) -> Box<dyn SpatialSortTree> {
    match tree_type {
        TreeType::HashedOctree => Box::new(HashedOctree::new(bbox)),
        TreeType::WideTree => Box::new(WideTree::new(bbox)),
        TreeType::HashedOctreeParallel => Box::new(HashedOctreeParallel::new(bbox)),
        TreeType::WideTreeParallel => Box::new(WideTreeParallel::new(bbox)),
    }
}

fn random_items(bbox: BoundingBox, n: usize) -> Vec<Item> {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|index| Item {
            position: Point::new(
                rng.gen_range(bbox.min.coord[0]..bbox.max.coord[0]),
                rng.gen_range(bbox.min.coord[1]..bbox.max.coord[1]),
                rng.gen_range(bbox.min.coord[2]..bbox.max.coord[2]),
            ),
            data: index,
        })
        .collect()
}

/// Count, for every vertex, the near neighbors that are not itself.
fn vertex_dedup(tree: &dyn SpatialSortTree) -> usize {
    let eps = 1.0e-3;
    let mut neighbours = 0usize;
    for item in tree.items() {
        let data = item.data;
        let mut count = 0usize;
        tree.visit_near_vertices(
            &mut |other: &Item| {
                if other.data != data {
                    count += 1;
                }
                true
            },
            item.position,
            eps,
        );
        neighbours += count;
    }
    neighbours
}

/// The dedup pass with block-partitioned queries and one visitor per
/// block.
fn parallel_vertex_dedup(tree: &dyn SpatialSortTree) -> usize {
    let eps = 1.0e-3;
    tree.items()
        .par_chunks(PARALLEL_GRAIN_SIZE)
        .map(|block| {
            let mut neighbours = 0usize;
            for item in block {
                let data = item.data;
                let mut count = 0usize;
                tree.visit_near_vertices(
                    &mut |other: &Item| {
                        if other.data != data {
                            count += 1;
                        }
                        true
                    },
                    item.position,
                    eps,
                );
                neighbours += count;
            }
            neighbours
        })
        .sum()
}
