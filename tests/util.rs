#![allow(dead_code)]
use basin_decomp::algs::communicator::{ThreadComm, WorkerGroup};
use basin_decomp::channel::{ChannelClass, ChannelNetwork, CrownType, SegmentRecord};
use basin_decomp::data::distributed_array::{DistributedArray, Element};
use basin_decomp::data::patch::Patch;
use basin_decomp::grid_error::GridError;
use basin_decomp::partitioning::{GlobalGrid, LocalPartition};

/// Square-celled grid with its north-west corner at the origin.
pub fn grid(ny: usize, nx: usize, d: f32) -> GlobalGrid {
    GlobalGrid {
        nx,
        ny,
        dx: d,
        dy: d,
        xorig: 0.0,
        yorig: 0.0,
    }
}

/// Run `f` on `workers` threads and unwrap every worker's result.
pub fn run<R, F>(workers: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(&ThreadComm) -> Result<R, GridError> + Sync,
{
    WorkerGroup::run(workers, f)
        .expect("worker group")
        .into_iter()
        .enumerate()
        .map(|(rank, r)| r.unwrap_or_else(|e| panic!("worker {rank}: {e}")))
        .collect()
}

/// The partition's slice of a global row-major field.
pub fn local_slice<T: Copy>(part: &LocalPartition, global: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(part.len());
    for y in 0..part.ny {
        for x in 0..part.nx {
            let (gx, gy) = part.local_to_global(x, y);
            out.push(global[gy * part.global_nx + gx]);
        }
    }
    out
}

/// Write the owned slice of `global` into `array` and pull a ghost patch
/// back (collective).
pub fn ghost_patch<T: Element, C: basin_decomp::algs::communicator::Communicator>(
    comm: &C,
    array: &DistributedArray<T>,
    part: &LocalPartition,
    global: &[T],
) -> Result<Patch<T>, GridError> {
    array.put(&part.region(), &local_slice(part, global))?;
    comm.barrier()?;
    let mut patch = Patch::allocate(part, true);
    patch.pull_from_array(array)?;
    comm.barrier()?;
    Ok(patch)
}

/// Elevation that falls toward the south-east corner.
pub fn tilted_dem(g: &GlobalGrid) -> Vec<f32> {
    (0..g.ny)
        .flat_map(|y| (0..g.nx).map(move |x| 100.0 - 2.0 * x as f32 - 3.0 * y as f32))
        .collect()
}

/// Elevation of a bowl centered on the grid.
pub fn bowl_dem(g: &GlobalGrid) -> Vec<f32> {
    let (cx, cy) = ((g.nx as f32 - 1.0) / 2.0, (g.ny as f32 - 1.0) / 2.0);
    (0..g.ny)
        .flat_map(|y| (0..g.nx).map(move |x| (x as f32 - cx).powi(2) + (y as f32 - cy).powi(2)))
        .collect()
}

/// Ellipse-shaped basin mask.
pub fn ellipse_mask(g: &GlobalGrid) -> Vec<u8> {
    let (cx, cy) = ((g.nx as f32 - 1.0) / 2.0, (g.ny as f32 - 1.0) / 2.0);
    let (rx, ry) = (g.nx as f32 / 2.0, g.ny as f32 / 2.0);
    (0..g.ny)
        .flat_map(|y| {
            (0..g.nx).map(move |x| {
                let (u, v) = ((x as f32 - cx) / rx, (y as f32 - cy) / ry);
                (u * u + v * v <= 1.0) as u8
            })
        })
        .collect()
}

pub fn class(id: u32) -> ChannelClass {
    ChannelClass {
        id,
        width: 2.0,
        bank_height: 1.0,
        friction: 0.04,
        infiltration: 0.0,
        crown: CrownType::Crowned,
    }
}

pub fn segment(id: i64, order: i64, outlet: Option<i64>) -> SegmentRecord {
    SegmentRecord {
        id,
        order,
        slope: 0.01,
        length: 100.0,
        class: 1,
        outlet,
        record_name: Some(format!("seg{id}")),
    }
}

/// Segments `1 -> 2 -> 3`, orders 1, 2, 3.
pub fn chain3() -> ChannelNetwork {
    ChannelNetwork::from_records(
        "chain",
        vec![class(1)],
        &[segment(1, 1, Some(2)), segment(2, 2, Some(3)), segment(3, 3, None)],
    )
    .expect("valid chain")
}

/// Relative difference with an absolute floor for values near zero.
pub fn rel_diff(a: f64, b: f64) -> f64 {
    (a - b).abs() / a.abs().max(b.abs()).max(1e-12)
}
