//! Halo-based redistribution of per-cell outflow to 4-connected neighbors.
//!
//! Used by subsurface routing and gravitational snow transport: each cell
//! gives up its outflow, which lands in its neighbors in proportion to the
//! cell's flow fractions, including neighbors owned by other workers.

use serde::{Deserialize, Serialize};

use crate::algs::communicator::Communicator;
use crate::data::distributed_array::DistributedArray;
use crate::data::patch::Patch;
use crate::grid_error::GridError;
use crate::partitioning::{GlobalGrid, LocalPartition};
use crate::topology::neighbors::{DIRECTIONS4, NDIRS, is_valid_cell};
use crate::topology::terrain::FlowDirections;

fn check_len(what: &str, expected: usize, actual: usize) -> Result<(), GridError> {
    if expected == actual {
        Ok(())
    } else {
        Err(GridError::BufferLength {
            array: what.to_string(),
            expected,
            actual,
        })
    }
}

/// Move `outflow[i]` out of every in-basin cell into its neighbors and
/// return the net change of each local cell (collective).
///
/// `array` is scratch space with the partition's layout; its contents are
/// overwritten. Cells whose flow total is 0 keep their outflow.
pub fn scatter_to_neighbors<C: Communicator>(
    comm: &C,
    array: &DistributedArray<f32>,
    grid: &GlobalGrid,
    part: &LocalPartition,
    mask: &[u8],
    outflow: &[f32],
    flow: &[FlowDirections],
) -> Result<Vec<f32>, GridError> {
    check_len("basin mask", part.len(), mask.len())?;
    check_len("outflow", part.len(), outflow.len())?;
    check_len("flow directions", part.len(), flow.len())?;

    let mut patch = Patch::<f32>::allocate(part, true);
    for y in 0..part.ny {
        for x in 0..part.nx {
            let i = part.index(x, y);
            let out = outflow[i];
            let f = &flow[i];
            if mask[i] == 0 || out == 0.0 || f.total == 0 {
                continue;
            }
            let (xi, yi) = (x as isize, y as isize);
            let mut kept = 0.0;
            for k in 0..NDIRS {
                if f.dir[k] == 0 {
                    continue;
                }
                let share = out * f.dir[k] as f32 / f.total as f32;
                let (xn, yn) = (xi + DIRECTIONS4[k].0, yi + DIRECTIONS4[k].1);
                match patch.local_mut(xn, yn) {
                    Some(v) if is_valid_cell(grid, part, xn, yn) => *v += share,
                    _ => kept += share,
                }
            }
            if let Some(v) = patch.local_mut(xi, yi) {
                *v += kept - out;
            }
        }
    }

    array.zero(&array.owned_region())?;
    comm.barrier()?;
    patch.accumulate_to_array(array, 1.0)?;
    comm.barrier()?;
    let mut net = Patch::<f32>::allocate(part, false);
    net.pull_from_array(array)?;
    // keep a slow reader's pull ahead of the next scatter's zeroing
    comm.barrier()?;
    Ok(net.owned_values())
}

/// Whether any direction with a flow share points at a cell on the grid.
fn has_receiver(grid: &GlobalGrid, part: &LocalPartition, x: usize, y: usize, f: &FlowDirections) -> bool {
    (0..NDIRS).any(|k| {
        f.dir[k] > 0 && is_valid_cell(grid, part, x as isize + DIRECTIONS4[k].0, y as isize + DIRECTIONS4[k].1)
    })
}

/// Snow-slide parameters: holding depth `coeff · exp(−decay · slope_deg)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AvalancheParams {
    pub holding_coeff: f32,
    pub holding_decay: f32,
    /// Slides only start on slopes steeper than this.
    #[serde(default = "AvalancheParams::default_min_slope")]
    pub min_slope_deg: f32,
}

impl AvalancheParams {
    pub fn new(holding_coeff: f32, holding_decay: f32) -> Self {
        Self {
            holding_coeff,
            holding_decay,
            min_slope_deg: Self::default_min_slope(),
        }
    }

    fn default_min_slope() -> f32 {
        30.0
    }

    /// Snow water the cell holds before sliding, for a slope in degrees.
    pub fn holding_depth(&self, slope_deg: f32) -> f32 {
        self.holding_coeff * (-slope_deg * self.holding_decay).exp()
    }
}

/// Outcome of one avalanche pass on this worker.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AvalancheOutcome {
    /// Cells whose snowpack slid; their pack state should be reset.
    pub released: Vec<bool>,
    /// Snow water leaving this worker's cells.
    pub released_swq: f32,
}

/// Gravitational snow transport (collective).
///
/// Every in-basin cell steeper than `min_slope_deg` whose snow water `swq`
/// exceeds the holding depth releases its whole pack to its neighbors
/// along `flow`. `slope` is the snow-surface gradient (rise over run). A
/// cell without a receiving neighbor keeps its snow. All cells release at
/// once, so the result does not depend on traversal order.
#[allow(clippy::too_many_arguments)]
pub fn avalanche<C: Communicator>(
    comm: &C,
    scratch: &DistributedArray<f32>,
    grid: &GlobalGrid,
    part: &LocalPartition,
    mask: &[u8],
    slope: &[f32],
    flow: &[FlowDirections],
    swq: &mut [f32],
    params: &AvalancheParams,
) -> Result<AvalancheOutcome, GridError> {
    check_len("snow slope", part.len(), slope.len())?;
    check_len("snow water", part.len(), swq.len())?;
    check_len("basin mask", part.len(), mask.len())?;
    check_len("flow directions", part.len(), flow.len())?;

    let mut outcome = AvalancheOutcome {
        released: vec![false; part.len()],
        released_swq: 0.0,
    };
    let mut outflow = vec![0.0; part.len()];
    for y in 0..part.ny {
        for x in 0..part.nx {
            let i = part.index(x, y);
            if mask[i] == 0 || !has_receiver(grid, part, x, y, &flow[i]) {
                continue;
            }
            let slope_deg = slope[i].atan().to_degrees();
            if slope_deg > params.min_slope_deg && swq[i] > params.holding_depth(slope_deg) {
                outcome.released[i] = true;
                outcome.released_swq += swq[i];
                outflow[i] = swq[i];
            }
        }
    }

    let delta = scatter_to_neighbors(comm, scratch, grid, part, mask, &outflow, flow)?;
    for (s, d) in swq.iter_mut().zip(delta) {
        *s = (*s + d).max(0.0);
    }
    Ok(outcome)
}
