//! Terrain gradients and their conversion into 4-direction flow fractions.
//!
//! Neighbor elevations are passed as `Option<f32>`; `None` marks a cell
//! outside the basin (or outside the grid).

use log::warn;

use super::neighbors::{
    DIRECTIONS4, EAST, NDIRS, NEIGHBORS8, NNEIGHBORS, NORTH, SOUTH, WEST, cardinal, is_valid_cell, opposite,
};
use crate::data::patch::Patch;
use crate::grid_error::GridError;
use crate::partitioning::{GlobalGrid, LocalPartition};

/// Fixed-point base of the per-direction flow fractions.
pub const FLOW_BASE: u32 = 255;

/// Terrain slope (rise over run) and aspect (radians clockwise from north,
/// pointing downhill) from a 3×3 Sobel kernel.
///
/// Neighbors outside the basin take the central elevation, so the basin
/// edge does not create a spurious gradient.
pub fn slope_aspect(dx: f32, dy: f32, celev: f32, nelev: &[Option<f32>; NNEIGHBORS]) -> (f32, f32) {
    let e = nelev.map(|n| n.unwrap_or(celev));
    let dzdx = ((e[0] + 2.0 * e[7] + e[6]) - (e[2] + 2.0 * e[3] + e[4])) / (8.0 * dx);
    let dzdy = ((e[0] + 2.0 * e[1] + e[2]) - (e[4] + 2.0 * e[5] + e[6])) / (8.0 * dy);
    let slope = dzdx.hypot(dzdy);
    let aspect = if dzdx == 0.0 && dzdy == 0.0 { 0.0 } else { dzdx.atan2(dzdy) };
    (slope, aspect)
}

/// How a cell's outflow was routed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FlowClass {
    /// Split by the terrain aspect.
    #[default]
    Gradient,
    /// Aspect gave nothing; all flow goes to the lowest lower neighbor.
    SteepestNeighbor,
    /// No lower neighbor; all flow goes to the lowest one anyway.
    LocalSink,
    /// No in-basin neighbor at all; the cell keeps its water.
    Isolated,
}

/// Per-direction outflow fractions of one cell, in N, E, S, W order.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FlowDirections {
    pub dir: [u8; NDIRS],
    /// Sum of `dir`; 0 means nothing leaves the cell.
    pub total: u32,
    /// Slope times total flow width.
    pub grad: f32,
    pub class: FlowClass,
}

impl FlowDirections {
    /// Fraction of the outflow sent toward `k`.
    pub fn fraction(&self, k: usize) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.dir[k] as f32 / self.total as f32
        }
    }
}

/// Split the downhill direction into 4-direction flow fractions.
///
/// The aspect vector is decomposed into its N/S and E/W components, each
/// weighted by the width of the cell face it crosses. A component pointing
/// at a cell outside the basin is reflected to the opposite direction, or
/// dropped if that side is outside too. `nelev` holds the N, E, S, W
/// neighbors. A flat cell (`slope <= 0`) gets no fractions.
pub fn flow_fractions(dx: f32, dy: f32, slope: f32, aspect: f32, nelev: &[Option<f32>; NDIRS]) -> FlowDirections {
    let (sin, cos) = aspect.sin_cos();
    let mut width = [0.0f32; NDIRS];
    if cos > 0.0 {
        width[NORTH] = cos * dx;
    } else if cos < 0.0 {
        width[SOUTH] = -cos * dx;
    }
    if sin > 0.0 {
        width[EAST] = sin * dy;
    } else if sin < 0.0 {
        width[WEST] = -sin * dy;
    }
    let total_width: f32 = width.iter().sum();
    let grad = slope * total_width;

    for k in 0..NDIRS {
        if width[k] > 0.0 && nelev[k].is_none() {
            let o = opposite(k);
            if nelev[o].is_some() {
                width[o] += width[k];
            }
            width[k] = 0.0;
        }
    }

    let mut out = FlowDirections {
        grad,
        ..Default::default()
    };
    let kept: f32 = width.iter().sum();
    if slope <= 0.0 || kept <= 0.0 {
        return out;
    }
    for k in 0..NDIRS {
        out.dir[k] = (width[k] / kept * FLOW_BASE as f32 + 0.5) as u8;
        out.total += out.dir[k] as u32;
    }
    out
}

/// Route everything to the lowest in-basin 4-neighbor when the aspect
/// gave no usable direction. Ties go to the first direction in N, E, S, W
/// order. With no in-basin neighbor the cell becomes a self-loop.
pub fn steepest_descent_fallback(celev: f32, nelev: &[Option<f32>; NDIRS], flow: FlowDirections) -> FlowDirections {
    let lowest = nelev
        .iter()
        .enumerate()
        .filter_map(|(k, e)| e.map(|e| (k, e)))
        .fold(None, |best: Option<(usize, f32)>, (k, e)| match best {
            Some((_, b)) if b <= e => best,
            _ => Some((k, e)),
        });
    let mut out = FlowDirections {
        grad: flow.grad,
        ..Default::default()
    };
    match lowest {
        Some((k, e)) => {
            out.dir[k] = FLOW_BASE as u8;
            out.total = FLOW_BASE;
            out.class = if e < celev {
                FlowClass::SteepestNeighbor
            } else {
                FlowClass::LocalSink
            };
        }
        None => out.class = FlowClass::Isolated,
    }
    out
}

/// Slope, aspect and flow directions of every local cell.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TerrainField {
    pub slope: Vec<f32>,
    pub aspect: Vec<f32>,
    pub flow: Vec<FlowDirections>,
    /// Local `(x, y)` of in-basin cells, highest elevation first.
    pub ordered_cells: Vec<(usize, usize)>,
}

/// Elevations of the 8 neighbors of local `(x, y)`; `None` outside the basin.
pub fn neighbor_elevations(
    grid: &GlobalGrid,
    part: &LocalPartition,
    elev: &Patch<f32>,
    mask: &Patch<u8>,
    x: usize,
    y: usize,
) -> [Option<f32>; NNEIGHBORS] {
    NEIGHBORS8.map(|(dx, dy)| {
        let (xn, yn) = (x as isize + dx, y as isize + dy);
        if !is_valid_cell(grid, part, xn, yn) || mask.local(xn, yn).unwrap_or(0) == 0 {
            None
        } else {
            elev.local(xn, yn)
        }
    })
}

/// Terrain field of the partition from ghost-bordered elevation and mask
/// patches (both pulled by the caller after a barrier).
pub fn elevation_slope_aspect(
    grid: &GlobalGrid,
    part: &LocalPartition,
    elev: &Patch<f32>,
    mask: &Patch<u8>,
) -> Result<TerrainField, GridError> {
    if elev.ny != mask.ny || elev.nx != mask.nx {
        return Err(GridError::BufferLength {
            array: "basin mask patch".into(),
            expected: elev.ny * elev.nx,
            actual: mask.ny * mask.nx,
        });
    }
    let n = part.len();
    let mut field = TerrainField {
        slope: vec![0.0; n],
        aspect: vec![0.0; n],
        flow: vec![FlowDirections::default(); n],
        ordered_cells: Vec::new(),
    };
    let mut sinks = 0usize;

    for y in 0..part.ny {
        for x in 0..part.nx {
            let (xi, yi) = (x as isize, y as isize);
            if mask.local(xi, yi).unwrap_or(0) == 0 {
                continue;
            }
            let celev = elev.local(xi, yi).unwrap_or(0.0);
            let nelev = neighbor_elevations(grid, part, elev, mask, x, y);
            let (slope, aspect) = slope_aspect(part.dx, part.dy, celev, &nelev);
            let n4 = cardinal(&nelev);
            let mut flow = flow_fractions(part.dx, part.dy, slope, aspect, &n4);
            if flow.total == 0 {
                flow = steepest_descent_fallback(celev, &n4, flow);
                if flow.class != FlowClass::SteepestNeighbor {
                    sinks += 1;
                    let (gx, gy) = part.local_to_global(x, y);
                    warn!(
                        "cell ({gx}, {gy}) at {celev} m is a sink ({:?}); routing to {}",
                        flow.class,
                        match flow.class {
                            FlowClass::Isolated => "itself".to_string(),
                            _ => format!(
                                "{:?}",
                                flow.dir.iter().position(|&d| d > 0).map(|k| DIRECTIONS4[k])
                            ),
                        }
                    );
                }
            }
            let i = part.index(x, y);
            field.slope[i] = slope;
            field.aspect[i] = aspect;
            field.flow[i] = flow;
            field.ordered_cells.push((x, y));
        }
    }
    // stable: equal elevations keep row-major order
    field.ordered_cells.sort_by(|&(ax, ay), &(bx, by)| {
        let ea = elev.local(ax as isize, ay as isize).unwrap_or(0.0);
        let eb = elev.local(bx as isize, by as isize).unwrap_or(0.0);
        eb.total_cmp(&ea)
    });
    if sinks > 0 {
        warn!("worker {}: {sinks} sink cells routed by fallback", part.rank);
    }
    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

    const IN: Option<f32> = Some(0.0);

    #[test]
    fn plane_dipping_east_has_east_aspect() {
        // elevation falls by 1 per cell toward the east
        let nelev = NEIGHBORS8.map(|(dx, _)| Some(10.0 - dx as f32));
        let (slope, aspect) = slope_aspect(1.0, 1.0, 10.0, &nelev);
        assert!((slope - 1.0).abs() < 1e-6);
        assert!((aspect - FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn outside_neighbors_do_not_tilt_flat_cells() {
        let mut nelev = [Some(5.0); NNEIGHBORS];
        nelev[3] = None;
        nelev[4] = None;
        let (slope, aspect) = slope_aspect(30.0, 30.0, 5.0, &nelev);
        assert_eq!(slope, 0.0);
        assert_eq!(aspect, 0.0);
    }

    #[test]
    fn diagonal_aspect_splits_evenly() {
        let f = flow_fractions(10.0, 10.0, 0.1, FRAC_PI_4, &[IN; NDIRS]);
        assert_eq!(f.dir[NORTH], 128);
        assert_eq!(f.dir[EAST], 128);
        assert_eq!(f.dir[SOUTH] + f.dir[WEST], 0);
        assert_eq!(f.class, FlowClass::Gradient);
    }

    #[test]
    fn outflow_toward_outside_is_reflected() {
        let mut nelev = [IN; NDIRS];
        nelev[NORTH] = None;
        let f = flow_fractions(10.0, 10.0, 0.2, 0.0, &nelev);
        assert_eq!(f.dir[NORTH], 0);
        assert_eq!(f.dir[SOUTH], 255);
    }

    #[test]
    fn both_sides_outside_drops_component() {
        let nelev = [None, IN, None, IN];
        let f = flow_fractions(10.0, 10.0, 0.2, 0.0, &nelev);
        assert_eq!(f.total, 0);
        let g = steepest_descent_fallback(3.0, &[None, Some(2.0), None, Some(2.0)], f);
        assert_eq!(g.dir[EAST], 255);
        assert_eq!(g.class, FlowClass::SteepestNeighbor);
    }

    #[test]
    fn fallback_routes_uphill_and_isolates() {
        let g = steepest_descent_fallback(1.0, &[Some(4.0), Some(3.0), Some(5.0), None], FlowDirections::default());
        assert_eq!(g.dir, [0, 255, 0, 0]);
        assert_eq!(g.class, FlowClass::LocalSink);
        let h = steepest_descent_fallback(1.0, &[None; NDIRS], FlowDirections::default());
        assert_eq!(h.total, 0);
        assert_eq!(h.class, FlowClass::Isolated);
    }
}
