//! Domain decomposition of the watershed grid across workers.
//!
//! Start-up runs [`simple_decompose`] to obtain a preliminary uniform layout,
//! reads the in-basin mask into it, and then (with more than one worker)
//! re-cuts the grid with [`masked_decompose`] so each worker owns a
//! comparable number of active cells. [`decompose_with_config`] drives both
//! steps from a [`DecompositionConfig`].

pub mod error;
pub mod split;

use std::fmt;
use std::str::FromStr;

use itertools::Itertools;
use log::info;
use serde::{Deserialize, Serialize};

use crate::algs::communicator::Communicator;
use crate::algs::reduction::global_sum;
use crate::algs::wire::{WireRegion, cast_slice, decode_vec};
use crate::data::distributed_array::{DistributedArray, Distribution, DistributionHint, Region};
use crate::grid_error::GridError;

pub use self::error::PartitionError;
pub use self::split::MaskStrategy;

/// Shape and georeference of the full model grid.
///
/// `(xorig, yorig)` is the north-west corner; rows run southward.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlobalGrid {
    pub nx: usize,
    pub ny: usize,
    pub dx: f32,
    pub dy: f32,
    pub xorig: f64,
    pub yorig: f64,
}

impl GlobalGrid {
    pub fn cells(&self) -> usize {
        self.nx * self.ny
    }

    pub fn contains(&self, gx: isize, gy: isize) -> bool {
        gx >= 0 && gy >= 0 && (gx as usize) < self.nx && (gy as usize) < self.ny
    }
}

/// The calling worker's rectangle of the global grid.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalPartition {
    pub nx: usize,
    pub ny: usize,
    pub offset_x: usize,
    pub offset_y: usize,
    pub xorig: f64,
    pub yorig: f64,
    pub dx: f32,
    pub dy: f32,
    /// In-basin cells owned by this worker.
    pub num_cells: usize,
    /// In-basin cells in the whole domain.
    pub all_cells: usize,
    pub rank: usize,
    pub global_nx: usize,
    pub global_ny: usize,
    distribution: Distribution,
}

impl LocalPartition {
    fn from_layout(grid: &GlobalGrid, dist: &Distribution, rank: usize) -> Self {
        let region = dist.region_of(rank);
        let (offset_y, offset_x) = if region.is_empty() {
            (0, 0)
        } else {
            (region.rows.start, region.cols.start)
        };
        Self {
            nx: region.ncols(),
            ny: region.nrows(),
            offset_x,
            offset_y,
            xorig: grid.xorig + offset_x as f64 * grid.dx as f64,
            yorig: grid.yorig - offset_y as f64 * grid.dy as f64,
            dx: grid.dx,
            dy: grid.dy,
            num_cells: region.len(),
            all_cells: grid.cells(),
            rank,
            global_nx: grid.nx,
            global_ny: grid.ny,
            distribution: dist.clone(),
        }
    }

    /// Owned rectangle in global `(row, col)` indices.
    pub fn region(&self) -> Region {
        Region::from_origin(self.offset_y, self.offset_x, self.ny, self.nx)
    }

    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    pub fn len(&self) -> usize {
        self.nx * self.ny
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major index of local cell `(x, y)`.
    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        y * self.nx + x
    }

    pub fn contains_global(&self, gx: usize, gy: usize) -> bool {
        self.region().contains(gy, gx)
    }

    /// Local `(x, y)` of global cell `(gx, gy)`, if this worker owns it.
    pub fn global_to_local(&self, gx: usize, gy: usize) -> Option<(usize, usize)> {
        self.contains_global(gx, gy)
            .then(|| (gx - self.offset_x, gy - self.offset_y))
    }

    pub fn local_to_global(&self, x: usize, y: usize) -> (usize, usize) {
        (x + self.offset_x, y + self.offset_y)
    }

    /// Global coordinates of a possibly out-of-partition local position.
    pub fn global_of(&self, x: isize, y: isize) -> (isize, isize) {
        (x + self.offset_x as isize, y + self.offset_y as isize)
    }

    /// Recount in-basin cells from a local mask (collective).
    pub fn count_active<C: Communicator>(&mut self, comm: &C, local_mask: &[u8]) -> Result<(), GridError> {
        if local_mask.len() != self.len() {
            return Err(PartitionError::MaskLength {
                expected: self.len(),
                actual: local_mask.len(),
            }
            .into());
        }
        self.num_cells = local_mask.iter().filter(|&&m| m != 0).count();
        self.all_cells = global_sum(comm, self.num_cells as f64)? as usize;
        Ok(())
    }
}

/// Result of a decomposition: the worker's partition plus a collectively
/// created integer array carrying the layout, from which further arrays are
/// duplicated.
#[derive(Debug, Clone)]
pub struct Decomposition {
    pub partition: LocalPartition,
    pub layout: DistributedArray<i32>,
}

const LAYOUT_NAME: &str = "Domain Decomposition";

/// Uniform block decomposition (collective).
pub fn simple_decompose<C: Communicator>(comm: &C, grid: &GlobalGrid) -> Result<Decomposition, GridError> {
    let layout = DistributedArray::<i32>::create(comm, LAYOUT_NAME, (grid.ny, grid.nx), DistributionHint::Uniform)?;
    let partition = LocalPartition::from_layout(grid, layout.distribution(), comm.rank());
    Ok(Decomposition { partition, layout })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Axis {
    Rows,
    Cols,
}

/// Per-line active-cell counts along `axis`, summed across all workers.
fn line_counts<C: Communicator>(
    comm: &C,
    part: &LocalPartition,
    local_mask: &[u8],
    axis: Axis,
) -> Result<Vec<f64>, GridError> {
    let (extent, name) = match axis {
        Axis::Rows => (part.global_ny, "Active Cells per Row"),
        Axis::Cols => (part.global_nx, "Active Cells per Column"),
    };
    let counts = DistributedArray::<f64>::create(comm, name, (extent, 1), DistributionHint::Uniform)?;
    let (local, region) = match axis {
        Axis::Rows => {
            let v = (0..part.ny)
                .map(|y| local_mask[y * part.nx..(y + 1) * part.nx].iter().filter(|&&m| m != 0).count() as f64)
                .collect::<Vec<_>>();
            (v, Region::from_origin(part.offset_y, 0, part.ny, 1))
        }
        Axis::Cols => {
            let v = (0..part.nx)
                .map(|x| (0..part.ny).filter(|&y| local_mask[y * part.nx + x] != 0).count() as f64)
                .collect::<Vec<_>>();
            (v, Region::from_origin(part.offset_x, 0, part.nx, 1))
        }
    };
    counts.accumulate(&region, &local, 1.0)?;
    comm.barrier()?;
    counts.get(&Region::new(0..extent, 0..1))
}

/// Re-cut the grid so every worker owns a comparable number of active cells
/// (collective).
///
/// `preliminary` is the layout the mask was read into and `local_mask` the
/// worker's slice of it. Returns the new decomposition together with the
/// worker's slice of the mask in the new layout.
pub fn masked_decompose<C: Communicator>(
    comm: &C,
    grid: &GlobalGrid,
    preliminary: &Decomposition,
    local_mask: &[u8],
    strategy: MaskStrategy,
) -> Result<(Decomposition, Vec<u8>), GridError> {
    let prelim = &preliminary.partition;
    if local_mask.len() != prelim.len() {
        return Err(PartitionError::MaskLength {
            expected: prelim.len(),
            actual: local_mask.len(),
        }
        .into());
    }
    let local_active = local_mask.iter().filter(|&&m| m != 0).count();
    let total = global_sum(comm, local_active as f64)?;
    if total <= 0.0 {
        return Err(PartitionError::EmptyMask.into());
    }

    let (nrb, ncb) = split::block_counts(strategy, grid.ny, grid.nx, comm.size());
    let mut row_splits = vec![0];
    let mut col_splits = vec![0];
    if nrb > 1 {
        let counts = line_counts(comm, prelim, local_mask, Axis::Rows)?;
        row_splits = split::splits_from_cumsum(&split::cumulative(&counts), nrb);
    }
    if ncb > 1 {
        let counts = line_counts(comm, prelim, local_mask, Axis::Cols)?;
        col_splits = split::splits_from_cumsum(&split::cumulative(&counts), ncb);
    }

    let layout = DistributedArray::<i32>::create(
        comm,
        LAYOUT_NAME,
        (grid.ny, grid.nx),
        DistributionHint::Irregular { row_splits, col_splits },
    )?;
    let mut partition = LocalPartition::from_layout(grid, layout.distribution(), comm.rank());

    // move the mask from the preliminary layout into the new one
    let staging = preliminary.layout.duplicate::<u8, _>(comm, "Basin Mask")?;
    staging.put(&prelim.region(), local_mask)?;
    comm.barrier()?;
    let new_mask = staging.get(&partition.region())?;
    partition.num_cells = new_mask.iter().filter(|&&m| m != 0).count();
    partition.all_cells = total as usize;

    Ok((Decomposition { partition, layout }, new_mask))
}

/// Decomposition method selected in the configuration file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecompositionKind {
    Simple,
    Masked(MaskStrategy),
}

impl Default for DecompositionKind {
    fn default() -> Self {
        DecompositionKind::Masked(MaskStrategy::default())
    }
}

impl FromStr for DecompositionKind {
    type Err = PartitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SIMPLE" => Ok(DecompositionKind::Simple),
            "MASKED" => Ok(DecompositionKind::Masked(MaskStrategy::NaturalBlocks)),
            "STRIPED" => Ok(DecompositionKind::Masked(MaskStrategy::StripeLongestAxis)),
            "STRIPEX" => Ok(DecompositionKind::Masked(MaskStrategy::StripeColumns)),
            "STRIPEY" => Ok(DecompositionKind::Masked(MaskStrategy::StripeRows)),
            _ => Err(PartitionError::UnknownStrategy(s.trim().to_string())),
        }
    }
}

/// Start-up decomposition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompositionConfig {
    pub kind: DecompositionKind,
    /// Log the per-worker layout once decomposition finishes.
    pub summarize: bool,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            kind: DecompositionKind::default(),
            summarize: true,
        }
    }
}

/// Full start-up decomposition (collective).
///
/// `read_mask` supplies the worker's slice of the in-basin mask for the
/// preliminary uniform partition it is given.
pub fn decompose_with_config<C, F>(
    comm: &C,
    grid: &GlobalGrid,
    config: &DecompositionConfig,
    read_mask: F,
) -> Result<(Decomposition, Vec<u8>), GridError>
where
    C: Communicator,
    F: FnOnce(&LocalPartition) -> Result<Vec<u8>, GridError>,
{
    let mut prelim = simple_decompose(comm, grid)?;
    let mask = read_mask(&prelim.partition)?;
    let (decomp, mask) = match config.kind {
        DecompositionKind::Masked(strategy) if comm.size() > 1 => {
            masked_decompose(comm, grid, &prelim, &mask, strategy)?
        }
        _ => {
            prelim.partition.count_active(comm, &mask)?;
            if prelim.partition.all_cells == 0 {
                return Err(PartitionError::EmptyMask.into());
            }
            (prelim, mask)
        }
    };
    if config.summarize {
        let summary = describe(comm, &decomp.partition)?;
        if comm.is_root() {
            info!("{summary}");
        }
    }
    Ok((decomp, mask))
}

/// Layout of every worker, gathered to all of them.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainSummary {
    pub grid: (usize, usize),
    pub regions: Vec<Region>,
    pub cells: Vec<usize>,
}

impl DomainSummary {
    pub fn total_cells(&self) -> usize {
        self.cells.iter().sum()
    }

    /// Largest per-worker active count over the mean; 1.0 is perfect balance.
    pub fn imbalance(&self) -> f64 {
        let total = self.total_cells();
        if total == 0 || self.cells.is_empty() {
            return 1.0;
        }
        let mean = total as f64 / self.cells.len() as f64;
        self.cells.iter().copied().max().unwrap_or(0) as f64 / mean
    }
}

impl fmt::Display for DomainSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "domain decomposition: {}x{} grid, {} workers, {} active cells, imbalance {:.3}",
            self.grid.0,
            self.grid.1,
            self.regions.len(),
            self.total_cells(),
            self.imbalance()
        )?;
        let lines = self.regions.iter().zip(&self.cells).enumerate().map(|(rank, (r, c))| {
            format!(
                "  worker {rank}: rows {}..{} cols {}..{} ({} cells, {c} active)",
                r.rows.start,
                r.rows.end,
                r.cols.start,
                r.cols.end,
                r.len()
            )
        });
        write!(f, "{}", lines.format("\n"))
    }
}

/// Gather every worker's rectangle and active count (collective).
pub fn describe<C: Communicator>(comm: &C, part: &LocalPartition) -> Result<DomainSummary, GridError> {
    let mine = WireRegion::new(&part.region(), part.num_cells);
    let gathered = comm.all_gather(cast_slice(std::slice::from_ref(&mine)))?;
    let mut regions = Vec::with_capacity(gathered.len());
    let mut cells = Vec::with_capacity(gathered.len());
    for bytes in &gathered {
        for rec in decode_vec::<WireRegion>("describe", bytes)? {
            regions.push(rec.region());
            cells.push(rec.cells());
        }
    }
    Ok(DomainSummary {
        grid: (part.global_ny, part.global_nx),
        regions,
        cells,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, WorkerGroup};

    fn grid(ny: usize, nx: usize) -> GlobalGrid {
        GlobalGrid {
            nx,
            ny,
            dx: 30.0,
            dy: 30.0,
            xorig: 1000.0,
            yorig: 5000.0,
        }
    }

    #[test]
    fn strategy_words_parse() {
        assert_eq!("simple".parse::<DecompositionKind>().unwrap(), DecompositionKind::Simple);
        assert_eq!(
            " STRIPEY ".parse::<DecompositionKind>().unwrap(),
            DecompositionKind::Masked(MaskStrategy::StripeRows)
        );
        assert!(matches!(
            "diagonal".parse::<DecompositionKind>(),
            Err(PartitionError::UnknownStrategy(_))
        ));
    }

    #[test]
    fn serial_simple_decomposition_owns_everything() {
        let d = simple_decompose(&NoComm, &grid(4, 6)).unwrap();
        assert_eq!(d.partition.region(), Region::new(0..4, 0..6));
        assert_eq!(d.partition.all_cells, 24);
    }

    #[test]
    fn origin_follows_offset() {
        let out = WorkerGroup::run(2, |comm| simple_decompose(comm, &grid(10, 4)).unwrap().partition).unwrap();
        let south = &out[1];
        assert_eq!(south.offset_y, 5);
        assert_eq!(south.yorig, 5000.0 - 5.0 * 30.0);
        assert_eq!(south.xorig, 1000.0);
        assert_eq!(south.global_to_local(2, 7), Some((2, 2)));
        assert_eq!(south.global_to_local(2, 3), None);
        assert_eq!(south.local_to_global(1, 0), (1, 5));
    }

    #[test]
    fn empty_mask_is_fatal() {
        let out = WorkerGroup::run(2, |comm| {
            let g = grid(4, 4);
            let pre = simple_decompose(comm, &g).unwrap();
            let mask = vec![0u8; pre.partition.len()];
            masked_decompose(comm, &g, &pre, &mask, MaskStrategy::StripeRows).map(|_| ())
        })
        .unwrap();
        for r in out {
            assert!(matches!(r, Err(GridError::Partition(PartitionError::EmptyMask))));
        }
    }

    #[test]
    fn config_defaults_to_striped() {
        let cfg = DecompositionConfig::default();
        assert_eq!(cfg.kind, DecompositionKind::Masked(MaskStrategy::StripeLongestAxis));
        assert!(cfg.summarize);
    }

    #[test]
    fn config_reads_partial_json() {
        let cfg: DecompositionConfig = serde_json::from_str(r#"{"kind":{"Masked":"StripeRows"}}"#).unwrap();
        assert_eq!(cfg.kind, DecompositionKind::Masked(MaskStrategy::StripeRows));
        assert!(cfg.summarize);
        let simple: DecompositionConfig = serde_json::from_str(r#"{"kind":"Simple","summarize":false}"#).unwrap();
        assert_eq!(simple.kind, DecompositionKind::Simple);
        assert!(!simple.summarize);
    }
}
