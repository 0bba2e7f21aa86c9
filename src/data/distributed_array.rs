//! Named 2-D arrays partitioned into rectangular blocks across workers.
//!
//! A [`DistributedArray`] is created collectively: every worker calls
//! [`DistributedArray::create`] with the same arguments and receives a handle
//! to the same storage. Each block sits behind its own lock, so workers may
//! `put`, `get` or `accumulate` any sub-rectangle concurrently. Writes are
//! only guaranteed visible to other workers after the next barrier.

use std::fmt;
use std::ops::{Add, Mul, Range};
use std::sync::Arc;

use bytemuck::Pod;
use itertools::{Itertools, iproduct};
use log::debug;
use num_traits::Zero;
use parking_lot::Mutex;

use crate::algs::communicator::Communicator;
use crate::debug_invariants::DebugInvariants;
use crate::grid_error::GridError;

/// Storage type tag of a distributed array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementType {
    Int,
    Float,
    Double,
    Byte,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ElementType::Int => "int",
            ElementType::Float => "float",
            ElementType::Double => "double",
            ElementType::Byte => "byte",
        })
    }
}

/// Scalar types that can live in a [`DistributedArray`].
pub trait Element:
    Pod + Zero + Add<Output = Self> + Mul<Output = Self> + PartialOrd + fmt::Debug + Send + Sync + 'static
{
    const TYPE: ElementType;
}

impl Element for i32 {
    const TYPE: ElementType = ElementType::Int;
}
impl Element for f32 {
    const TYPE: ElementType = ElementType::Float;
}
impl Element for f64 {
    const TYPE: ElementType = ElementType::Double;
}
impl Element for u8 {
    const TYPE: ElementType = ElementType::Byte;
}

/// Half-open rectangle of global `(row, col)` indices.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Region {
    pub rows: Range<usize>,
    pub cols: Range<usize>,
}

impl Region {
    pub fn new(rows: Range<usize>, cols: Range<usize>) -> Self {
        Self { rows, cols }
    }

    /// Rectangle of `ny × nx` cells whose first cell is `(row, col)`.
    pub fn from_origin(row: usize, col: usize, ny: usize, nx: usize) -> Self {
        Self::new(row..row + ny, col..col + nx)
    }

    pub fn nrows(&self) -> usize {
        self.rows.end.saturating_sub(self.rows.start)
    }

    pub fn ncols(&self) -> usize {
        self.cols.end.saturating_sub(self.cols.start)
    }

    pub fn len(&self) -> usize {
        self.nrows() * self.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.rows.contains(&row) && self.cols.contains(&col)
    }

    pub fn intersect(&self, other: &Region) -> Region {
        let rows = self.rows.start.max(other.rows.start)..self.rows.end.min(other.rows.end);
        let cols = self.cols.start.max(other.cols.start)..self.cols.end.min(other.cols.end);
        if rows.start >= rows.end || cols.start >= cols.end {
            Region::default()
        } else {
            Region::new(rows, cols)
        }
    }
}

/// Block map of a distributed array.
///
/// Rows are cut at `row_splits`, columns at `col_splits` (both start at 0).
/// Worker `p` owns block `(p / ncol_blocks, p % ncol_blocks)`; workers past
/// the block count own nothing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Distribution {
    shape: (usize, usize),
    row_splits: Vec<usize>,
    col_splits: Vec<usize>,
    workers: usize,
}

/// Factor at most `workers` into `pr × pc` blocks that fit `shape`, with
/// block extents as close to square as possible (ties go to fewer row
/// blocks). Uses every worker when some factorization fits.
pub(crate) fn factor_blocks(shape: (usize, usize), workers: usize) -> Option<(usize, usize)> {
    let (rows, cols) = shape;
    (1..=workers).rev().find_map(|used| {
        (1..=used)
            .filter(|pr| used % pr == 0)
            .map(|pr| (pr, used / pr))
            .filter(|&(pr, pc)| pr <= rows && pc <= cols)
            .min_by(|&(ar, ac), &(br, bc)| {
                let da = (rows as f64 / ar as f64 - cols as f64 / ac as f64).abs();
                let db = (rows as f64 / br as f64 - cols as f64 / bc as f64).abs();
                da.total_cmp(&db)
            })
    })
}

fn layout_error(reason: impl Into<String>) -> GridError {
    GridError::Distribution {
        array: String::new(),
        reason: reason.into(),
    }
}

impl Distribution {
    /// Regular block layout for `workers` workers.
    ///
    /// The worker count is factored into `pr × pc` blocks whose shape is
    /// closest to square; if no factorization fits the shape, fewer blocks
    /// are used and the remaining workers own nothing.
    pub fn uniform(shape: (usize, usize), workers: usize) -> Result<Self, GridError> {
        let (rows, cols) = shape;
        if rows == 0 || cols == 0 {
            return Err(layout_error(format!("empty shape {rows}x{cols}")));
        }
        if workers == 0 {
            return Err(layout_error("no workers"));
        }
        let (pr, pc) = factor_blocks(shape, workers)
            .ok_or_else(|| layout_error(format!("cannot lay out {rows}x{cols} over {workers} workers")))?;
        Ok(Self {
            shape,
            row_splits: (0..pr).map(|i| i * rows / pr).collect(),
            col_splits: (0..pc).map(|j| j * cols / pc).collect(),
            workers,
        })
    }

    /// Block layout with explicit split indices.
    pub fn irregular(
        shape: (usize, usize),
        row_splits: Vec<usize>,
        col_splits: Vec<usize>,
        workers: usize,
    ) -> Result<Self, GridError> {
        let dist = Self {
            shape,
            row_splits,
            col_splits,
            workers,
        };
        dist.validate_invariants()?;
        Ok(dist)
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn row_splits(&self) -> &[usize] {
        &self.row_splits
    }

    pub fn col_splits(&self) -> &[usize] {
        &self.col_splits
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Number of non-empty blocks.
    pub fn blocks(&self) -> usize {
        self.row_splits.len() * self.col_splits.len()
    }

    fn row_range(&self, bi: usize) -> Range<usize> {
        let end = self.row_splits.get(bi + 1).copied().unwrap_or(self.shape.0);
        self.row_splits[bi]..end
    }

    fn col_range(&self, bj: usize) -> Range<usize> {
        let end = self.col_splits.get(bj + 1).copied().unwrap_or(self.shape.1);
        self.col_splits[bj]..end
    }

    fn block_region(&self, block: usize) -> Region {
        let ncb = self.col_splits.len();
        Region::new(self.row_range(block / ncb), self.col_range(block % ncb))
    }

    /// Rectangle owned by `rank`; empty for workers without a block.
    pub fn region_of(&self, rank: usize) -> Region {
        if rank < self.blocks() {
            self.block_region(rank)
        } else {
            Region::default()
        }
    }

    /// Worker that owns global cell `(row, col)`.
    pub fn owner_of(&self, row: usize, col: usize) -> Option<usize> {
        if row >= self.shape.0 || col >= self.shape.1 {
            return None;
        }
        let bi = self.row_splits.partition_point(|&s| s <= row) - 1;
        let bj = self.col_splits.partition_point(|&s| s <= col) - 1;
        Some(bi * self.col_splits.len() + bj)
    }

    /// Blocks intersecting a (bounded, non-empty) region.
    fn blocks_overlapping(&self, region: &Region) -> impl Iterator<Item = usize> + '_ {
        let bi0 = self.row_splits.partition_point(|&s| s <= region.rows.start) - 1;
        let bi1 = self.row_splits.partition_point(|&s| s < region.rows.end);
        let bj0 = self.col_splits.partition_point(|&s| s <= region.cols.start) - 1;
        let bj1 = self.col_splits.partition_point(|&s| s < region.cols.end);
        let ncb = self.col_splits.len();
        iproduct!(bi0..bi1, bj0..bj1).map(move |(bi, bj)| bi * ncb + bj)
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} in {}x{} blocks (rows at [{}], cols at [{}]) over {} workers",
            self.shape.0,
            self.shape.1,
            self.row_splits.len(),
            self.col_splits.len(),
            self.row_splits.iter().join(", "),
            self.col_splits.iter().join(", "),
            self.workers
        )
    }
}

impl DebugInvariants for Distribution {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "Distribution");
    }

    fn validate_invariants(&self) -> Result<(), GridError> {
        let (rows, cols) = self.shape;
        if rows == 0 || cols == 0 {
            return Err(layout_error(format!("empty shape {rows}x{cols}")));
        }
        for (axis, splits, extent) in [("row", &self.row_splits, rows), ("column", &self.col_splits, cols)] {
            if splits.first() != Some(&0) {
                return Err(layout_error(format!("{axis} splits must start at 0")));
            }
            if !splits.iter().tuple_windows().all(|(a, b)| a < b) {
                return Err(layout_error(format!(
                    "{axis} splits [{}] are not strictly increasing",
                    splits.iter().join(", ")
                )));
            }
            if splits.last().is_some_and(|&s| s >= extent) {
                return Err(layout_error(format!(
                    "{axis} splits [{}] do not fit extent {extent}",
                    splits.iter().join(", ")
                )));
            }
        }
        if self.blocks() > self.workers {
            return Err(layout_error(format!(
                "{} blocks for {} workers",
                self.blocks(),
                self.workers
            )));
        }
        Ok(())
    }
}

/// How [`DistributedArray::create`] lays out a new array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DistributionHint {
    Uniform,
    MatchLayout(Distribution),
    Irregular {
        row_splits: Vec<usize>,
        col_splits: Vec<usize>,
    },
}

struct ArrayStore<T> {
    name: String,
    dist: Distribution,
    blocks: Vec<Mutex<Vec<T>>>,
}

/// One worker's handle on a collectively created 2-D array.
pub struct DistributedArray<T: Element> {
    store: Arc<ArrayStore<T>>,
    rank: usize,
}

impl<T: Element> Clone for DistributedArray<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            rank: self.rank,
        }
    }
}

impl<T: Element> fmt::Debug for DistributedArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedArray")
            .field("name", &self.store.name)
            .field("type", &T::TYPE)
            .field("rank", &self.rank)
            .field("distribution", &self.store.dist)
            .finish()
    }
}

impl<T: Element> DistributedArray<T> {
    /// Collectively create a zero-filled array of `shape = (rows, cols)`.
    pub fn create<C: Communicator>(
        comm: &C,
        name: &str,
        shape: (usize, usize),
        hint: DistributionHint,
    ) -> Result<Self, GridError> {
        let workers = comm.size();
        let dist = match hint {
            DistributionHint::Uniform => Distribution::uniform(shape, workers),
            DistributionHint::MatchLayout(d) => {
                if d.shape != shape {
                    Err(layout_error(format!(
                        "layout is for {}x{}, array is {}x{}",
                        d.shape.0, d.shape.1, shape.0, shape.1
                    )))
                } else if d.workers != workers {
                    Err(layout_error(format!(
                        "layout is for {} workers, group has {workers}",
                        d.workers
                    )))
                } else {
                    Ok(d)
                }
            }
            DistributionHint::Irregular {
                row_splits,
                col_splits,
            } => Distribution::irregular(shape, row_splits, col_splits, workers),
        }
        .map_err(|e| match e {
            GridError::Distribution { reason, .. } => GridError::Distribution {
                array: name.to_string(),
                reason,
            },
            other => other,
        })?;

        let store = comm.share(|| {
            let blocks = (0..dist.blocks())
                .map(|b| Mutex::new(vec![T::zero(); dist.block_region(b).len()]))
                .collect();
            ArrayStore {
                name: name.to_string(),
                dist: dist.clone(),
                blocks,
            }
        })?;
        if store.name != name || store.dist != dist {
            return Err(GridError::CollectiveMismatch(format!(
                "worker {} created `{name}` while a peer created `{}`",
                comm.rank(),
                store.name
            )));
        }
        if comm.is_root() {
            debug!("created {} array `{name}`: {dist}", T::TYPE);
        }
        Ok(Self {
            store,
            rank: comm.rank(),
        })
    }

    /// Collectively create an array with this array's layout and another
    /// element type.
    pub fn duplicate<U: Element, C: Communicator>(
        &self,
        comm: &C,
        name: &str,
    ) -> Result<DistributedArray<U>, GridError> {
        DistributedArray::create(
            comm,
            name,
            self.shape(),
            DistributionHint::MatchLayout(self.store.dist.clone()),
        )
    }

    pub fn name(&self) -> &str {
        &self.store.name
    }

    pub fn shape(&self) -> (usize, usize) {
        self.store.dist.shape
    }

    pub fn element_type(&self) -> ElementType {
        T::TYPE
    }

    pub fn distribution(&self) -> &Distribution {
        &self.store.dist
    }

    /// Rectangle owned by the calling worker.
    pub fn owned_region(&self) -> Region {
        self.store.dist.region_of(self.rank)
    }

    fn check(&self, region: &Region, len: usize) -> Result<(), GridError> {
        if len != region.len() {
            return Err(GridError::BufferLength {
                array: self.store.name.clone(),
                expected: region.len(),
                actual: len,
            });
        }
        let (rows, cols) = self.shape();
        if !region.is_empty() && (region.rows.end > rows || region.cols.end > cols) {
            return Err(GridError::RegionOutOfBounds {
                array: self.store.name.clone(),
                rows: region.rows.clone(),
                cols: region.cols.clone(),
                shape: (rows, cols),
            });
        }
        Ok(())
    }

    /// Call `f(block_row_segment, buffer_range)` for every row segment of
    /// `region`, block by block.
    fn visit(&self, region: &Region, mut f: impl FnMut(&mut [T], Range<usize>)) {
        if region.is_empty() {
            return;
        }
        let dist = &self.store.dist;
        for b in dist.blocks_overlapping(region) {
            let breg = dist.block_region(b);
            let inter = breg.intersect(region);
            if inter.is_empty() {
                continue;
            }
            let n = inter.ncols();
            let mut data = self.store.blocks[b].lock();
            for r in inter.rows.clone() {
                let dst = (r - breg.rows.start) * breg.ncols() + (inter.cols.start - breg.cols.start);
                let src = (r - region.rows.start) * region.ncols() + (inter.cols.start - region.cols.start);
                f(&mut data[dst..dst + n], src..src + n);
            }
        }
    }

    /// Overwrite `region` with the row-major `buf`.
    pub fn put(&self, region: &Region, buf: &[T]) -> Result<(), GridError> {
        self.check(region, buf.len())?;
        self.visit(region, |dst, src| dst.copy_from_slice(&buf[src]));
        Ok(())
    }

    /// `array[region] += scale * buf`.
    pub fn accumulate(&self, region: &Region, buf: &[T], scale: T) -> Result<(), GridError> {
        self.check(region, buf.len())?;
        self.visit(region, |dst, src| {
            for (d, &s) in dst.iter_mut().zip(&buf[src]) {
                *d = *d + scale * s;
            }
        });
        Ok(())
    }

    /// Read `region` into `out` in row-major order.
    pub fn get_into(&self, region: &Region, out: &mut [T]) -> Result<(), GridError> {
        self.check(region, out.len())?;
        self.visit(region, |src, dst| out[dst].copy_from_slice(src));
        Ok(())
    }

    pub fn get(&self, region: &Region) -> Result<Vec<T>, GridError> {
        let mut out = vec![T::zero(); region.len()];
        self.get_into(region, &mut out)?;
        Ok(out)
    }

    pub fn zero(&self, region: &Region) -> Result<(), GridError> {
        self.check(region, region.len())?;
        self.visit(region, |dst, _| dst.fill(T::zero()));
        Ok(())
    }

    /// Set every element of the calling worker's own block.
    ///
    /// Collective in effect: the whole array is filled once every worker has
    /// called it and passed a barrier.
    pub fn fill(&self, value: T) {
        if let Some(block) = self.store.blocks.get(self.rank) {
            block.lock().fill(value);
        }
    }
}
