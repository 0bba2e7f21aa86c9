//! Pure split-index arithmetic for mask-weighted decomposition.

use serde::{Deserialize, Serialize};

use crate::data::distributed_array::factor_blocks;

/// How the active-cell-weighted layout cuts the grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaskStrategy {
    /// Same block counts as the uniform layout, with weighted cut positions.
    NaturalBlocks,
    /// One stripe per worker along the longer grid axis.
    #[default]
    StripeLongestAxis,
    /// Horizontal stripes: rows are split, columns are not.
    StripeRows,
    /// Vertical stripes: columns are split, rows are not.
    StripeColumns,
}

/// Number of `(row, column)` blocks for a strategy, never more than the
/// grid extent along either axis.
pub fn block_counts(strategy: MaskStrategy, ny: usize, nx: usize, workers: usize) -> (usize, usize) {
    let workers = workers.max(1);
    match strategy {
        MaskStrategy::NaturalBlocks => factor_blocks((ny, nx), workers).unwrap_or((1, 1)),
        MaskStrategy::StripeLongestAxis if ny >= nx => (workers.min(ny), 1),
        MaskStrategy::StripeLongestAxis => (1, workers.min(nx)),
        MaskStrategy::StripeRows => (workers.min(ny), 1),
        MaskStrategy::StripeColumns => (1, workers.min(nx)),
    }
}

/// Cut positions along one axis from the cumulative active-cell count.
///
/// Split `k` is one past the earliest index whose cumulative count reaches
/// `k / nblocks` of the total. Empty blocks are then pushed forward (and,
/// near the far edge, pulled back) so every block keeps at least one line.
pub fn splits_from_cumsum(cumsum: &[f64], nblocks: usize) -> Vec<usize> {
    let extent = cumsum.len();
    let nblocks = nblocks.clamp(1, extent.max(1));
    let total = cumsum.last().copied().unwrap_or(0.0);

    let mut splits = Vec::with_capacity(nblocks);
    splits.push(0);
    for k in 1..nblocks {
        let threshold = total * k as f64 / nblocks as f64;
        let i = cumsum.partition_point(|&c| c < threshold);
        let prev = splits[k - 1];
        splits.push((i + 1).max(prev + 1));
    }
    let mut upper = extent;
    for j in (1..nblocks).rev() {
        let bound = (extent - (nblocks - j)).min(upper - 1);
        splits[j] = splits[j].min(bound);
        upper = splits[j];
    }
    splits
}

/// Running sum of per-line active counts.
pub fn cumulative(counts: &[f64]) -> Vec<f64> {
    counts
        .iter()
        .scan(0.0, |acc, &c| {
            *acc += c;
            Some(*acc)
        })
        .collect()
}
