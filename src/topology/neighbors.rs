//! Fixed neighbor-direction tables.
//!
//! Offsets are `(dx, dy)` in grid cells with `y` growing southward, the
//! same orientation as grid rows.

use crate::partitioning::{GlobalGrid, LocalPartition};

/// Number of 4-connected routing directions.
pub const NDIRS: usize = 4;
/// Number of 8-connected neighbors.
pub const NNEIGHBORS: usize = 8;

pub const NORTH: usize = 0;
pub const EAST: usize = 1;
pub const SOUTH: usize = 2;
pub const WEST: usize = 3;

/// N, E, S, W.
pub const DIRECTIONS4: [(isize, isize); NDIRS] = [(0, -1), (1, 0), (0, 1), (-1, 0)];

/// Counter-clockwise (north up) from south-west: SW, S, SE, E, NE, N, NW, W.
pub const NEIGHBORS8: [(isize, isize); NNEIGHBORS] = [
    (-1, 1),
    (0, 1),
    (1, 1),
    (1, 0),
    (1, -1),
    (0, -1),
    (-1, -1),
    (-1, 0),
];

/// Power-of-two flow-direction codes of input rasters, in [`NEIGHBORS8`]
/// order (E = 1, SE = 2, S = 4, ... NE = 128).
pub const D8_CODES: [u8; NNEIGHBORS] = [8, 4, 2, 1, 128, 64, 32, 16];

/// Position of each cardinal direction in [`NEIGHBORS8`].
pub const CARDINAL_IN_NEIGHBORS8: [usize; NDIRS] = [5, 3, 1, 7];

static_assertions::const_assert_eq!(DIRECTIONS4.len(), NDIRS);
static_assertions::const_assert_eq!(D8_CODES.len(), NEIGHBORS8.len());

/// Index into [`NEIGHBORS8`] for a raster flow-direction code.
pub fn direction_from_code(code: u8) -> Option<usize> {
    D8_CODES.iter().position(|&c| c == code)
}

/// Opposite of a 4-connected direction.
#[inline]
pub fn opposite(dir: usize) -> usize {
    (dir + 2) % NDIRS
}

/// Pick the cardinal entries out of an 8-neighbor array, in N, E, S, W order.
pub fn cardinal<T: Copy>(n8: &[T; NNEIGHBORS]) -> [T; NDIRS] {
    CARDINAL_IN_NEIGHBORS8.map(|i| n8[i])
}

/// True iff local cell `(x, y)` of `part` lies inside the global grid.
///
/// The test is against the global grid, not the partition: a neighbor may
/// be owned by another worker and still be valid.
pub fn is_valid_cell(grid: &GlobalGrid, part: &LocalPartition, x: isize, y: isize) -> bool {
    let (gx, gy) = part.global_of(x, y);
    grid.contains(gx, gy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cardinal_offsets_agree_between_tables() {
        for (k, &i) in CARDINAL_IN_NEIGHBORS8.iter().enumerate() {
            assert_eq!(DIRECTIONS4[k], NEIGHBORS8[i]);
        }
    }

    #[test]
    fn codes_are_distinct_powers_of_two() {
        let mut seen = 0u16;
        for &c in &D8_CODES {
            assert!(c.is_power_of_two());
            seen |= c as u16;
        }
        assert_eq!(seen, 0xff);
        assert_eq!(direction_from_code(1), Some(3));
        assert_eq!(direction_from_code(3), None);
    }

    #[test]
    fn neighbors_turn_counter_clockwise() {
        // with y growing southward a negative cross product turns counter-clockwise
        for k in 0..NNEIGHBORS {
            let (ax, ay) = NEIGHBORS8[k];
            let (bx, by) = NEIGHBORS8[(k + 1) % NNEIGHBORS];
            assert!(ax * by - ay * bx < 0);
        }
    }
}
