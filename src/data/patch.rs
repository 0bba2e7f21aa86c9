//! Local working buffers with an optional one-cell ghost border.
//!
//! A [`Patch`] mirrors the worker's partition, padded by one row or column
//! on each side that borders another partition (never at the edge of the
//! global grid). Patch cell `(py, px)` always corresponds to global cell
//! `(offset_y - iyoff + py, offset_x - ixoff + px)`.
//!
//! None of the transfer methods synchronize: a push or accumulate must be
//! followed by a barrier before any worker pulls data that depends on it.

use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::data::distributed_array::{DistributedArray, Element, Region};
use crate::grid_error::GridError;
use crate::partitioning::LocalPartition;

/// Which sides of a patch carry a ghost row or column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct GhostSides {
    pub north: bool,
    pub south: bool,
    pub west: bool,
    pub east: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Patch<T: Element> {
    pub ny: usize,
    pub nx: usize,
    pub iyoff: usize,
    pub ixoff: usize,
    ghost: GhostSides,
    region: Region,
    owned: Region,
    data: Vec<T>,
}

impl<T: Element> Patch<T> {
    /// Zero-filled patch over `part`, ghost border included on request.
    pub fn allocate(part: &LocalPartition, include_ghost: bool) -> Self {
        let ghost = if include_ghost && !part.is_empty() {
            GhostSides {
                north: part.offset_y > 0,
                south: part.offset_y + part.ny < part.global_ny,
                west: part.offset_x > 0,
                east: part.offset_x + part.nx < part.global_nx,
            }
        } else {
            GhostSides::default()
        };
        let iyoff = ghost.north as usize;
        let ixoff = ghost.west as usize;
        let ny = if part.is_empty() { 0 } else { part.ny + iyoff + ghost.south as usize };
        let nx = if part.is_empty() { 0 } else { part.nx + ixoff + ghost.east as usize };
        let region = if part.is_empty() {
            Region::default()
        } else {
            Region::from_origin(part.offset_y - iyoff, part.offset_x - ixoff, ny, nx)
        };
        Self {
            ny,
            nx,
            iyoff,
            ixoff,
            ghost,
            region,
            owned: part.region(),
            data: vec![T::zero(); ny * nx],
        }
    }

    pub fn ghost_sides(&self) -> GhostSides {
        self.ghost
    }

    /// Global rectangle covered by the patch, ghosts included.
    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Value at local partition coordinates, which may step one cell into
    /// the ghost border. `None` outside the patch.
    pub fn local(&self, x: isize, y: isize) -> Option<T> {
        self.local_index(x, y).map(|i| self.data[i])
    }

    pub fn local_mut(&mut self, x: isize, y: isize) -> Option<&mut T> {
        self.local_index(x, y).map(move |i| &mut self.data[i])
    }

    fn local_index(&self, x: isize, y: isize) -> Option<usize> {
        let px = x + self.ixoff as isize;
        let py = y + self.iyoff as isize;
        if px < 0 || py < 0 || px as usize >= self.nx || py as usize >= self.ny {
            return None;
        }
        Some(py as usize * self.nx + px as usize)
    }

    /// Copy of the owned (non-ghost) cells in local row-major order.
    pub fn owned_values(&self) -> Vec<T> {
        let (ny, nx) = (self.owned.nrows(), self.owned.ncols());
        let mut out = Vec::with_capacity(ny * nx);
        for y in 0..ny {
            let start = (y + self.iyoff) * self.nx + self.ixoff;
            out.extend_from_slice(&self.data[start..start + nx]);
        }
        out
    }

    /// Overwrite the owned cells from a local row-major buffer.
    pub fn set_owned(&mut self, local: &[T]) -> Result<(), GridError> {
        let (ny, nx) = (self.owned.nrows(), self.owned.ncols());
        if local.len() != ny * nx {
            return Err(GridError::BufferLength {
                array: "patch".into(),
                expected: ny * nx,
                actual: local.len(),
            });
        }
        for y in 0..ny {
            let start = (y + self.iyoff) * self.nx + self.ixoff;
            self.data[start..start + nx].copy_from_slice(&local[y * nx..(y + 1) * nx]);
        }
        Ok(())
    }

    /// Fill the whole patch, ghosts included, from `array`.
    pub fn pull_from_array(&mut self, array: &DistributedArray<T>) -> Result<(), GridError> {
        array.get_into(&self.region, &mut self.data)
    }

    /// Write the owned cells to `array`; ghost cells are not written.
    pub fn push_to_array(&self, array: &DistributedArray<T>) -> Result<(), GridError> {
        array.put(&self.owned, &self.owned_values())
    }

    /// `array += scale * patch` over the ghost-inclusive rectangle, so
    /// contributions land in neighbor-owned cells too.
    pub fn accumulate_to_array(&self, array: &DistributedArray<T>, scale: T) -> Result<(), GridError> {
        array.accumulate(&self.region, &self.data, scale)
    }
}

impl<T: Element> Index<(usize, usize)> for Patch<T> {
    type Output = T;

    /// Patch `(row, col)`, ghost border included.
    fn index(&self, (py, px): (usize, usize)) -> &T {
        &self.data[py * self.nx + px]
    }
}

impl<T: Element> IndexMut<(usize, usize)> for Patch<T> {
    fn index_mut(&mut self, (py, px): (usize, usize)) -> &mut T {
        &mut self.data[py * self.nx + px]
    }
}

/// Row order of a map as delivered by a reader.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowOrientation {
    /// First row is the northernmost.
    #[default]
    Descending,
    /// First row is the southernmost.
    Ascending,
}

/// Place a reader's local slice of a map into `array`, flipping rows when
/// the reader delivers them south to north.
pub fn push_local_map<T: Element>(
    array: &DistributedArray<T>,
    part: &LocalPartition,
    data: &[T],
    orientation: RowOrientation,
) -> Result<(), GridError> {
    let region = part.region();
    match orientation {
        RowOrientation::Descending => array.put(&region, data),
        RowOrientation::Ascending => {
            if data.len() != region.len() {
                return Err(GridError::BufferLength {
                    array: array.name().to_string(),
                    expected: region.len(),
                    actual: data.len(),
                });
            }
            let flipped: Vec<T> = data
                .chunks(part.nx.max(1))
                .rev()
                .flatten()
                .copied()
                .collect();
            array.put(&region, &flipped)
        }
    }
}
