//! Which channel segments cross each local grid cell, and by how much.

use log::warn;
use serde::{Deserialize, Serialize};

use super::error::{NetworkError, NetworkIssue};
use super::network::ChannelNetwork;
use crate::partitioning::{GlobalGrid, LocalPartition};

/// One row of the channel map table, in global grid coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub col: i64,
    pub row: i64,
    pub segment: i64,
    /// Length of the segment inside this cell.
    pub length: f32,
    #[serde(default)]
    pub cut_height: f32,
    #[serde(default)]
    pub cut_width: f32,
    /// Flow azimuth in degrees clockwise from north.
    #[serde(default)]
    pub azimuth: f32,
    /// The segment drains into the cell here.
    #[serde(default)]
    pub sink: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChannelCell {
    /// Arena index of the segment in the network.
    pub segment: usize,
    pub length: f32,
    /// Azimuth in radians.
    pub aspect: f32,
    pub azimuth: f32,
    pub cut_height: f32,
    pub cut_width: f32,
    pub sink: bool,
}

/// Per-cell channel records of the local partition.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChannelGridMap {
    nx: usize,
    ny: usize,
    cells: Vec<Vec<ChannelCell>>,
}

impl ChannelGridMap {
    /// Keep the records that fall in `part`, validating all of them.
    ///
    /// When `soil_depth` (local, row-major) is given, a cut deeper than the
    /// soil is reduced to 95 % of the soil depth.
    pub fn from_records(
        input: &str,
        grid: &GlobalGrid,
        part: &LocalPartition,
        network: &ChannelNetwork,
        records: &[CellRecord],
        soil_depth: Option<&[f32]>,
    ) -> Result<Self, NetworkError> {
        let mut map = Self {
            nx: part.nx,
            ny: part.ny,
            cells: vec![Vec::new(); part.len()],
        };
        let mut issues = Vec::new();
        for (n, r) in records.iter().enumerate() {
            let before = issues.len();
            if r.col < 0 || r.row < 0 || r.col as usize >= grid.nx || r.row as usize >= grid.ny {
                issues.push(NetworkIssue::CellOutsideGrid {
                    record: n,
                    col: r.col,
                    row: r.row,
                });
            }
            let segment = u32::try_from(r.segment).ok().and_then(|id| network.index_of(id));
            if segment.is_none() {
                issues.push(NetworkIssue::UnknownSegment {
                    record: n,
                    segment: r.segment,
                });
            }
            for (field, value) in [("length", r.length), ("cut height", r.cut_height), ("cut width", r.cut_width)] {
                if value < 0.0 {
                    issues.push(NetworkIssue::NegativeValue { record: n, field, value });
                }
            }
            let (Some(segment), true) = (segment, issues.len() == before) else {
                continue;
            };
            let Some((x, y)) = part.global_to_local(r.col as usize, r.row as usize) else {
                continue;
            };
            let i = part.index(x, y);
            let mut cut_height = r.cut_height;
            if let Some(depth) = soil_depth.and_then(|d| d.get(i)) {
                if cut_height > *depth {
                    warn!(
                        "{input}: cut height {cut_height} at ({}, {}) exceeds soil depth {depth}; using {}",
                        r.col,
                        r.row,
                        0.95 * depth
                    );
                    cut_height = 0.95 * depth;
                }
            }
            map.cells[i].push(ChannelCell {
                segment,
                length: r.length,
                aspect: r.azimuth.to_radians(),
                azimuth: r.azimuth,
                cut_height,
                cut_width: r.cut_width,
                sink: r.sink,
            });
        }
        if !issues.is_empty() {
            return Err(NetworkError::Invalid {
                input: input.to_string(),
                issues,
            });
        }
        Ok(map)
    }

    fn slot(&self, x: usize, y: usize) -> Option<&Vec<ChannelCell>> {
        (x < self.nx && y < self.ny).then(|| &self.cells[y * self.nx + x])
    }

    /// Channel records of local cell `(x, y)`; empty outside the partition.
    pub fn cells(&self, x: usize, y: usize) -> &[ChannelCell] {
        self.slot(x, y).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_channel(&self, x: usize, y: usize) -> bool {
        !self.cells(x, y).is_empty()
    }

    pub fn has_sink(&self, x: usize, y: usize) -> bool {
        self.cells(x, y).iter().any(|c| c.sink)
    }

    /// Total channel length in the cell.
    pub fn cell_length(&self, x: usize, y: usize) -> f32 {
        self.cells(x, y).iter().map(|c| c.length).sum()
    }

    fn length_weighted(&self, x: usize, y: usize, value: impl Fn(&ChannelCell) -> f32) -> f32 {
        let len = self.cell_length(x, y);
        if len <= 0.0 {
            return 0.0;
        }
        self.cells(x, y).iter().map(|c| value(c) * c.length).sum::<f32>() / len
    }

    /// Length-weighted cut width.
    pub fn cell_width(&self, x: usize, y: usize) -> f32 {
        self.length_weighted(x, y, |c| c.cut_width)
    }

    /// Length-weighted cut (bank) height.
    pub fn cell_bank_height(&self, x: usize, y: usize) -> f32 {
        self.length_weighted(x, y, |c| c.cut_height)
    }

    /// Outflow of the segments that drain into this cell.
    pub fn sink_outflow(&self, network: &ChannelNetwork, x: usize, y: usize) -> f64 {
        self.cells(x, y)
            .iter()
            .filter(|c| c.sink)
            .map(|c| network.segments()[c.segment].state.outflow)
            .sum()
    }

    /// Local cells that carry at least one channel record.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &[ChannelCell])> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_empty())
            .map(move |(i, c)| (i % self.nx, i / self.nx, c.as_slice()))
    }
}
