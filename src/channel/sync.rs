//! Per-timestep reconciliation of the replicated channel network.
//!
//! Each worker adds the lateral inflow and heat-budget terms of its own
//! cells to its copy of the network; a collective reduction then sums the
//! per-segment values over all workers, after which every worker routes
//! the identical network redundantly.
//!
//! The phases are enforced by value-consuming tokens:
//!
//! ```text
//! sync.reset(&mut net) -> Accumulating -> sync.global_reduce(comm, ..) -> Reduced -> route(dt)
//! ```
//!
//! Summation order inside the reduction depends on which worker reaches a
//! block lock first, so results for different worker counts agree to a
//! relative 1e-9, not bitwise. Within one run every worker reads the same
//! reduced values.

use log::{debug, warn};
use once_cell::unsync::OnceCell;

use super::error::NetworkError;
use super::grid_map::ChannelGridMap;
use super::network::{ChannelNetwork, EnergyBudget};
use crate::algs::communicator::Communicator;
use crate::algs::reduction::{ReduceOp, global_reduce};
use crate::data::distributed_array::{DistributedArray, DistributionHint, Region};
use crate::grid_error::GridError;

/// Values reduced per segment: lateral inflow then the heat-budget terms.
pub const SEGMENT_FIELDS: usize = 1 + EnergyBudget::FIELDS;

/// One worker's handle on the shared per-segment state vector.
#[derive(Debug)]
pub struct ChannelNetworkSync {
    name: String,
    state: OnceCell<DistributedArray<f64>>,
}

/// Network between `reset` and the reduction: local contributions only.
#[must_use = "contributions must be reduced before routing"]
pub struct Accumulating<'n> {
    network: &'n mut ChannelNetwork,
}

/// Network holding the basin-wide sums, ready to route.
#[must_use = "a reduced network should be routed"]
pub struct Reduced<'n> {
    network: &'n mut ChannelNetwork,
}

impl ChannelNetworkSync {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: OnceCell::new(),
        }
    }

    /// Begin a time step (local, not collective).
    pub fn reset<'n>(&self, network: &'n mut ChannelNetwork) -> Accumulating<'n> {
        network.step_initialize();
        Accumulating { network }
    }

    fn state_array<C: Communicator>(&self, comm: &C, segments: usize) -> Result<&DistributedArray<f64>, GridError> {
        let array = self.state.get_or_try_init(|| {
            DistributedArray::create(comm, &self.name, (segments, SEGMENT_FIELDS), DistributionHint::Uniform)
        })?;
        if array.shape().0 != segments {
            return Err(NetworkError::StateMismatch {
                name: self.name.clone(),
                expected: segments,
                actual: array.shape().0,
            }
            .into());
        }
        Ok(array)
    }

    /// Sum lateral inflow and heat-budget terms over all workers
    /// (collective) and overwrite every worker's copy with the totals.
    pub fn global_reduce<'n, C: Communicator>(
        &self,
        comm: &C,
        acc: Accumulating<'n>,
    ) -> Result<Reduced<'n>, GridError> {
        let network = acc.network;
        let nseg = network.len();
        if nseg == 0 {
            return Ok(Reduced { network });
        }
        let array = self.state_array(comm, nseg)?;
        let all = Region::new(0..nseg, 0..SEGMENT_FIELDS);

        let mut local = Vec::with_capacity(nseg * SEGMENT_FIELDS);
        for seg in network.segments() {
            local.push(seg.state.lateral_inflow);
            local.extend_from_slice(&seg.energy.to_array());
        }

        array.zero(&array.owned_region())?;
        comm.barrier()?;
        array.accumulate(&all, &local, 1.0)?;
        comm.barrier()?;
        array.get_into(&all, &mut local)?;
        // the next step zeroes the vector; nobody may still be reading it
        comm.barrier()?;

        for (seg, row) in network.segments_mut().iter_mut().zip(local.chunks_exact(SEGMENT_FIELDS)) {
            seg.state.lateral_inflow = row[0];
            let mut terms = [0.0; EnergyBudget::FIELDS];
            terms.copy_from_slice(&row[1..]);
            seg.energy = EnergyBudget::from_array(terms);
        }
        if comm.is_root() {
            debug!("reduced {nseg} channel segments through `{}`", self.name);
        }
        Ok(Reduced { network })
    }
}

impl<'n> Accumulating<'n> {
    pub fn network(&self) -> &ChannelNetwork {
        &*self.network
    }

    /// Add `mass` of lateral inflow from local cell `(x, y)` to the
    /// segments crossing it, in proportion to their length in the cell.
    /// Any non-zero `mass` for a cell without a channel is an error.
    pub fn local_contribute(&mut self, map: &ChannelGridMap, x: usize, y: usize, mass: f64) -> Result<(), NetworkError> {
        let len = map.cell_length(x, y) as f64;
        if len <= 0.0 {
            if mass != 0.0 {
                return Err(NetworkError::NoChannelInCell { x, y, mass });
            }
            return Ok(());
        }
        let segments = self.network.segments_mut();
        for c in map.cells(x, y) {
            segments[c.segment].state.lateral_inflow += mass * c.length as f64 / len;
        }
        Ok(())
    }

    /// Add one cell's heat-budget terms to every segment crossing it.
    ///
    /// All terms are summed per cell (and later averaged by the segment's
    /// cell count) except azimuth, which takes the cell's channel azimuth
    /// weighted by the share of the segment's length in the cell.
    pub fn contribute_energy(&mut self, map: &ChannelGridMap, x: usize, y: usize, terms: &EnergyBudget) {
        let segments = self.network.segments_mut();
        for c in map.cells(x, y) {
            let seg = &mut segments[c.segment];
            let mut sum = seg.energy.to_array();
            for (s, t) in sum.iter_mut().zip(terms.to_array()) {
                *s += t;
            }
            let mut energy = EnergyBudget::from_array(sum);
            energy.azimuth = seg.energy.azimuth + c.azimuth as f64 * c.length as f64 / seg.length as f64;
            seg.energy = energy;
        }
    }
}

impl<'n> Reduced<'n> {
    pub fn network(&self) -> &ChannelNetwork {
        &*self.network
    }

    /// Turn the summed heat-budget terms into per-cell means.
    pub fn average_energy(&mut self) {
        for seg in self.network.segments_mut() {
            seg.energy.average_over(seg.ncells);
        }
    }

    /// Route the network for a step of `dt` seconds (local; every worker
    /// computes the same result).
    pub fn route(self, dt: f64) -> &'n ChannelNetwork {
        let network = self.network;
        network.route(dt);
        network
    }
}

/// Count, over all workers, the in-basin cells each segment crosses
/// (collective). Returns the ids of segments that cross none.
pub fn init_segment_ncells<C: Communicator>(
    comm: &C,
    network: &mut ChannelNetwork,
    map: &ChannelGridMap,
    local_mask: &[u8],
    nx: usize,
) -> Result<Vec<u32>, GridError> {
    let mut counts = vec![0i32; network.len()];
    for (x, y, cells) in map.iter() {
        if local_mask.get(y * nx + x).copied().unwrap_or(0) == 0 {
            continue;
        }
        for c in cells {
            counts[c.segment] += 1;
        }
    }
    global_reduce(comm, &mut counts, ReduceOp::Sum)?;

    let mut empty = Vec::new();
    for (seg, &n) in network.segments_mut().iter_mut().zip(&counts) {
        seg.ncells = n.max(0) as u32;
        if n == 0 {
            empty.push(seg.id);
        }
    }
    if !empty.is_empty() && comm.is_root() {
        warn!("{} channel segments cross no in-basin cell: {:?}", empty.len(), empty);
    }
    Ok(empty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::channel::grid_map::CellRecord;
    use crate::channel::network::{ChannelClass, CrownType, SegmentRecord};
    use crate::partitioning::{GlobalGrid, simple_decompose};

    fn network() -> ChannelNetwork {
        let class = ChannelClass {
            id: 1,
            width: 1.0,
            bank_height: 1.0,
            friction: 0.05,
            infiltration: 0.0,
            crown: CrownType::Crowned,
        };
        let rec = |id, order, outlet| SegmentRecord {
            id,
            order,
            slope: 0.02,
            length: 50.0,
            class: 1,
            outlet,
            record_name: None,
        };
        ChannelNetwork::from_records("net", vec![class], &[rec(1, 1, Some(2)), rec(2, 2, None)]).unwrap()
    }

    fn map(net: &ChannelNetwork) -> ChannelGridMap {
        let grid = GlobalGrid {
            nx: 2,
            ny: 1,
            dx: 50.0,
            dy: 50.0,
            xorig: 0.0,
            yorig: 0.0,
        };
        let part = simple_decompose(&NoComm, &grid).unwrap().partition;
        let rec = |col, segment, length| CellRecord {
            col,
            row: 0,
            segment,
            length,
            cut_height: 0.0,
            cut_width: 0.0,
            azimuth: 180.0,
            sink: false,
        };
        ChannelGridMap::from_records("map", &grid, &part, net, &[rec(0, 1, 50.0), rec(1, 2, 25.0)], None).unwrap()
    }

    #[test]
    fn serial_cycle_moves_water_downstream() {
        let mut net = network();
        let m = map(&net);
        let sync = ChannelNetworkSync::new("Channel State");
        let mut acc = sync.reset(&mut net);
        acc.local_contribute(&m, 0, 0, 10.0).unwrap();
        assert!(acc.local_contribute(&m, 5, 5, 1.0).is_err());
        assert!(matches!(
            acc.local_contribute(&m, 5, 5, -2.5),
            Err(NetworkError::NoChannelInCell { x: 5, y: 5, .. })
        ));
        acc.local_contribute(&m, 5, 5, 0.0).unwrap();
        let reduced = sync.global_reduce(&NoComm, acc).unwrap();
        assert_eq!(reduced.network().segments()[0].state.lateral_inflow, 10.0);
        let net = reduced.route(3600.0);
        assert!(net.segments()[1].state.inflow > 0.0);
        let out = net.segments()[0].state.outflow;
        assert!(out > 0.0 && out < 10.0);
    }

    #[test]
    fn ncells_and_energy_averages() {
        let mut net = network();
        let m = map(&net);
        let empty = init_segment_ncells(&NoComm, &mut net, &m, &[1, 0], 2).unwrap();
        assert_eq!(empty, vec![2]);
        assert_eq!(net.segments()[0].ncells, 1);

        let sync = ChannelNetworkSync::new("Channel State");
        let mut acc = sync.reset(&mut net);
        let terms = EnergyBudget {
            air_temp: 4.0,
            ..Default::default()
        };
        acc.contribute_energy(&m, 0, 0, &terms);
        let mut reduced = sync.global_reduce(&NoComm, acc).unwrap();
        reduced.average_energy();
        let seg = &reduced.network().segments()[0];
        assert_eq!(seg.energy.air_temp, 4.0);
        assert_eq!(seg.energy.azimuth, 180.0);
    }
}
