//! Replicated channel-segment forest and linear-reservoir routing.
//!
//! Every worker holds the whole network. Segments live in an arena and
//! point at their outlet by index; a segment without an outlet discharges
//! out of the network.

use hashbrown::HashMap;
use log::{error, info};
use serde::{Deserialize, Serialize};

use super::error::{NetworkError, NetworkIssue};
use crate::debug_invariants::DebugInvariants;
use crate::grid_error::GridError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrownType {
    #[default]
    Outsloped,
    Crowned,
    Insloped,
}

/// Hydraulic class shared by segments of similar geometry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelClass {
    pub id: u32,
    pub width: f32,
    pub bank_height: f32,
    /// Manning's n.
    pub friction: f32,
    #[serde(default)]
    pub infiltration: f32,
    #[serde(default)]
    pub crown: CrownType,
}

/// One row of the network definition table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub id: i64,
    pub order: i64,
    pub slope: f32,
    pub length: f32,
    pub class: u32,
    /// Downstream segment; absent or 0 for a network outlet.
    #[serde(default)]
    pub outlet: Option<i64>,
    /// Name under which the segment's flow is recorded, if any.
    #[serde(default)]
    pub record_name: Option<String>,
}

/// Mass-balance state of a segment (volumes per time step).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MassBalance {
    pub inflow: f64,
    pub outflow: f64,
    pub storage: f64,
    pub lateral_inflow: f64,
}

/// Heat-budget terms gathered from the cells a segment crosses.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EnergyBudget {
    pub air_temp: f64,
    pub incident_shortwave: f64,
    pub net_shortwave: f64,
    pub beam: f64,
    pub diffuse: f64,
    pub incident_longwave: f64,
    pub net_longwave: f64,
    pub vapor_pressure: f64,
    pub wind: f64,
    /// Length-weighted mean azimuth (degrees); not averaged by cell count.
    pub azimuth: f64,
    pub skyview: f64,
}

impl EnergyBudget {
    pub const FIELDS: usize = 11;

    pub fn to_array(&self) -> [f64; Self::FIELDS] {
        [
            self.air_temp,
            self.incident_shortwave,
            self.net_shortwave,
            self.beam,
            self.diffuse,
            self.incident_longwave,
            self.net_longwave,
            self.vapor_pressure,
            self.wind,
            self.azimuth,
            self.skyview,
        ]
    }

    pub fn from_array(v: [f64; Self::FIELDS]) -> Self {
        let [
            air_temp,
            incident_shortwave,
            net_shortwave,
            beam,
            diffuse,
            incident_longwave,
            net_longwave,
            vapor_pressure,
            wind,
            azimuth,
            skyview,
        ] = v;
        Self {
            air_temp,
            incident_shortwave,
            net_shortwave,
            beam,
            diffuse,
            incident_longwave,
            net_longwave,
            vapor_pressure,
            wind,
            azimuth,
            skyview,
        }
    }

    /// Divide every cell-summed term by `n`; azimuth is already a mean.
    pub fn average_over(&mut self, n: u32) {
        if n == 0 {
            return;
        }
        let azimuth = self.azimuth;
        let mut v = self.to_array();
        v.iter_mut().for_each(|t| *t /= n as f64);
        *self = Self::from_array(v);
        self.azimuth = azimuth;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChannelSegment {
    pub id: u32,
    pub order: u32,
    pub slope: f32,
    pub length: f32,
    /// Index into [`ChannelNetwork::classes`].
    pub class: usize,
    /// Reservoir constant (1/s).
    pub k: f64,
    /// `exp(-k·dt)`.
    pub x: f64,
    pub state: MassBalance,
    pub last: MassBalance,
    pub energy: EnergyBudget,
    /// In-basin grid cells the segment crosses, over all workers.
    pub ncells: u32,
    pub outlet: Option<usize>,
    pub record_name: Option<String>,
}

impl ChannelSegment {
    pub fn is_recorded(&self) -> bool {
        self.record_name.is_some()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChannelNetwork {
    segments: Vec<ChannelSegment>,
    classes: Vec<ChannelClass>,
    index: HashMap<u32, usize>,
    route_order: Vec<usize>,
    dt: Option<f64>,
}

impl ChannelNetwork {
    /// Build and validate a network. Every problem in `classes` and
    /// `records` is collected and reported in one error.
    pub fn from_records(
        input: &str,
        classes: Vec<ChannelClass>,
        records: &[SegmentRecord],
    ) -> Result<Self, NetworkError> {
        let mut issues = Vec::new();

        let mut class_index = HashMap::with_capacity(classes.len());
        for (i, c) in classes.iter().enumerate() {
            if class_index.insert(c.id, i).is_some() {
                issues.push(NetworkIssue::DuplicateClass { class: c.id });
            }
            let reason = if !(c.width > 0.0) {
                Some("width must be positive")
            } else if !(c.bank_height > 0.0) {
                Some("bank height must be positive")
            } else if !(c.friction > 0.0) {
                Some("friction must be positive")
            } else {
                None
            };
            if let Some(reason) = reason {
                issues.push(NetworkIssue::InvalidClass { class: c.id, reason });
            }
        }

        let mut segments = Vec::with_capacity(records.len());
        let mut index = HashMap::with_capacity(records.len());
        let mut record_segment = vec![None; records.len()];
        for (n, r) in records.iter().enumerate() {
            let before = issues.len();
            if r.id <= 0 || r.id > u32::MAX as i64 {
                issues.push(NetworkIssue::InvalidId { record: n, id: r.id });
            }
            if r.order <= 0 || r.order > u32::MAX as i64 {
                issues.push(NetworkIssue::InvalidOrder { id: r.id, order: r.order });
            }
            if !(r.slope > 0.0) {
                issues.push(NetworkIssue::InvalidSlope { id: r.id, slope: r.slope });
            }
            if !(r.length > 0.0) {
                issues.push(NetworkIssue::InvalidLength { id: r.id, length: r.length });
            }
            let class = class_index.get(&r.class).copied();
            if class.is_none() {
                issues.push(NetworkIssue::UnknownClass { id: r.id, class: r.class });
            }
            let (Some(class), true) = (class, issues.len() == before) else {
                continue;
            };
            let id = r.id as u32;
            if index.insert(id, segments.len()).is_some() {
                issues.push(NetworkIssue::DuplicateId { id });
                continue;
            }
            record_segment[n] = Some(segments.len());
            segments.push(ChannelSegment {
                id,
                order: r.order as u32,
                slope: r.slope,
                length: r.length,
                class,
                k: 0.0,
                x: 0.0,
                state: MassBalance::default(),
                last: MassBalance::default(),
                energy: EnergyBudget::default(),
                ncells: 0,
                outlet: None,
                record_name: r.record_name.clone(),
            });
        }

        for (r, seg) in records.iter().zip(&record_segment) {
            let (Some(outlet), Some(s)) = (r.outlet.filter(|&o| o != 0), *seg) else {
                continue;
            };
            let target = u32::try_from(outlet).ok().and_then(|o| index.get(&o).copied());
            match target {
                Some(t) if segments[t].order <= segments[s].order => {
                    issues.push(NetworkIssue::OrderNotIncreasing {
                        id: segments[s].id,
                        order: segments[s].order,
                        outlet: segments[t].id,
                        outlet_order: segments[t].order,
                    });
                }
                Some(t) => segments[s].outlet = Some(t),
                None => issues.push(NetworkIssue::UnknownOutlet {
                    id: segments[s].id,
                    outlet,
                }),
            }
        }

        if !issues.is_empty() {
            for issue in &issues {
                error!("{input}: {issue}");
            }
            return Err(NetworkError::Invalid {
                input: input.to_string(),
                issues,
            });
        }

        let mut route_order: Vec<usize> = (0..segments.len()).collect();
        route_order.sort_by_key(|&i| segments[i].order);
        let network = Self {
            segments,
            classes,
            index,
            route_order,
            dt: None,
        };
        network.debug_assert_invariants();
        info!(
            "{input}: {} channel segments in {} classes, highest order {}",
            network.segments.len(),
            network.classes.len(),
            network.max_order()
        );
        Ok(network)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[ChannelSegment] {
        &self.segments
    }

    pub fn segments_mut(&mut self) -> &mut [ChannelSegment] {
        &mut self.segments
    }

    pub fn classes(&self) -> &[ChannelClass] {
        &self.classes
    }

    /// Arena index of segment `id`.
    pub fn index_of(&self, id: u32) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn segment(&self, id: u32) -> Option<&ChannelSegment> {
        self.index_of(id).map(|i| &self.segments[i])
    }

    pub fn max_order(&self) -> u32 {
        self.segments.iter().map(|s| s.order).max().unwrap_or(0)
    }

    /// Segments in routing order: increasing order, then input order.
    pub fn route_order(&self) -> &[usize] {
        &self.route_order
    }

    /// Derive the reservoir constants for time step `dt` (seconds):
    /// `k = sqrt(slope)·(0.75·bank_height)^(2/3) / (n·length)`, `x = exp(−k·dt)`.
    pub fn routing_parameters(&mut self, dt: f64) {
        for seg in &mut self.segments {
            let class = &self.classes[seg.class];
            let depth = 0.75 * class.bank_height as f64;
            seg.k = (seg.slope as f64).sqrt() * depth.powf(2.0 / 3.0) / (class.friction as f64 * seg.length as f64);
            seg.x = (-seg.k * dt).exp();
        }
        self.dt = Some(dt);
    }

    /// Start a time step: remember the current state, then clear inflow,
    /// lateral inflow and the heat-budget accumulators.
    pub fn step_initialize(&mut self) {
        for seg in &mut self.segments {
            seg.last = seg.state;
            seg.state.inflow = 0.0;
            seg.state.lateral_inflow = 0.0;
            seg.energy = EnergyBudget::default();
        }
    }

    /// Route all segments through their linear reservoirs, upstream first.
    ///
    /// Inflow and lateral inflow are volumes over `dt`; each segment's
    /// outflow volume is added to its outlet's inflow.
    pub fn route(&mut self, dt: f64) {
        if self.dt != Some(dt) {
            self.routing_parameters(dt);
        }
        for n in 0..self.route_order.len() {
            let i = self.route_order[n];
            let seg = &mut self.segments[i];
            let q = (seg.state.inflow + seg.state.lateral_inflow) / dt;
            let s0 = seg.state.storage;
            let s1 = (q / seg.k + (s0 - q / seg.k) * seg.x).max(0.0);
            let outflow = (q - (s1 - s0) / dt) * dt;
            seg.state.storage = s1;
            seg.state.outflow = outflow;
            let outlet = seg.outlet;
            if let Some(o) = outlet {
                self.segments[o].state.inflow += outflow;
            }
        }
    }

    /// Outflow volume of every recorded segment, by record name.
    pub fn recorded_outflows(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.segments
            .iter()
            .filter_map(|s| s.record_name.as_deref().map(|name| (name, s.state.outflow)))
    }

    pub fn total_storage(&self) -> f64 {
        self.segments.iter().map(|s| s.state.storage).sum()
    }
}

impl DebugInvariants for ChannelNetwork {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "ChannelNetwork");
    }

    fn validate_invariants(&self) -> Result<(), GridError> {
        for seg in &self.segments {
            if let Some(o) = seg.outlet {
                let outlet = self.segments.get(o).ok_or_else(|| {
                    GridError::Invariant(format!("segment {} points at missing outlet #{o}", seg.id))
                })?;
                if outlet.order <= seg.order {
                    return Err(GridError::Invariant(format!(
                        "segment {} (order {}) drains into lower-order segment {} (order {})",
                        seg.id, seg.order, outlet.id, outlet.order
                    )));
                }
            }
        }
        if self.route_order.len() != self.segments.len() {
            return Err(GridError::Invariant("routing order does not cover the network".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class() -> ChannelClass {
        ChannelClass {
            id: 1,
            width: 2.0,
            bank_height: 1.0,
            friction: 0.05,
            infiltration: 0.0,
            crown: CrownType::default(),
        }
    }

    fn rec(id: i64, order: i64, outlet: Option<i64>) -> SegmentRecord {
        SegmentRecord {
            id,
            order,
            slope: 0.01,
            length: 100.0,
            class: 1,
            outlet,
            record_name: None,
        }
    }

    #[test]
    fn all_problems_are_reported_together() {
        let mut bad_slope = rec(4, 1, None);
        bad_slope.slope = 0.0;
        let records = [rec(0, 1, None), rec(2, 0, None), rec(3, 2, Some(9)), bad_slope, rec(3, 1, None)];
        let err = ChannelNetwork::from_records("stream.network", vec![class()], &records).unwrap_err();
        let NetworkError::Invalid { issues, .. } = err else {
            panic!("expected validation error");
        };
        assert!(issues.contains(&NetworkIssue::InvalidId { record: 0, id: 0 }));
        assert!(issues.contains(&NetworkIssue::InvalidOrder { id: 2, order: 0 }));
        assert!(issues.contains(&NetworkIssue::InvalidSlope { id: 4, slope: 0.0 }));
        assert!(issues.contains(&NetworkIssue::DuplicateId { id: 3 }));
        assert!(issues.contains(&NetworkIssue::UnknownOutlet { id: 3, outlet: 9 }));
    }

    #[test]
    fn outlet_must_have_higher_order() {
        let records = [rec(1, 2, Some(2)), rec(2, 2, None)];
        let err = ChannelNetwork::from_records("net", vec![class()], &records).unwrap_err();
        assert!(err.to_string().contains("must be below order 2"));
    }

    #[test]
    fn route_order_is_topological() {
        let records = [rec(3, 3, None), rec(1, 1, Some(2)), rec(2, 2, Some(3)), rec(4, 1, Some(3))];
        let net = ChannelNetwork::from_records("net", vec![class()], &records).unwrap();
        let orders: Vec<u32> = net.route_order().iter().map(|&i| net.segments()[i].order).collect();
        assert_eq!(orders, vec![1, 1, 2, 3]);
        assert_eq!(net.segment(1).and_then(|s| s.outlet), net.index_of(2));
    }

    #[test]
    fn outlet_zero_means_network_outlet() {
        let net = ChannelNetwork::from_records("net", vec![class()], &[rec(7, 1, Some(0))]).unwrap();
        assert_eq!(net.segment(7).unwrap().outlet, None);
    }

    #[test]
    fn step_initialize_keeps_previous_state() {
        let mut net = ChannelNetwork::from_records("net", vec![class()], &[rec(1, 1, None)]).unwrap();
        net.segments_mut()[0].state.lateral_inflow = 3.0;
        net.segments_mut()[0].energy.wind = 2.0;
        net.route(60.0);
        let storage = net.segments()[0].state.storage;
        net.step_initialize();
        let seg = &net.segments()[0];
        assert_eq!(seg.last.lateral_inflow, 3.0);
        assert_eq!(seg.state.lateral_inflow, 0.0);
        assert_eq!(seg.state.storage, storage);
        assert_eq!(seg.energy, EnergyBudget::default());
    }

    #[test]
    fn energy_average_skips_azimuth() {
        let mut e = EnergyBudget {
            wind: 6.0,
            azimuth: 90.0,
            ..Default::default()
        };
        e.average_over(3);
        assert_eq!(e.wind, 2.0);
        assert_eq!(e.azimuth, 90.0);
    }
}
