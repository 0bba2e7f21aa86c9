//! Replicated stream-channel network.
//!
//! Every worker holds the whole network (segments, classes, routing
//! order) but only the channel cells of its own partition. Lateral inflow
//! and heat-budget terms are collected locally, reduced across workers with
//! [`sync::ChannelNetworkSync`], and then every worker routes the same
//! network.

pub mod error;
pub mod grid_map;
pub mod network;
pub mod sync;

pub use error::{NetworkError, NetworkIssue};
pub use grid_map::{CellRecord, ChannelCell, ChannelGridMap};
pub use network::{
    ChannelClass, ChannelNetwork, ChannelSegment, CrownType, EnergyBudget, MassBalance,
    SegmentRecord,
};
pub use sync::{Accumulating, ChannelNetworkSync, Reduced, init_segment_ncells};
