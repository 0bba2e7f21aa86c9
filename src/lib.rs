#![cfg_attr(docsrs, feature(doc_cfg))]
//! # basin-decomp
//!
//! basin-decomp is the parallel layer of a distributed-memory, grid-based
//! watershed model. It splits the model grid across a group of workers,
//! gives each worker a ghost-cell halo of its neighbors' data, and keeps a
//! stream-channel network that every worker replicates in step.
//!
//! ## Features
//! - Block-distributed 2-D arrays with one-sided put, get and accumulate
//! - Domain decomposition balanced by the in-basin cell count
//! - Halo patches for neighbor reads and flux scatter across worker borders
//! - Slope, aspect and multi-direction flow fractions that honor the basin
//!   boundary and worker borders alike
//! - Per-timestep reduction and redundant routing of the channel network
//!
//! ## Workers
//! Collective operations take a [`Communicator`](algs::communicator::Communicator).
//! [`NoComm`](algs::communicator::NoComm) runs a single worker;
//! [`WorkerGroup::run`](algs::communicator::WorkerGroup::run) starts an
//! in-process SPMD group on a rayon pool. Every worker of a group must
//! issue the same collective calls in the same order.
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! basin-decomp = "0.3"
//! # features = ["check-invariants"]
//! ```

pub mod algs;
pub mod channel;
pub mod data;
pub mod debug_invariants;
pub mod grid_error;
pub mod partitioning;
pub mod topology;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{Communicator, NoComm, ThreadComm, WorkerGroup};
    pub use crate::algs::redistribute::{AvalancheParams, avalanche, scatter_to_neighbors};
    pub use crate::algs::reduction::{ReduceOp, global_reduce, global_sum};
    pub use crate::channel::{
        CellRecord, ChannelClass, ChannelGridMap, ChannelNetwork, ChannelNetworkSync,
        EnergyBudget, SegmentRecord, init_segment_ncells,
    };
    pub use crate::data::distributed_array::{
        DistributedArray, Distribution, DistributionHint, Element, ElementType, Region,
    };
    pub use crate::data::patch::{Patch, RowOrientation, push_local_map};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::grid_error::GridError;
    pub use crate::partitioning::{
        Decomposition, DecompositionConfig, DecompositionKind, GlobalGrid, LocalPartition,
        MaskStrategy, decompose_with_config, describe, masked_decompose, simple_decompose,
    };
    pub use crate::topology::terrain::{
        FlowClass, FlowDirections, TerrainField, elevation_slope_aspect,
    };
}
