//! Collective algorithms over the worker group.

pub mod communicator;
pub mod redistribute;
pub mod reduction;
pub mod wire;

pub use communicator::{Communicator, NoComm, ThreadComm, WorkerGroup};
pub use redistribute::{AvalancheOutcome, AvalancheParams, avalanche, scatter_to_neighbors};
pub use reduction::{ReduceOp, global_reduce, global_sum};
