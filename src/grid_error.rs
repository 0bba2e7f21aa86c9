//! GridError: unified error type for basin-decomp public APIs
//!
//! Subsystem errors ([`PartitionError`], [`NetworkError`]) convert into this
//! type with `?`; the driver uses [`GridError::component`] and
//! [`GridError::exit_code`] to print a fatal diagnostic and terminate.

use thiserror::Error;

use crate::channel::error::NetworkError;
use crate::partitioning::error::PartitionError;

/// Unified error type for basin-decomp operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GridError {
    /// A distributed array could not be laid out.
    #[error("cannot distribute `{array}`: {reason}")]
    Distribution { array: String, reason: String },
    /// A put/get/accumulate region leaves the array's global shape.
    #[error("region rows {rows:?} cols {cols:?} outside `{array}` of shape {shape:?}")]
    RegionOutOfBounds {
        array: String,
        rows: std::ops::Range<usize>,
        cols: std::ops::Range<usize>,
        shape: (usize, usize),
    },
    /// Caller buffer does not match the region it describes.
    #[error("buffer for `{array}` holds {actual} elements, region needs {expected}")]
    BufferLength {
        array: String,
        expected: usize,
        actual: usize,
    },
    /// Workers issued diverging collective calls.
    #[error("collective mismatch: {0}")]
    CollectiveMismatch(String),
    /// The worker pool could not be started or a worker died.
    #[error("worker pool failure: {0}")]
    WorkerPool(String),
    /// A structural invariant did not hold.
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error(transparent)]
    Partition(#[from] PartitionError),
    #[error(transparent)]
    Network(#[from] NetworkError),
}

impl GridError {
    /// Name of the failing subsystem, used as the prefix of fatal diagnostics.
    pub fn component(&self) -> &'static str {
        match self {
            GridError::Distribution { .. }
            | GridError::RegionOutOfBounds { .. }
            | GridError::BufferLength { .. } => "distributed-array",
            GridError::CollectiveMismatch(_) | GridError::WorkerPool(_) => "communicator",
            GridError::Invariant(_) => "invariants",
            GridError::Partition(_) => "partitioner",
            GridError::Network(_) => "channel-network",
        }
    }

    /// Process exit status for a fatal error of this kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            GridError::Distribution { .. }
            | GridError::RegionOutOfBounds { .. }
            | GridError::BufferLength { .. } => 2,
            GridError::CollectiveMismatch(_) | GridError::WorkerPool(_) => 3,
            GridError::Invariant(_) => 4,
            GridError::Partition(_) => 5,
            GridError::Network(_) => 6,
        }
    }
}
