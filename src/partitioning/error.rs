//! Domain decomposition errors

use thiserror::Error;

/// Errors from mask-weighted decomposition and its configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// The in-basin mask has no active cell anywhere in the domain.
    #[error("basin mask has no active cells")]
    EmptyMask,
    /// Mask buffer does not cover the worker's partition.
    #[error("mask holds {actual} cells, local partition has {expected}")]
    MaskLength { expected: usize, actual: usize },
    /// Unrecognized decomposition keyword in the configuration.
    #[error("unknown decomposition `{0}` (expected SIMPLE, MASKED, STRIPED, STRIPEX or STRIPEY)")]
    UnknownStrategy(String),
}
