//! Channel network errors

use itertools::Itertools;
use thiserror::Error;

/// One problem found while validating channel input records.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NetworkIssue {
    #[error("class {class}: {reason}")]
    InvalidClass { class: u32, reason: &'static str },
    #[error("class {class} defined more than once")]
    DuplicateClass { class: u32 },
    #[error("record {record}: segment id {id} must be a positive integer")]
    InvalidId { record: usize, id: i64 },
    #[error("segment {id} defined more than once")]
    DuplicateId { id: u32 },
    #[error("segment {id}: order {order} must be at least 1")]
    InvalidOrder { id: i64, order: i64 },
    #[error("segment {id}: slope {slope} must be positive")]
    InvalidSlope { id: i64, slope: f32 },
    #[error("segment {id}: length {length} must be positive")]
    InvalidLength { id: i64, length: f32 },
    #[error("segment {id}: unknown channel class {class}")]
    UnknownClass { id: i64, class: u32 },
    #[error("segment {id}: outlet {outlet} is not a segment")]
    UnknownOutlet { id: u32, outlet: i64 },
    #[error("segment {id}: order {order} must be below order {outlet_order} of its outlet {outlet}")]
    OrderNotIncreasing {
        id: u32,
        order: u32,
        outlet: u32,
        outlet_order: u32,
    },
    #[error("map record {record}: cell ({col}, {row}) is outside the grid")]
    CellOutsideGrid { record: usize, col: i64, row: i64 },
    #[error("map record {record}: unknown segment {segment}")]
    UnknownSegment { record: usize, segment: i64 },
    #[error("map record {record}: negative {field} {value}")]
    NegativeValue {
        record: usize,
        field: &'static str,
        value: f32,
    },
}

/// Errors from loading and synchronizing the channel network.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NetworkError {
    /// Input records failed validation; all problems are listed.
    #[error("{input}: {} invalid channel record(s)\n{}", .issues.len(), .issues.iter().join("\n"))]
    Invalid {
        input: String,
        issues: Vec<NetworkIssue>,
    },
    /// Lateral inflow was handed to a cell without a channel.
    #[error("cell ({x}, {y}) has no channel to take {mass} of lateral inflow")]
    NoChannelInCell { x: usize, y: usize, mass: f64 },
    /// The shared state vector was created for a different network.
    #[error("channel state `{name}` holds {actual} segments, network has {expected}")]
    StateMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
}
