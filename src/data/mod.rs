//! Data module: distributed arrays and halo patches

pub mod distributed_array;
pub mod patch;

pub use distributed_array::{
    DistributedArray, Distribution, DistributionHint, Element, ElementType, Region,
};
pub use patch::{GhostSides, Patch, RowOrientation, push_local_map};
