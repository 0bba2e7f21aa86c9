//! Cell neighborhoods and terrain-derived flow geometry.

pub mod neighbors;
pub mod terrain;

pub use neighbors::{DIRECTIONS4, NDIRS, NEIGHBORS8, NNEIGHBORS, is_valid_cell};
pub use terrain::{FlowClass, FlowDirections, TerrainField, elevation_slope_aspect};
