//! Server process implementations.
//!
//! - map: the map-server simulation loop
pub mod map;
