//! Scene management
//!
//! Cameras feeding the per-frame state and the default gear grid.

mod camera;
mod grid;

pub use camera::*;
pub use grid::*;
