//! Resource management
//!
//! Procedural meshes and the packed mesh store the pipeline draws from.

mod mesh;
mod mesh_pack;

pub use mesh::*;
pub use mesh_pack::*;
