//! World module - sector/portal indoor environments
//!
//! - Polygon mesh geometry with per-face material and portal data
//! - Sectors connected by portal and mirror faces
//! - Shared mesh pool with path-keyed caching
//! - Compressed RON documents for worlds and meshes

mod format;
mod mesh;
mod sector;

pub use format::*;
pub use mesh::*;
pub use sector::*;
