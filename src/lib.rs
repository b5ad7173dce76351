//! warren: sector/portal world rendering for indoor 3D levels
//!
//! Worlds are built from sectors connected by portal and mirror faces.
//! Drawing walks the sector graph recursively from the camera's position,
//! culling faces against the view frustum and batching the survivors per
//! material:
//! - Mirror faces re-draw their own sector through a reflection transform
//! - Portal faces draw the linked sector aligned behind the opening
//! - Worlds, meshes and materials load from compressed RON documents

/// Version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod actor;
pub mod math;
pub mod render;
pub mod world;
