//! Sector/portal renderer
//!
//! Draws worlds through an abstract [`device::RenderDevice`], so the same
//! pipeline runs against a real driver or the recording test device.
//!
//! - Recursive sector walk through open portal and mirror faces
//! - Per-material face batching with a fallback for unresolved slots
//! - Frustum culling against per-face bounds
//! - Multi-pass materials with scene lighting, fog and builtin variables
//! - Layered scrolling sky
//!
//! # Module Organization
//!
//! - `device` - the render device trait, handles and the recording device
//! - `context` - per-frame state: options, pass state, frame stats, caches
//! - `camera` - cameras, follow modes and projection/view/frustum math
//! - `viewport` - viewport slots with frame timing
//! - `material` - material documents, the material cache and pass submission
//! - `visibility` - frustum extraction and face visibility
//! - `world` - the world draw path: sky, sector recursion, batching

pub mod camera;
pub mod context;
pub mod device;
pub mod material;
pub mod viewport;
pub mod visibility;
pub mod world;

pub use camera::{Camera, CameraId, CameraMode, CameraSet, DrawMode};
pub use context::{FrameStats, PassState, RenderContext, RenderOptions, SceneState};
pub use device::{
    BlendFactor, CullMode, DeviceError, FilterMode, MeshHandle, ProgramHandle, RenderDevice,
    TextureHandle, UniformValue,
};
pub use material::{MaterialCache, MaterialData, MaterialId, PassData};
pub use viewport::{Viewport, ViewportId, ViewportSet};
pub use visibility::{FaceKey, Frustum};
pub use world::{begin_draw, draw_wireframe, draw_world};
