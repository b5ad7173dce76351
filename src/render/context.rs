//! Render context
//!
//! Bundles the state a frame of world rendering reads and writes: tunable
//! options, the recursion pass state, frame statistics, and the shared
//! mesh/material/camera/viewport registries. Passing the context explicitly
//! keeps the renderer free of global state; two contexts never interfere.

use serde::{Deserialize, Serialize};

use crate::render::camera::CameraSet;
use crate::render::device::{DeviceError, RenderDevice};
use crate::render::material::MaterialCache;
use crate::render::viewport::ViewportSet;
use crate::render::world::SkyMesh;
use crate::world::{MeshCache, World, WorldError, WorldProperties, MAX_LIGHTS_PER_PASS};

/// Renderer tunables, persisted alongside other settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Frustum-cull faces against their bounds. Off draws everything.
    #[serde(default = "default_cull_faces")]
    pub cull_faces: bool,
    /// Recursion cap shared by mirror and portal faces.
    #[serde(default = "default_max_portal_depth")]
    pub max_portal_depth: u32,
    /// Height of the sky relative to the camera.
    #[serde(default = "default_sky_height_offset")]
    pub sky_height_offset: f32,
    /// Lights handed to a material pass, at most the sector cap.
    #[serde(default = "default_max_lights_per_pass")]
    pub max_lights_per_pass: usize,
}

fn default_cull_faces() -> bool {
    true
}

fn default_max_portal_depth() -> u32 {
    4
}

fn default_sky_height_offset() -> f32 {
    10.0
}

fn default_max_lights_per_pass() -> usize {
    MAX_LIGHTS_PER_PASS
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            cull_faces: true,
            max_portal_depth: 4,
            sky_height_offset: 10.0,
            max_lights_per_pass: MAX_LIGHTS_PER_PASS,
        }
    }
}

/// Recursion state for the current sector walk. `depth` counts nested
/// portal/mirror hops; `mirror` is set while inside any mirrored branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassState {
    pub mirror: bool,
    pub depth: u32,
}

/// Counters reset at the start of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    /// Material passes submitted.
    pub batches: usize,
    /// Triangles submitted across all batches.
    pub triangles: usize,
    /// Faces staged into batches.
    pub faces_drawn: usize,
    /// Portal-class faces that survived visibility.
    pub visible_portals: usize,
}

/// Draw-time globals materials read: the world's lighting/fog properties,
/// the viewport dimensions, and the engine tick count.
pub struct SceneState<'a> {
    pub properties: &'a WorldProperties,
    pub viewport_size: (u32, u32),
    pub ticks: u64,
}

/// Everything world rendering needs between frames.
pub struct RenderContext {
    pub options: RenderOptions,
    pub pass: PassState,
    pub stats: FrameStats,
    pub materials: MaterialCache,
    pub meshes: MeshCache,
    pub cameras: CameraSet,
    pub viewports: ViewportSet,
    pub ticks: u64,
    pub(crate) sky: Option<SkyMesh>,
}

impl RenderContext {
    /// Build a context with its fallback material resources.
    pub fn new(device: &mut dyn RenderDevice) -> Result<Self, DeviceError> {
        Ok(Self {
            options: RenderOptions::default(),
            pass: PassState::default(),
            stats: FrameStats::default(),
            materials: MaterialCache::new(device)?,
            meshes: MeshCache::new(),
            cameras: CameraSet::new(),
            viewports: ViewportSet::new(),
            ticks: 0,
            sky: None,
        })
    }

    /// Reset per-frame counters and stamp the tick count materials see.
    pub fn begin_frame(&mut self, ticks: u64) {
        self.stats = FrameStats::default();
        self.pass = PassState::default();
        self.ticks = ticks;
    }

    /// Load a world through this context's mesh and material caches.
    pub fn load_world(
        &mut self,
        path: &str,
        device: &mut dyn RenderDevice,
    ) -> Result<World, WorldError> {
        crate::world::load_world(path, device, &mut self.meshes, &mut self.materials)
    }

    /// Drop cached meshes nothing references anymore.
    pub fn flush_meshes(&mut self, device: &mut dyn RenderDevice) {
        self.meshes.flush_unreferenced(device);
    }
}
