//! Camera management
//!
//! Cameras are created through the [`CameraSet`] registry and referenced by
//! id from viewports and draw calls:
//! - Perspective cameras that follow a target actor (eye height, view pitch)
//! - Top-down chase mode that floats with the target's speed
//! - Active-camera fallback when a draw call passes no camera

use crate::math::{cosine_interpolate, mat4_mul, mat4_perspective, mat4_view, Mat4, Vec3};
use crate::render::visibility::Frustum;

use std::collections::HashMap;

/// Default vertical field of view, in degrees.
pub const DEFAULT_FOV: f32 = 75.0;
/// Default near clip distance.
pub const DEFAULT_NEAR: f32 = 0.1;
/// Default far clip distance.
pub const DEFAULT_FAR: f32 = 1_000_000.0;

/// Resting height of the top-down camera above its target.
const CHASE_MIN_HEIGHT: f32 = 256.0;
/// Height the top-down camera eases towards at full speed.
const CHASE_MAX_HEIGHT: f32 = 1024.0;

/// How a camera derives its transform when following a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraMode {
    #[default]
    Perspective,
    Top,
    Left,
    Front,
}

/// How the world is presented through this camera. Solid and textured both
/// take the material path; wireframe swaps the whole draw for face outlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrawMode {
    Wireframe,
    Solid,
    #[default]
    Textured,
}

/// Handle to a camera owned by a [`CameraSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CameraId(pub u32);

/// Something a camera can follow: position, facing and eye parameters.
///
/// Implemented by actors; the camera never holds a reference to its target,
/// callers pass it in each frame.
pub use crate::actor::CameraTarget;

#[derive(Debug, Clone)]
pub struct Camera {
    pub tag: String,
    pub mode: CameraMode,
    pub draw_mode: DrawMode,
    pub position: Vec3,
    pub angles: Vec3,
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            mode: CameraMode::Perspective,
            draw_mode: DrawMode::default(),
            position: Vec3::ZERO,
            angles: Vec3::ZERO,
            fov: DEFAULT_FOV,
            near: DEFAULT_NEAR,
            far: DEFAULT_FAR,
        }
    }

    /// Updates position and angles from the follow target, per mode.
    ///
    /// Perspective adopts the target's eye position (view offset replaces the
    /// target's own height) and view pitch, yawed to face along the target.
    /// Top keeps its own yaw, pitches down at -75 degrees and floats above the
    /// target, climbing from [`CHASE_MIN_HEIGHT`] toward [`CHASE_MAX_HEIGHT`]
    /// as the target speeds up. Left and Front leave the camera where it was
    /// placed.
    pub fn update_from_target(&mut self, target: Option<&dyn CameraTarget>) {
        let (follow_angles, follow_position) = match target {
            Some(target) => {
                let angles = Vec3::new(target.view_pitch(), -target.angles().y + 90.0, 0.0);
                let mut position = target.position();
                position.y = target.view_offset();
                (angles, position)
            }
            None => (Vec3::ZERO, Vec3::ZERO),
        };

        match self.mode {
            CameraMode::Perspective => {
                self.angles = follow_angles;
                self.position = follow_position;
            }
            CameraMode::Top => {
                let speed = match target {
                    Some(target) => (target.velocity().len() / 16.0).min(1.0),
                    None => 0.0,
                };
                self.angles.x = -75.0;
                self.position = follow_position;
                self.position.x -= 150.0;
                self.position.y +=
                    CHASE_MIN_HEIGHT + cosine_interpolate(CHASE_MIN_HEIGHT, CHASE_MAX_HEIGHT, speed);
            }
            CameraMode::Left | CameraMode::Front => {}
        }
    }

    #[inline]
    pub fn projection(&self, aspect: f32) -> Mat4 {
        mat4_perspective(self.fov, aspect, self.near, self.far)
    }

    #[inline]
    pub fn view(&self) -> Mat4 {
        mat4_view(self.position, self.angles)
    }

    #[inline]
    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        mat4_mul(&self.projection(aspect), &self.view())
    }

    pub fn frustum(&self, aspect: f32) -> Frustum {
        Frustum::from_view_proj(&self.view_projection(aspect))
    }
}

/// Owns every live camera and tracks which one is active.
pub struct CameraSet {
    cameras: HashMap<CameraId, Camera>,
    next_id: u32,
    active: Option<CameraId>,
}

impl CameraSet {
    pub fn new() -> Self {
        Self {
            cameras: HashMap::new(),
            next_id: 0,
            active: None,
        }
    }

    pub fn create(&mut self, tag: &str, position: Vec3, angles: Vec3) -> CameraId {
        let id = CameraId(self.next_id);
        self.next_id += 1;

        let mut camera = Camera::new(tag);
        camera.position = position;
        camera.angles = angles;
        self.cameras.insert(id, camera);
        id
    }

    /// Removes the camera; the active camera is unset if it was this one.
    pub fn destroy(&mut self, id: CameraId) {
        self.cameras.remove(&id);
        if self.active == Some(id) {
            self.active = None;
        }
    }

    pub fn get(&self, id: CameraId) -> Option<&Camera> {
        self.cameras.get(&id)
    }

    pub fn get_mut(&mut self, id: CameraId) -> Option<&mut Camera> {
        self.cameras.get_mut(&id)
    }

    pub fn set_active(&mut self, id: Option<CameraId>) {
        self.active = id;
    }

    pub fn active(&self) -> Option<CameraId> {
        self.active
    }

    /// The camera a draw call should use: the given one, else the active one.
    pub fn resolve(&self, id: Option<CameraId>) -> Option<&Camera> {
        id.or(self.active).and_then(|id| self.cameras.get(&id))
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }
}

impl Default for CameraSet {
    fn default() -> Self {
        Self::new()
    }
}
