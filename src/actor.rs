//! Seams to the actor and entity systems.
//!
//! The renderer draws whatever lives in a sector but owns none of it;
//! these traits are the boundary. Implementations live with the game or
//! editor layer.

use log::debug;
use std::collections::HashMap;

use crate::math::Vec3;
use crate::render::camera::Camera;
use crate::render::device::RenderDevice;

/// Handle tying a registry entry to the sectors that list it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActorId(pub u32);

/// Anything drawable that resides in a sector (actors, entity components).
pub trait ActorDraw {
    fn draw(&self, device: &mut dyn RenderDevice, camera: &Camera);
}

/// Receiver for the world's entity-spawn descriptors. The property tree is
/// passed through untouched.
pub trait EntitySpawner {
    fn spawn(&mut self, prefab: &str, properties: &ron::Value);
}

/// State a camera needs from the actor it follows.
pub trait CameraTarget {
    fn position(&self) -> Vec3;
    /// Euler angles (degrees); y is the facing yaw.
    fn angles(&self) -> Vec3;
    /// Pitch applied to the camera when following (degrees).
    fn view_pitch(&self) -> f32;
    fn velocity(&self) -> Vec3;
    /// Eye height above the actor origin.
    fn view_offset(&self) -> f32;
}

/// Registry of drawable occupants, keyed by the ids sectors carry.
#[derive(Default)]
pub struct ActorRegistry {
    actors: HashMap<ActorId, Box<dyn ActorDraw>>,
    next_id: u32,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, actor: Box<dyn ActorDraw>) -> ActorId {
        let id = ActorId(self.next_id);
        self.next_id += 1;
        self.actors.insert(id, actor);
        id
    }

    pub fn remove(&mut self, id: ActorId) -> Option<Box<dyn ActorDraw>> {
        self.actors.remove(&id)
    }

    pub fn get(&self, id: ActorId) -> Option<&dyn ActorDraw> {
        self.actors.get(&id).map(|a| a.as_ref())
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// Draw every listed actor that is still registered. Stale ids are
    /// skipped; sectors are not told when actors die.
    pub fn draw_actors(
        &self,
        ids: &[ActorId],
        device: &mut dyn RenderDevice,
        camera: &Camera,
    ) {
        for id in ids {
            match self.actors.get(id) {
                Some(actor) => actor.draw(device, camera),
                None => debug!("sector lists unregistered actor {id:?}"),
            }
        }
    }
}
