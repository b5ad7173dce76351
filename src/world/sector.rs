//! Sectors, world-global properties, and the world container.

use serde::{Deserialize, Serialize};
use std::rc::Rc;
use std::time::SystemTime;

use crate::actor::{ActorId, EntitySpawner};
use crate::math::{
    mat4_from_position_rotation, mat4_mul, mat4_scale, Aabb, ColorF, Mat4, Vec3,
};
use crate::world::mesh::WorldMesh;

/// Sky material layer cap per world.
pub const MAX_SKY_LAYERS: usize = 4;
/// Lights handed to a single material pass.
pub const MAX_LIGHTS_PER_PASS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LightType {
    #[default]
    Omni,
    Spot,
    Sun,
}

/// A light placed in a sector.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Light {
    #[serde(default)]
    pub light_type: LightType,
    pub position: Vec3,
    #[serde(default)]
    pub angles: Vec3,
    pub color: ColorF,
    pub radius: f32,
}

/// Local position/rotation/scale applied to a static placement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    /// Rotation in euler angles (degrees)
    pub rotation: Vec3,
    #[serde(default = "default_scale")]
    pub scale: f32,
}

fn default_scale() -> f32 {
    1.0
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        position: Vec3::ZERO,
        rotation: Vec3::ZERO,
        scale: 1.0,
    };

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            rotation: Vec3::ZERO,
            scale: 1.0,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        let m = mat4_from_position_rotation(self.position, self.rotation);
        mat4_mul(&m, &mat4_scale(Vec3::new(self.scale, self.scale, self.scale)))
    }
}

impl Default for Transform {
    fn default() -> Self {
        Transform::IDENTITY
    }
}

/// A mesh placed statically inside a sector (decoration, not an actor).
#[derive(Debug, Clone)]
pub struct StaticObject {
    pub mesh: Rc<WorldMesh>,
    pub transform: Transform,
}

/// A named spatial cell of the world: one body mesh plus everything
/// logically inside it. Sectors share meshes through the cache and never
/// own them exclusively.
#[derive(Debug, Clone, Default)]
pub struct WorldSector {
    pub name: String,
    pub mesh: Option<Rc<WorldMesh>>,
    pub objects: Vec<StaticObject>,
    pub actors: Vec<ActorId>,
    pub lights: Vec<Light>,
    /// Containment volume used by `World::sector_by_global_origin`.
    pub bounds: Aabb,
}

impl WorldSector {
    /// Lights to hand to the material passes for this sector. A static
    /// authored list capped per pass; nothing here computes volumes.
    pub fn visible_lights(&self) -> &[Light] {
        let count = self.lights.len().min(MAX_LIGHTS_PER_PASS);
        &self.lights[..count]
    }
}

/// Global render properties carried by the world file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldProperties {
    #[serde(default = "default_ambience")]
    pub ambience: ColorF,
    #[serde(default = "default_sun_color")]
    pub sun_color: ColorF,
    #[serde(default = "default_sun_position")]
    pub sun_position: Vec3,
    #[serde(default = "default_clear_color")]
    pub clear_color: ColorF,
    #[serde(default)]
    pub fog_color: ColorF,
    #[serde(default = "default_fog_near")]
    pub fog_near: f32,
    #[serde(default = "default_fog_far")]
    pub fog_far: f32,
    /// Sky layer material paths, innermost first; at most [`MAX_SKY_LAYERS`].
    #[serde(default)]
    pub sky_materials: Vec<String>,
}

fn default_ambience() -> ColorF {
    ColorF::new(0.4, 0.4, 0.4, 1.0)
}

fn default_sun_color() -> ColorF {
    ColorF::new(1.0, 1.0, 1.0, 1.25)
}

fn default_sun_position() -> Vec3 {
    Vec3::new(0.5, -1.0, 0.5)
}

fn default_clear_color() -> ColorF {
    ColorF::new(0.0, 0.0, 0.0, 1.0)
}

fn default_fog_near() -> f32 {
    32.0
}

fn default_fog_far() -> f32 {
    1024.0
}

impl Default for WorldProperties {
    fn default() -> Self {
        Self {
            ambience: default_ambience(),
            sun_color: default_sun_color(),
            sun_position: default_sun_position(),
            clear_color: default_clear_color(),
            fog_color: ColorF::default(),
            fog_near: default_fog_near(),
            fog_far: default_fog_far(),
            sky_materials: Vec::new(),
        }
    }
}

/// An entity-spawn descriptor copied verbatim from the world file. The
/// properties stay an opaque tree; the entity system interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldEntity {
    pub prefab: String,
    #[serde(default = "default_entity_properties")]
    pub properties: ron::Value,
}

fn default_entity_properties() -> ron::Value {
    ron::Value::Unit
}

/// Aggregate root: sectors, the meshes they share, global properties,
/// and the entity descriptors to spawn into this world.
#[derive(Default)]
pub struct World {
    /// Source path, `None` for worlds built in memory.
    pub path: Option<String>,
    pub properties: WorldProperties,
    pub entities: Vec<WorldEntity>,
    /// Mesh pool in file order; sectors index into this.
    pub meshes: Vec<Rc<WorldMesh>>,
    pub sectors: Vec<WorldSector>,
    pub last_save: Option<SystemTime>,
    dirty: bool,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the sector containing `point`. Linear scan, first AABB hit
    /// wins; overlapping or boundary cases are not disambiguated. A point
    /// inside no sector maps to sector 0, so this only returns `None` for
    /// a world with no sectors at all.
    pub fn sector_by_global_origin(&self, point: Vec3) -> Option<&WorldSector> {
        self.sectors
            .iter()
            .find(|sector| sector.bounds.contains_point(point))
            .or_else(|| self.sectors.first())
    }

    /// Index variant of the lookup, for callers that hold sector indices.
    pub fn sector_index_by_global_origin(&self, point: Vec3) -> Option<usize> {
        self.sectors
            .iter()
            .position(|sector| sector.bounds.contains_point(point))
            .or(if self.sectors.is_empty() { None } else { Some(0) })
    }

    pub fn sector_by_index(&self, index: usize) -> Option<&WorldSector> {
        self.sectors.get(index)
    }

    pub fn sector_by_index_mut(&mut self, index: usize) -> Option<&mut WorldSector> {
        self.sectors.get_mut(index)
    }

    /// Hand every spawn descriptor to the entity system.
    pub fn spawn_entities(&self, spawner: &mut dyn EntitySpawner) {
        for entity in &self.entities {
            spawner.spawn(&entity.prefab, &entity.properties);
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Flag the world as modified since the last save.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
        self.last_save = Some(SystemTime::now());
    }
}
