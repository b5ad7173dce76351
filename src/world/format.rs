//! World and mesh file IO
//!
//! Both document kinds are RON, optionally brotli-compressed on disk.
//! - Reading: auto-detects format by checking for a plain RON start
//! - Writing: always compresses
//!
//! Documents carry a format version; anything newer than this build
//! understands is rejected rather than half-read.

use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::rc::Rc;

use crate::math::Aabb;
use crate::render::device::{DeviceError, RenderDevice};
use crate::render::material::MaterialCache;
use crate::world::mesh::{MeshCache, WorldFace, WorldMesh, WorldVertex, MAX_FACE_VERTICES};
use crate::world::sector::{
    Light, StaticObject, Transform, World, WorldEntity, WorldProperties, WorldSector,
    MAX_SKY_LAYERS,
};

/// Validation limits to prevent resource exhaustion from malicious files
pub mod limits {
    /// Highest world format version this build understands
    pub const WORLD_VERSION: u32 = 1;
    /// Highest mesh format version this build understands
    pub const MESH_VERSION: u32 = 1;
    /// Maximum sectors per world
    pub const MAX_SECTORS: usize = 4096;
    /// Maximum entity descriptors per world
    pub const MAX_ENTITIES: usize = 4096;
    /// Maximum meshes referenced by one world
    pub const MAX_MESHES: usize = 1024;
    /// Maximum vertices in one mesh
    pub const MAX_MESH_VERTICES: usize = 65_536;
    /// Maximum faces in one mesh
    pub const MAX_MESH_FACES: usize = 65_536;
    /// Maximum materials referenced by one mesh
    pub const MAX_MESH_MATERIALS: usize = 256;
    /// Maximum string length for mesh/material paths
    pub const MAX_STRING_LEN: usize = 256;
    /// Maximum coordinate value (prevents overflow issues)
    pub const MAX_COORD: f32 = 1_000_000.0;
}

/// Error type for world/mesh IO
#[derive(Debug)]
pub enum WorldError {
    IoError(std::io::Error),
    ParseError(ron::error::SpannedError),
    SerializeError(ron::Error),
    /// Document version is newer than [`limits::WORLD_VERSION`] /
    /// [`limits::MESH_VERSION`].
    UnsupportedVersion { found: u32, max: u32 },
    ValidationError(String),
    DeviceError(DeviceError),
}

impl From<std::io::Error> for WorldError {
    fn from(e: std::io::Error) -> Self {
        WorldError::IoError(e)
    }
}

impl From<ron::error::SpannedError> for WorldError {
    fn from(e: ron::error::SpannedError) -> Self {
        WorldError::ParseError(e)
    }
}

impl From<ron::Error> for WorldError {
    fn from(e: ron::Error) -> Self {
        WorldError::SerializeError(e)
    }
}

impl From<DeviceError> for WorldError {
    fn from(e: DeviceError) -> Self {
        WorldError::DeviceError(e)
    }
}

impl std::fmt::Display for WorldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorldError::IoError(e) => write!(f, "IO error: {}", e),
            WorldError::ParseError(e) => write!(f, "Parse error: {}", e),
            WorldError::SerializeError(e) => write!(f, "Serialize error: {}", e),
            WorldError::UnsupportedVersion { found, max } => {
                write!(f, "Unsupported format version ({} > {})", found, max)
            }
            WorldError::ValidationError(e) => write!(f, "Validation error: {}", e),
            WorldError::DeviceError(e) => write!(f, "Device error: {}", e),
        }
    }
}

// =============================================================================
// Document schemas
// =============================================================================

/// On-disk form of a mesh: material paths, a flat vertex buffer, and the
/// face list. Faces serialize their authored fields only; normals and
/// bounds are derived after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    pub version: u32,
    #[serde(default)]
    pub materials: Vec<String>,
    #[serde(default)]
    pub vertices: Vec<WorldVertex>,
    #[serde(default)]
    pub faces: Vec<WorldFace>,
}

/// On-disk form of a sector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorData {
    #[serde(default)]
    pub name: String,
    /// Index into the world's mesh list; `None` for empty sectors.
    #[serde(default)]
    pub mesh: Option<usize>,
    pub bounds: Aabb,
    #[serde(default)]
    pub objects: Vec<ObjectData>,
    #[serde(default)]
    pub lights: Vec<Light>,
}

/// On-disk form of a static placement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectData {
    /// Index into the world's mesh list.
    pub mesh: usize,
    #[serde(default)]
    pub transform: Transform,
}

/// On-disk form of a world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldData {
    pub version: u32,
    #[serde(default)]
    pub properties: WorldProperties,
    #[serde(default)]
    pub entities: Vec<WorldEntity>,
    /// Mesh file paths, loaded through the mesh cache.
    #[serde(default)]
    pub meshes: Vec<String>,
    #[serde(default)]
    pub sectors: Vec<SectorData>,
}

// =============================================================================
// Shared read/write plumbing
// =============================================================================

/// Read a document into a string, transparently decompressing brotli.
pub fn read_document(path: &Path) -> Result<String, WorldError> {
    let bytes = fs::read(path)?;

    // Detect format: RON files start with '(' or whitespace, brotli is binary
    let is_plain_ron = bytes
        .first()
        .map(|&b| b == b'(' || b == b' ' || b == b'\n' || b == b'\r' || b == b'\t')
        .unwrap_or(false);

    if is_plain_ron {
        String::from_utf8(bytes).map_err(|e| {
            WorldError::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid UTF-8: {}", e),
            ))
        })
    } else {
        let mut decompressed = Vec::new();
        brotli::BrotliDecompress(&mut Cursor::new(&bytes), &mut decompressed).map_err(|e| {
            WorldError::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("brotli decompression failed: {}", e),
            ))
        })?;
        String::from_utf8(decompressed).map_err(|e| {
            WorldError::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid UTF-8 after decompression: {}", e),
            ))
        })
    }
}

/// Parse RON text, logging the position of any syntax error.
pub fn parse_document<T: DeserializeOwned>(contents: &str, path: &Path) -> Result<T, WorldError> {
    match ron::from_str(contents) {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(
                "RON parse error in {} at line {} col {}: {}",
                path.display(),
                e.position.line,
                e.position.col,
                e
            );
            Err(e.into())
        }
    }
}

/// Serialize a value as pretty RON and write it brotli-compressed.
pub fn write_document<T: Serialize>(value: &T, path: &Path) -> Result<(), WorldError> {
    let config = ron::ser::PrettyConfig::new()
        .depth_limit(4)
        .indentor("  ".to_string());

    let ron_string = ron::ser::to_string_pretty(value, config)?;

    // Compress with brotli (quality 6, window 22)
    let mut compressed = Vec::new();
    brotli::BrotliCompress(
        &mut Cursor::new(ron_string.as_bytes()),
        &mut compressed,
        &brotli::enc::BrotliEncoderParams {
            quality: 6,
            lgwin: 22,
            ..Default::default()
        },
    )
    .map_err(|e| {
        WorldError::IoError(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("brotli compression failed: {}", e),
        ))
    })?;

    fs::write(path, compressed)?;
    Ok(())
}

// =============================================================================
// Validation
// =============================================================================

/// Check if a float is valid (not NaN or Inf)
fn is_valid_float(f: f32) -> bool {
    f.is_finite() && f.abs() <= limits::MAX_COORD
}

fn validate_path_string(s: &str, context: &str) -> Result<(), String> {
    if s.len() > limits::MAX_STRING_LEN {
        return Err(format!(
            "{}: path too long ({} > {})",
            context,
            s.len(),
            limits::MAX_STRING_LEN
        ));
    }
    Ok(())
}

fn validate_vertex(vertex: &WorldVertex, context: &str) -> Result<(), String> {
    for (axis, value) in [
        ("x", vertex.position.x),
        ("y", vertex.position.y),
        ("z", vertex.position.z),
    ] {
        if !is_valid_float(value) {
            return Err(format!("{}: invalid position.{} = {}", context, axis, value));
        }
    }
    Ok(())
}

/// Validate an entire mesh document
pub fn validate_mesh_data(data: &MeshData) -> Result<(), WorldError> {
    if data.vertices.len() > limits::MAX_MESH_VERTICES {
        return Err(WorldError::ValidationError(format!(
            "too many vertices ({} > {})",
            data.vertices.len(),
            limits::MAX_MESH_VERTICES
        )));
    }
    if data.faces.len() > limits::MAX_MESH_FACES {
        return Err(WorldError::ValidationError(format!(
            "too many faces ({} > {})",
            data.faces.len(),
            limits::MAX_MESH_FACES
        )));
    }
    if data.materials.len() > limits::MAX_MESH_MATERIALS {
        return Err(WorldError::ValidationError(format!(
            "too many materials ({} > {})",
            data.materials.len(),
            limits::MAX_MESH_MATERIALS
        )));
    }

    for (i, material) in data.materials.iter().enumerate() {
        validate_path_string(material, &format!("material[{}]", i))
            .map_err(WorldError::ValidationError)?;
    }
    for (i, vertex) in data.vertices.iter().enumerate() {
        validate_vertex(vertex, &format!("vertex[{}]", i)).map_err(WorldError::ValidationError)?;
    }

    Ok(())
}

/// Validate an entire world document
pub fn validate_world_data(data: &WorldData) -> Result<(), WorldError> {
    if data.sectors.len() > limits::MAX_SECTORS {
        return Err(WorldError::ValidationError(format!(
            "too many sectors ({} > {})",
            data.sectors.len(),
            limits::MAX_SECTORS
        )));
    }
    if data.entities.len() > limits::MAX_ENTITIES {
        return Err(WorldError::ValidationError(format!(
            "too many entities ({} > {})",
            data.entities.len(),
            limits::MAX_ENTITIES
        )));
    }
    if data.meshes.len() > limits::MAX_MESHES {
        return Err(WorldError::ValidationError(format!(
            "too many meshes ({} > {})",
            data.meshes.len(),
            limits::MAX_MESHES
        )));
    }

    for (i, mesh) in data.meshes.iter().enumerate() {
        validate_path_string(mesh, &format!("mesh[{}]", i)).map_err(WorldError::ValidationError)?;
    }
    for (i, entity) in data.entities.iter().enumerate() {
        validate_path_string(&entity.prefab, &format!("entity[{}]", i))
            .map_err(WorldError::ValidationError)?;
    }

    Ok(())
}

// =============================================================================
// Mesh documents
// =============================================================================

/// Load a mesh document (supports both compressed and uncompressed files).
///
/// Data-quality problems are downgraded, not fatal: faces over the vertex
/// cap are clamped, faces indexing outside the vertex buffer are dropped,
/// and out-of-range material slots are cleared, each with a warning.
pub fn load_mesh<P: AsRef<Path>>(path: P) -> Result<MeshData, WorldError> {
    let path = path.as_ref();
    let contents = read_document(path)?;
    let mut data: MeshData = parse_document(&contents, path)?;

    if data.version > limits::MESH_VERSION {
        return Err(WorldError::UnsupportedVersion {
            found: data.version,
            max: limits::MESH_VERSION,
        });
    }

    validate_mesh_data(&data)?;

    let num_vertices = data.vertices.len() as u32;
    let num_materials = data.materials.len();
    let mut kept = Vec::with_capacity(data.faces.len());
    for (i, mut face) in data.faces.drain(..).enumerate() {
        if face.vertices.len() > MAX_FACE_VERTICES {
            warn!(
                "face {} in {} has {} vertices, clamping to {}",
                i,
                path.display(),
                face.vertices.len(),
                MAX_FACE_VERTICES
            );
            face.vertices.truncate(MAX_FACE_VERTICES);
        }
        if face.vertices.iter().any(|&v| v >= num_vertices) {
            warn!(
                "face {} in {} references vertices out of range, dropping it",
                i,
                path.display()
            );
            continue;
        }
        if let Some(slot) = face.material {
            if slot >= num_materials {
                warn!(
                    "face {} in {} has material index {} out of range",
                    i,
                    path.display(),
                    slot
                );
                face.material = None;
            }
        }
        kept.push(face);
    }
    data.faces = kept;

    Ok(data)
}

/// Save a mesh document to a compressed RON file.
pub fn save_mesh<P: AsRef<Path>>(data: &MeshData, path: P) -> Result<(), WorldError> {
    write_document(data, path.as_ref())
}

impl WorldMesh {
    /// Snapshot the authored portion of this mesh for serialization.
    pub fn to_data(&self) -> MeshData {
        MeshData {
            version: limits::MESH_VERSION,
            materials: self.material_paths.clone(),
            vertices: self.vertices.clone(),
            faces: self.faces.clone(),
        }
    }
}

// =============================================================================
// World documents
// =============================================================================

/// Load and parse a world document without resolving meshes or sectors.
pub fn load_world_data<P: AsRef<Path>>(path: P) -> Result<WorldData, WorldError> {
    let path = path.as_ref();
    let contents = read_document(path)?;
    let mut data: WorldData = parse_document(&contents, path)?;

    if data.version > limits::WORLD_VERSION {
        return Err(WorldError::UnsupportedVersion {
            found: data.version,
            max: limits::WORLD_VERSION,
        });
    }

    validate_world_data(&data)?;

    if data.properties.sky_materials.len() > MAX_SKY_LAYERS {
        warn!(
            "{} lists {} sky layers, keeping the first {}",
            path.display(),
            data.properties.sky_materials.len(),
            MAX_SKY_LAYERS
        );
        data.properties.sky_materials.truncate(MAX_SKY_LAYERS);
    }

    Ok(data)
}

/// Load a world and everything it references: meshes through the mesh
/// cache, materials through the material cache, sectors resolved against
/// the loaded mesh pool.
///
/// A mesh file that fails to load fails the world load; a sector or
/// placement indexing outside the mesh pool is only a warning.
pub fn load_world<P: AsRef<Path>>(
    path: P,
    device: &mut dyn RenderDevice,
    mesh_cache: &mut MeshCache,
    material_cache: &mut MaterialCache,
) -> Result<World, WorldError> {
    let path = path.as_ref();
    let data = load_world_data(path)?;

    let mut meshes = Vec::with_capacity(data.meshes.len());
    for mesh_path in &data.meshes {
        meshes.push(mesh_cache.load(mesh_path, device, material_cache)?);
    }

    let mut sectors = Vec::with_capacity(data.sectors.len());
    for (i, sector_data) in data.sectors.iter().enumerate() {
        let mesh = match sector_data.mesh {
            Some(index) => match meshes.get(index) {
                Some(mesh) => Some(Rc::clone(mesh)),
                None => {
                    warn!(
                        "sector {} in {} references mesh {} out of range",
                        i,
                        path.display(),
                        index
                    );
                    None
                }
            },
            None => None,
        };

        let mut objects = Vec::with_capacity(sector_data.objects.len());
        for object in &sector_data.objects {
            match meshes.get(object.mesh) {
                Some(mesh) => objects.push(StaticObject {
                    mesh: Rc::clone(mesh),
                    transform: object.transform,
                }),
                None => warn!(
                    "sector {} in {} places mesh {} out of range, skipping it",
                    i,
                    path.display(),
                    object.mesh
                ),
            }
        }

        let name = if sector_data.name.is_empty() {
            format!("sector{}", i)
        } else {
            sector_data.name.clone()
        };

        sectors.push(WorldSector {
            name,
            mesh,
            objects,
            actors: Vec::new(),
            lights: sector_data.lights.clone(),
            bounds: sector_data.bounds,
        });
    }

    let mut world = World::new();
    world.path = Some(path.display().to_string());
    world.properties = data.properties;
    world.entities = data.entities;
    world.meshes = meshes;
    world.sectors = sectors;
    Ok(world)
}

/// Save a world to a compressed RON file, clearing its dirty flag and
/// stamping the save time.
pub fn save_world<P: AsRef<Path>>(world: &mut World, path: P) -> Result<(), WorldError> {
    let path = path.as_ref();

    let mesh_index = |mesh: &Rc<WorldMesh>| -> Option<usize> {
        world.meshes.iter().position(|m| Rc::ptr_eq(m, mesh))
    };

    let mut sectors = Vec::with_capacity(world.sectors.len());
    for sector in &world.sectors {
        let mesh = match &sector.mesh {
            Some(mesh) => {
                let index = mesh_index(mesh);
                if index.is_none() {
                    warn!(
                        "sector {} body mesh is not in the world pool, dropping the reference",
                        sector.name
                    );
                }
                index
            }
            None => None,
        };

        let mut objects = Vec::with_capacity(sector.objects.len());
        for object in &sector.objects {
            match mesh_index(&object.mesh) {
                Some(index) => objects.push(ObjectData {
                    mesh: index,
                    transform: object.transform,
                }),
                None => warn!(
                    "sector {} placement mesh is not in the world pool, skipping it",
                    sector.name
                ),
            }
        }

        sectors.push(SectorData {
            name: sector.name.clone(),
            mesh,
            bounds: sector.bounds,
            objects,
            lights: sector.lights.clone(),
        });
    }

    let data = WorldData {
        version: limits::WORLD_VERSION,
        properties: world.properties.clone(),
        entities: world.entities.clone(),
        meshes: world.meshes.iter().map(|m| m.path.clone()).collect(),
        sectors,
    };

    write_document(&data, path)?;

    world.path = Some(path.display().to_string());
    world.clear_dirty();
    Ok(())
}
