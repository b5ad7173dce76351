//! Polygon mesh geometry: faces, triangulation, derived bounds,
//! and the shared path-keyed mesh cache.

use bitflags::bitflags;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::rc::Rc;

use crate::math::{Aabb, Color, Vec2, Vec3};
use crate::render::device::{MeshHandle, RenderDevice};
use crate::render::material::{MaterialCache, MaterialId};
use crate::world::format::{self, WorldError};

/// Upper bound on vertices per face; loaders clamp anything beyond it.
pub const MAX_FACE_VERTICES: usize = 32;

bitflags! {
    /// Face behavior bits, stored as a single byte in mesh files.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FaceFlags: u8 {
        /// Face connects to another sector.
        const PORTAL = 1 << 0;
        /// Face reflects its own sector back at itself.
        const MIRROR = 1 << 1;
        /// Face is never selected for drawing.
        const SKIP = 1 << 2;
    }
}

impl Serialize for FaceFlags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bits())
    }
}

impl<'de> Deserialize<'de> for FaceFlags {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u8::deserialize(deserializer)?;
        match FaceFlags::from_bits(bits) {
            Some(flags) => Ok(flags),
            None => {
                warn!("unknown face flag bits in {bits:#04x}, dropping them");
                Ok(FaceFlags::from_bits_truncate(bits))
            }
        }
    }
}

/// Connection from a portal face to the sector on its far side.
/// Mirror faces target their own sector and carry no link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalLink {
    pub target_sector: u32,
    pub target_face: u32,
    #[serde(default)]
    pub closed: bool,
}

/// A single mesh vertex; doubles as the device-side draw vertex.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldVertex {
    pub position: Vec3,
    #[serde(default)]
    pub normal: Vec3,
    #[serde(default)]
    pub uv: Vec2,
    #[serde(default)]
    pub color: Color,
}

/// A planar polygon face within a [`WorldMesh`].
///
/// `normal`, `bounds` and `origin` are derived after load rather than stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldFace {
    /// Ordered indices into the parent mesh's vertex array.
    pub vertices: Vec<u32>,
    /// Slot into the mesh material table; `None` when the source index
    /// failed to resolve (drawn with the fallback material).
    #[serde(default)]
    pub material: Option<usize>,
    #[serde(default)]
    pub material_angle: f32,
    #[serde(default)]
    pub material_offset: Vec2,
    #[serde(default = "default_material_scale")]
    pub material_scale: Vec2,
    #[serde(default)]
    pub flags: FaceFlags,
    #[serde(default)]
    pub portal: Option<PortalLink>,
    #[serde(skip)]
    pub normal: Vec3,
    #[serde(skip)]
    pub bounds: Aabb,
    #[serde(skip)]
    pub origin: Vec3,
}

fn default_material_scale() -> Vec2 {
    Vec2::ONE
}

impl WorldFace {
    pub fn new(vertices: Vec<u32>, material: Option<usize>, flags: FaceFlags) -> Self {
        Self {
            vertices,
            material,
            material_angle: 0.0,
            material_offset: Vec2::ZERO,
            material_scale: Vec2::ONE,
            flags,
            portal: None,
            normal: Vec3::ZERO,
            bounds: Aabb::default(),
            origin: Vec3::ZERO,
        }
    }

    /// Portal-class faces are drawn in the transparent pass and walked
    /// for recursion.
    #[inline]
    pub fn is_portal(&self) -> bool {
        self.flags.intersects(FaceFlags::PORTAL | FaceFlags::MIRROR)
    }

    #[inline]
    pub fn num_triangles(&self) -> usize {
        self.vertices.len().saturating_sub(2)
    }

    /// Fan triangulation around vertex 0: N vertices yield N-2 triangles
    /// `(v0, vi, vi+1)`. Faces with fewer than 3 vertices yield nothing.
    pub fn triangulate(&self) -> Vec<[u32; 3]> {
        if self.vertices.len() < 3 {
            return Vec::new();
        }
        let mut triangles = Vec::with_capacity(self.vertices.len() - 2);
        for i in 1..self.vertices.len() - 1 {
            triangles.push([self.vertices[0], self.vertices[i], self.vertices[i + 1]]);
        }
        triangles
    }
}

/// A polygon mesh shared between sectors and static placements.
///
/// Instances are handed out as `Rc<WorldMesh>` by [`MeshCache`]; the cache
/// holds one instance per source path.
#[derive(Debug)]
pub struct WorldMesh {
    /// Source path, also the cache key.
    pub path: String,
    pub vertices: Vec<WorldVertex>,
    pub faces: Vec<WorldFace>,
    /// Material paths as loaded, kept for serialization.
    pub material_paths: Vec<String>,
    /// Materials resolved through the material cache, one per path.
    pub materials: Vec<MaterialId>,
    pub bounds: Aabb,
    /// Device-side mesh the triangulated batches are uploaded into.
    pub draw_mesh: MeshHandle,
}

impl WorldMesh {
    /// Sum of the vertex normals a face references, normalized. An
    /// all-degenerate sum stays the zero vector.
    pub fn face_normal(vertices: &[WorldVertex], face: &WorldFace) -> Vec3 {
        let mut sum = Vec3::ZERO;
        for &index in &face.vertices {
            match vertices.get(index as usize) {
                Some(vertex) => sum = sum + vertex.normal,
                None => warn!("face references vertex {index} out of range"),
            }
        }
        sum.normalize()
    }

    /// Derive the mesh AABB, per-face AABBs and normals, and each face's
    /// cached origin (its AABB center). Runs once after all vertices are
    /// known.
    pub fn generate_bounds(&mut self) {
        let vertices = &self.vertices;

        let mut bounds = match vertices.first() {
            Some(v) => Aabb::point(v.position),
            None => Aabb::default(),
        };
        for vertex in vertices {
            bounds.expand(vertex.position);
        }
        self.bounds = bounds;

        for face in &mut self.faces {
            let mut positions = face
                .vertices
                .iter()
                .filter_map(|&i| vertices.get(i as usize))
                .map(|v| v.position);

            let mut face_bounds = match positions.next() {
                Some(p) => Aabb::point(p),
                None => Aabb::default(),
            };
            for p in positions {
                face_bounds.expand(p);
            }

            face.bounds = face_bounds;
            face.origin = face_bounds.center();
            face.normal = Self::face_normal(vertices, face);
        }
    }

    /// Total triangle count across every face, the capacity the draw mesh
    /// is created with.
    pub fn total_triangles(&self) -> usize {
        self.faces.iter().map(|f| f.num_triangles()).sum()
    }
}

/// Path-keyed cache of shared meshes.
///
/// Loading an already-cached path hands back a clone of the existing `Rc`,
/// so two loads of one path observe pointer equality. Entries stay alive
/// until [`MeshCache::flush_unreferenced`] finds the cache to be the sole
/// remaining owner.
#[derive(Default)]
pub struct MeshCache {
    meshes: HashMap<String, Rc<WorldMesh>>,
}

impl MeshCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a mesh from `path`, or return the cached instance.
    ///
    /// A miss parses the file, resolves its materials (substituting the
    /// fallback for any that fail), derives normals/bounds, and creates the
    /// device-side draw mesh.
    pub fn load(
        &mut self,
        path: &str,
        device: &mut dyn RenderDevice,
        materials: &mut MaterialCache,
    ) -> Result<Rc<WorldMesh>, WorldError> {
        if let Some(mesh) = self.meshes.get(path) {
            debug!("mesh cache hit for {path}");
            return Ok(Rc::clone(mesh));
        }

        let data = format::load_mesh(path)?;

        let resolved: Vec<MaterialId> = data
            .materials
            .iter()
            .map(|material_path| materials.cache(material_path, device, false))
            .collect();

        let mut mesh = WorldMesh {
            path: path.to_string(),
            vertices: data.vertices,
            faces: data.faces,
            material_paths: data.materials,
            materials: resolved,
            bounds: Aabb::default(),
            draw_mesh: MeshHandle(0),
        };

        mesh.generate_bounds();
        mesh.draw_mesh = device.create_mesh(&mesh.vertices, mesh.total_triangles())?;

        let mesh = Rc::new(mesh);
        self.meshes.insert(path.to_string(), Rc::clone(&mesh));
        debug!("cached mesh {path}");
        Ok(mesh)
    }

    /// Register a programmatically built mesh under its path.
    pub fn insert(&mut self, mesh: WorldMesh) -> Rc<WorldMesh> {
        let path = mesh.path.clone();
        let mesh = Rc::new(mesh);
        self.meshes.insert(path, Rc::clone(&mesh));
        mesh
    }

    pub fn get(&self, path: &str) -> Option<Rc<WorldMesh>> {
        self.meshes.get(path).map(Rc::clone)
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// Drop every mesh nothing outside the cache still references,
    /// destroying its device resources. This is where "last release
    /// destroys the mesh" happens.
    pub fn flush_unreferenced(&mut self, device: &mut dyn RenderDevice) {
        self.meshes.retain(|path, mesh| {
            if Rc::strong_count(mesh) > 1 {
                return true;
            }
            debug!("flushing unreferenced mesh {path}");
            device.destroy_mesh(mesh.draw_mesh);
            false
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_vertex(x: f32, y: f32, z: f32) -> WorldVertex {
        WorldVertex {
            position: Vec3::new(x, y, z),
            normal: Vec3::UP,
            uv: Vec2::ZERO,
            color: Color::WHITE,
        }
    }

    #[test]
    fn test_triangulate_quad() {
        let face = WorldFace::new(vec![0, 1, 2, 3], None, FaceFlags::empty());
        let triangles = face.triangulate();
        assert_eq!(triangles.len(), 2);
        assert_eq!(triangles[0], [0, 1, 2]);
        assert_eq!(triangles[1], [0, 2, 3]);
    }

    #[test]
    fn test_triangulate_fan_count() {
        for n in 3..10u32 {
            let face = WorldFace::new((0..n).collect(), None, FaceFlags::empty());
            let triangles = face.triangulate();
            assert_eq!(triangles.len(), (n - 2) as usize);
            for (i, triangle) in triangles.iter().enumerate() {
                assert_eq!(triangle[0], 0);
                assert_eq!(triangle[1], i as u32 + 1);
                assert_eq!(triangle[2], i as u32 + 2);
            }
        }
    }

    #[test]
    fn test_triangulate_degenerate() {
        let face = WorldFace::new(vec![0, 1], None, FaceFlags::empty());
        assert!(face.triangulate().is_empty());
        let empty = WorldFace::new(vec![], None, FaceFlags::empty());
        assert!(empty.triangulate().is_empty());
    }

    #[test]
    fn test_face_normal_averages_vertex_normals() {
        let vertices = vec![
            WorldVertex {
                normal: Vec3::new(0.0, 1.0, 0.0),
                ..flat_vertex(0.0, 0.0, 0.0)
            },
            WorldVertex {
                normal: Vec3::new(0.0, 1.0, 0.0),
                ..flat_vertex(1.0, 0.0, 0.0)
            },
            WorldVertex {
                normal: Vec3::new(1.0, 0.0, 0.0),
                ..flat_vertex(1.0, 0.0, 1.0)
            },
        ];
        let face = WorldFace::new(vec![0, 1, 2], None, FaceFlags::empty());
        let normal = WorldMesh::face_normal(&vertices, &face);
        assert!((normal.len() - 1.0).abs() < 0.001);
        assert!(normal.y > normal.x);
    }

    #[test]
    fn test_face_normal_degenerate_stays_zero() {
        let vertices = vec![
            WorldVertex {
                normal: Vec3::new(0.0, 1.0, 0.0),
                ..flat_vertex(0.0, 0.0, 0.0)
            },
            WorldVertex {
                normal: Vec3::new(0.0, -1.0, 0.0),
                ..flat_vertex(1.0, 0.0, 0.0)
            },
        ];
        let face = WorldFace::new(vec![0, 1], None, FaceFlags::empty());
        let normal = WorldMesh::face_normal(&vertices, &face);
        assert!(normal.len() < 0.001);
    }

    #[test]
    fn test_generate_bounds_sets_face_origin() {
        let mut mesh = WorldMesh {
            path: "test".to_string(),
            vertices: vec![
                flat_vertex(0.0, 0.0, 0.0),
                flat_vertex(4.0, 0.0, 0.0),
                flat_vertex(4.0, 0.0, 4.0),
                flat_vertex(0.0, 0.0, 4.0),
            ],
            faces: vec![WorldFace::new(vec![0, 1, 2, 3], None, FaceFlags::empty())],
            material_paths: vec![],
            materials: vec![],
            bounds: Aabb::default(),
            draw_mesh: MeshHandle(0),
        };
        mesh.generate_bounds();
        let face = &mesh.faces[0];
        assert!((face.origin.x - 2.0).abs() < 0.001);
        assert!((face.origin.z - 2.0).abs() < 0.001);
        assert!((mesh.bounds.max.x - 4.0).abs() < 0.001);
        assert!((face.normal.y - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_face_flags_roundtrip_as_byte() {
        let flags = FaceFlags::PORTAL | FaceFlags::MIRROR;
        let text = ron::to_string(&flags).unwrap();
        assert_eq!(text, "3");
        let back: FaceFlags = ron::from_str(&text).unwrap();
        assert_eq!(back, flags);
    }

    #[test]
    fn test_face_flags_unknown_bits_dropped() {
        let back: FaceFlags = ron::from_str("255").unwrap();
        assert_eq!(back, FaceFlags::all());
    }
}
