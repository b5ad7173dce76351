//! Face visibility
//!
//! Selects the drawable faces of a sector mesh for one camera: SKIP-flagged
//! faces and faces excluded by the current portal walk are dropped first,
//! then the rest are frustum-culled by their bounds (unless culling is
//! disabled). Portal selection always runs on the visible output, so a
//! culled portal never recurses.

use std::collections::HashSet;

use crate::math::{Aabb, Mat4, Vec3};
use crate::render::context::RenderOptions;
use crate::world::{FaceFlags, WorldMesh};

/// Slack added around face bounds before testing, so geometry right on a
/// frustum plane doesn't flicker.
const CULL_MARGIN: f32 = 2.0;

/// Identity of a face within a world. Exclusion is per sector, not per
/// mesh, since sectors can share a mesh from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaceKey {
    pub sector: usize,
    pub face: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    fn new(normal: Vec3, d: f32) -> Self {
        let length = normal.len();
        if length > 0.0 {
            Self {
                normal: normal.scale(1.0 / length),
                d: d / length,
            }
        } else {
            Self { normal, d }
        }
    }

    /// Signed distance; positive is the inside half-space.
    #[inline]
    pub fn distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.d
    }
}

/// View frustum as six inward-facing planes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extract planes from a combined projection * view matrix
    /// (row-major, column-vector convention): each plane is the last row
    /// plus or minus one of the others, normalized to world units.
    pub fn from_view_proj(m: &Mat4) -> Self {
        let row = |i: usize| (Vec3::new(m[i][0], m[i][1], m[i][2]), m[i][3]);
        let (r0, d0) = row(0);
        let (r1, d1) = row(1);
        let (r2, d2) = row(2);
        let (r3, d3) = row(3);

        Self {
            planes: [
                Plane::new(r3 + r0, d3 + d0), // left
                Plane::new(r3 - r0, d3 - d0), // right
                Plane::new(r3 + r1, d3 + d1), // bottom
                Plane::new(r3 - r1, d3 - d1), // top
                Plane::new(r3 + r2, d3 + d2), // near
                Plane::new(r3 - r2, d3 - d2), // far
            ],
        }
    }

    /// Box/frustum intersection via the positive-vertex test.
    pub fn contains_aabb(&self, bounds: &Aabb) -> bool {
        let min = bounds.min - Vec3::new(CULL_MARGIN, CULL_MARGIN, CULL_MARGIN);
        let max = bounds.max + Vec3::new(CULL_MARGIN, CULL_MARGIN, CULL_MARGIN);

        for plane in &self.planes {
            // The corner furthest along the plane normal decides
            let p = Vec3::new(
                if plane.normal.x > 0.0 { max.x } else { min.x },
                if plane.normal.y > 0.0 { max.y } else { min.y },
                if plane.normal.z > 0.0 { max.z } else { min.z },
            );
            if plane.distance(p) < 0.0 {
                return false;
            }
        }
        true
    }
}

/// Faces of `mesh` drawable this pass: not SKIP-flagged, not excluded by
/// the portal walk, and (with culling on) intersecting the frustum.
pub fn visible_faces(
    frustum: &Frustum,
    mesh: &WorldMesh,
    sector: usize,
    excluded: &HashSet<FaceKey>,
    options: &RenderOptions,
) -> Vec<u32> {
    let mut visible = Vec::new();
    for (i, face) in mesh.faces.iter().enumerate() {
        let i = i as u32;
        if face.flags.contains(FaceFlags::SKIP) {
            continue;
        }
        if excluded.contains(&FaceKey { sector, face: i }) {
            continue;
        }
        if options.cull_faces && !frustum.contains_aabb(&face.bounds) {
            continue;
        }
        visible.push(i);
    }
    visible
}

/// Portal-class subset of an already-filtered face list.
pub fn visible_portals(mesh: &WorldMesh, faces: &[u32]) -> Vec<u32> {
    faces
        .iter()
        .copied()
        .filter(|&i| mesh.faces[i as usize].is_portal())
        .collect()
}
