//! Vector/matrix math shared by the world model and renderer

use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

/// 3D Vector
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };
    pub const UP: Vec3 = Vec3 { x: 0.0, y: 1.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, other: Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Vec3) -> Vec3 {
        Vec3 {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    pub fn len(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Zero-safe: a zero-length vector normalizes to zero.
    pub fn normalize(self) -> Vec3 {
        let l = self.len();
        if l == 0.0 {
            return Vec3::ZERO;
        }
        Vec3 {
            x: self.x / l,
            y: self.y / l,
            z: self.z / l,
        }
    }

    pub fn scale(self, s: f32) -> Vec3 {
        Vec3 {
            x: self.x * s,
            y: self.y * s,
            z: self.z * s,
        }
    }

    pub fn min(self, other: Vec3) -> Vec3 {
        Vec3 {
            x: self.x.min(other.x),
            y: self.y.min(other.y),
            z: self.z.min(other.z),
        }
    }

    pub fn max(self, other: Vec3) -> Vec3 {
        Vec3 {
            x: self.x.max(other.x),
            y: self.y.max(other.y),
            z: self.z.max(other.z),
        }
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;
    fn mul(self, s: f32) -> Vec3 {
        self.scale(s)
    }
}

/// 2D Vector
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };
    pub const ONE: Vec2 = Vec2 { x: 1.0, y: 1.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn scale(self, s: f32) -> Vec2 {
        Vec2::new(self.x * s, self.y * s)
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    fn add(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x + other.x, self.y + other.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x - other.x, self.y - other.y)
    }
}

/// 8-bit RGBA color, used by mesh vertices and debug drawing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255, a: 255 };
    pub const MAGENTA: Color = Color { r: 255, g: 0, b: 255, a: 255 };
    pub const GREEN: Color = Color { r: 0, g: 255, b: 0, a: 255 };

    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::WHITE
    }
}

/// Float RGBA color, used by world lighting properties and shader uniforms
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorF {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl ColorF {
    pub fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }
}

impl Default for ColorF {
    fn default() -> Self {
        ColorF::new(1.0, 1.0, 1.0, 1.0)
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Degenerate box containing a single point, a seed for `expand`.
    pub fn point(p: Vec3) -> Self {
        Self { min: p, max: p }
    }

    pub fn expand(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max).scale(0.5)
    }
}

/// Cosine interpolation between `x` and `y`; `mu` in [0, 1].
pub fn cosine_interpolate(x: f32, y: f32, mu: f32) -> f32 {
    let mu2 = (1.0 - (mu * std::f32::consts::PI).cos()) / 2.0;
    x * (1.0 - mu2) + y * mu2
}

// =============================================================================
// 4x4 Matrix operations (for transforms)
// =============================================================================

/// 4x4 transformation matrix type, row-major with column vectors
pub type Mat4 = [[f32; 4]; 4];

/// Identity matrix
pub fn mat4_identity() -> Mat4 {
    [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

/// Create translation matrix
pub fn mat4_translation(t: Vec3) -> Mat4 {
    [
        [1.0, 0.0, 0.0, t.x],
        [0.0, 1.0, 0.0, t.y],
        [0.0, 0.0, 1.0, t.z],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

/// Create non-uniform scale matrix
pub fn mat4_scale(s: Vec3) -> Mat4 {
    [
        [s.x, 0.0, 0.0, 0.0],
        [0.0, s.y, 0.0, 0.0],
        [0.0, 0.0, s.z, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

/// Build a rotation matrix from euler angles (degrees).
/// Rotation order: Z * Y * X.
pub fn mat4_rotation(rot: Vec3) -> Mat4 {
    let (sx, cx) = rot.x.to_radians().sin_cos();
    let (sy, cy) = rot.y.to_radians().sin_cos();
    let (sz, cz) = rot.z.to_radians().sin_cos();

    [
        [cy * cz, sx * sy * cz - cx * sz, cx * sy * cz + sx * sz, 0.0],
        [cy * sz, sx * sy * sz + cx * cz, cx * sy * sz - sx * cz, 0.0],
        [-sy, sx * cy, cx * cy, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

/// Multiply two 4x4 matrices
pub fn mat4_mul(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut result = [[0.0; 4]; 4];
    for i in 0..4 {
        for j in 0..4 {
            for k in 0..4 {
                result[i][j] += a[i][k] * b[k][j];
            }
        }
    }
    result
}

/// Transform a point by a 4x4 matrix
pub fn mat4_transform_point(m: &Mat4, p: Vec3) -> Vec3 {
    Vec3::new(
        m[0][0] * p.x + m[0][1] * p.y + m[0][2] * p.z + m[0][3],
        m[1][0] * p.x + m[1][1] * p.y + m[1][2] * p.z + m[1][3],
        m[2][0] * p.x + m[2][1] * p.y + m[2][2] * p.z + m[2][3],
    )
}

/// Transpose; inverts pure rotation matrices.
pub fn mat4_transpose(m: &Mat4) -> Mat4 {
    let mut result = [[0.0; 4]; 4];
    for i in 0..4 {
        for j in 0..4 {
            result[i][j] = m[j][i];
        }
    }
    result
}

/// Perspective projection, right-handed, camera looking down -Z.
/// `fov` is the vertical field of view in degrees.
pub fn mat4_perspective(fov: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let f = 1.0 / (fov.to_radians() / 2.0).tan();
    [
        [f / aspect, 0.0, 0.0, 0.0],
        [0.0, f, 0.0, 0.0],
        [
            0.0,
            0.0,
            (far + near) / (near - far),
            (2.0 * far * near) / (near - far),
        ],
        [0.0, 0.0, -1.0, 0.0],
    ]
}

/// View matrix for a camera at `position` with euler `angles` (degrees):
/// the inverse of the camera's world transform.
pub fn mat4_view(position: Vec3, angles: Vec3) -> Mat4 {
    let rotation = mat4_transpose(&mat4_rotation(angles));
    mat4_mul(&rotation, &mat4_translation(position.scale(-1.0)))
}

/// Build a combined transform matrix from position and rotation
pub fn mat4_from_position_rotation(position: Vec3, rotation: Vec3) -> Mat4 {
    let rot_mat = mat4_rotation(rotation);
    let trans_mat = mat4_translation(position);
    mat4_mul(&trans_mat, &rot_mat)
}

/// Reflection about the plane through `origin` with unit `normal`
/// (Householder I - 2nn^T, translated onto the plane). Determinant is -1,
/// so reflected geometry needs its cull winding flipped.
pub fn mat4_reflection(normal: Vec3, origin: Vec3) -> Mat4 {
    let n = normal.normalize();
    let d = 2.0 * n.dot(origin);
    [
        [
            1.0 - 2.0 * n.x * n.x,
            -2.0 * n.x * n.y,
            -2.0 * n.x * n.z,
            d * n.x,
        ],
        [
            -2.0 * n.x * n.y,
            1.0 - 2.0 * n.y * n.y,
            -2.0 * n.y * n.z,
            d * n.y,
        ],
        [
            -2.0 * n.x * n.z,
            -2.0 * n.y * n.z,
            1.0 - 2.0 * n.z * n.z,
            d * n.z,
        ],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

/// Rotation taking unit vector `from` onto unit vector `to` (Rodrigues).
/// Anti-parallel inputs rotate 180 degrees about a perpendicular axis.
pub fn mat4_align(from: Vec3, to: Vec3) -> Mat4 {
    let a = from.normalize();
    let b = to.normalize();
    let c = a.dot(b);

    if c < -0.9999 {
        // Pick any axis perpendicular to `a` and flip around it
        let mut axis = Vec3::UP.cross(a);
        if axis.len() < 0.001 {
            axis = Vec3::new(1.0, 0.0, 0.0).cross(a);
        }
        let n = axis.normalize();
        return [
            [
                2.0 * n.x * n.x - 1.0,
                2.0 * n.x * n.y,
                2.0 * n.x * n.z,
                0.0,
            ],
            [
                2.0 * n.x * n.y,
                2.0 * n.y * n.y - 1.0,
                2.0 * n.y * n.z,
                0.0,
            ],
            [
                2.0 * n.x * n.z,
                2.0 * n.y * n.z,
                2.0 * n.z * n.z - 1.0,
                0.0,
            ],
            [0.0, 0.0, 0.0, 1.0],
        ];
    }

    let v = a.cross(b);
    let k = 1.0 / (1.0 + c);
    [
        [
            v.x * v.x * k + c,
            v.x * v.y * k - v.z,
            v.x * v.z * k + v.y,
            0.0,
        ],
        [
            v.y * v.x * k + v.z,
            v.y * v.y * k + c,
            v.y * v.z * k - v.x,
            0.0,
        ],
        [
            v.z * v.x * k - v.y,
            v.z * v.y * k + v.x,
            v.z * v.z * k + c,
            0.0,
        ],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec3_normalize_zero() {
        let v = Vec3::ZERO.normalize();
        assert!(v.len() < 0.001);
    }

    #[test]
    fn test_aabb_contains() {
        let mut aabb = Aabb::point(Vec3::ZERO);
        aabb.expand(Vec3::new(10.0, 10.0, 10.0));
        assert!(aabb.contains_point(Vec3::new(5.0, 5.0, 5.0)));
        assert!(!aabb.contains_point(Vec3::new(5.0, 11.0, 5.0)));
        let c = aabb.center();
        assert!((c.x - 5.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_interpolate_endpoints() {
        assert!((cosine_interpolate(256.0, 1024.0, 0.0) - 256.0).abs() < 0.001);
        assert!((cosine_interpolate(256.0, 1024.0, 1.0) - 1024.0).abs() < 0.001);
        let mid = cosine_interpolate(0.0, 1.0, 0.5);
        assert!((mid - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_mat4_mul_identity() {
        let t = mat4_translation(Vec3::new(1.0, 2.0, 3.0));
        let m = mat4_mul(&mat4_identity(), &t);
        let p = mat4_transform_point(&m, Vec3::ZERO);
        assert!((p.x - 1.0).abs() < 0.001);
        assert!((p.z - 3.0).abs() < 0.001);
    }

    #[test]
    fn test_reflection_is_involution() {
        let m = mat4_reflection(Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, 0.0, 5.0));
        let p = Vec3::new(1.0, 2.0, 8.0);
        let r = mat4_transform_point(&m, p);
        // Mirrored across z=5
        assert!((r.z - 2.0).abs() < 0.001);
        assert!((r.x - 1.0).abs() < 0.001);
        let back = mat4_transform_point(&m, r);
        assert!((back.z - p.z).abs() < 0.001);
    }

    #[test]
    fn test_align_rotates_onto_target() {
        let m = mat4_align(Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0));
        let r = mat4_transform_point(&m, Vec3::new(1.0, 0.0, 0.0));
        assert!((r.y - 1.0).abs() < 0.001);
        assert!(r.x.abs() < 0.001);
    }

    #[test]
    fn test_align_antiparallel() {
        let m = mat4_align(Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, 0.0, -1.0));
        let r = mat4_transform_point(&m, Vec3::new(0.0, 0.0, 1.0));
        assert!((r.z + 1.0).abs() < 0.001);
    }
}
