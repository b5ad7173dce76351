//! Abstract graphics device the renderer submits through.
//!
//! The engine treats the driver as an opaque capability provider: programs
//! and textures are referenced by handle, meshes hold a retained vertex
//! buffer whose triangle list is refilled per batch, and a modelview-style
//! matrix stack rides along with the submissions.

use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(test)]
use crate::math::{mat4_identity, mat4_mul};
use crate::math::{Color, ColorF, Mat4, Vec3};
use crate::world::WorldVertex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u32);

/// Winding-based cull mode. `Positive` is the engine default; mirrored
/// passes swap `Positive` and `Negative`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CullMode {
    None,
    #[default]
    Positive,
    Negative,
}

/// Source/destination blend factors, paired per material pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    DstColor,
    OneMinusDstColor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

/// Value for a named shader uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2(crate::math::Vec2),
    Vec3(Vec3),
    Color(crate::math::ColorF),
    Mat4(Mat4),
}

/// Driver-side resource failure. Recoverable: callers propagate it instead
/// of aborting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    ResourceAllocation(String),
    UnknownProgram(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::ResourceAllocation(what) => {
                write!(f, "failed to allocate device resource: {what}")
            }
            DeviceError::UnknownProgram(name) => write!(f, "unknown shader program: {name}"),
        }
    }
}

/// The driver surface the renderer draws through.
pub trait RenderDevice {
    // Resources
    fn create_mesh(
        &mut self,
        vertices: &[WorldVertex],
        max_triangles: usize,
    ) -> Result<MeshHandle, DeviceError>;
    fn destroy_mesh(&mut self, mesh: MeshHandle);
    /// `pixels` is tightly packed RGBA8.
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<TextureHandle, DeviceError>;
    fn destroy_texture(&mut self, texture: TextureHandle);
    /// Resolve a shader program by name.
    fn program(&mut self, name: &str) -> Result<ProgramHandle, DeviceError>;

    // Frame setup
    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32);
    fn set_clear_color(&mut self, color: ColorF);
    /// Clear the selected buffers of the active target.
    fn clear(&mut self, color: bool, depth: bool);

    // Pass state
    fn bind_program(&mut self, program: ProgramHandle);
    fn set_blend(&mut self, src: BlendFactor, dst: BlendFactor);
    fn set_cull(&mut self, mode: CullMode);
    fn set_depth_test(&mut self, enabled: bool);
    fn set_depth_write(&mut self, enabled: bool);
    fn bind_texture(&mut self, unit: u32, texture: TextureHandle);
    fn set_texture_filter(&mut self, texture: TextureHandle, filter: FilterMode);
    fn set_uniform(&mut self, name: &str, value: UniformValue);

    // Modelview matrix stack; push duplicates the top
    fn push_matrix(&mut self);
    fn pop_matrix(&mut self);
    fn load_identity(&mut self);
    fn mult_matrix(&mut self, m: &Mat4);
    fn model_matrix(&self) -> Mat4;

    // Submission
    fn set_mesh_vertices(&mut self, mesh: MeshHandle, vertices: &[WorldVertex]);
    fn set_mesh_triangles(&mut self, mesh: MeshHandle, triangles: &[[u32; 3]]);
    fn draw_mesh(&mut self, mesh: MeshHandle);
    fn draw_lines(&mut self, points: &[(Vec3, Color)]);
    fn draw_points(&mut self, points: &[(Vec3, Color)], size: f32);

    /// Depth attachment of the active target, if the driver exposes one.
    fn depth_texture(&self) -> Option<TextureHandle>;
}

/// One recorded `draw_mesh` submission with the state it went out under.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct DrawCall {
    pub mesh: MeshHandle,
    pub program: Option<ProgramHandle>,
    pub cull: CullMode,
    pub blend: Option<(BlendFactor, BlendFactor)>,
    pub depth_test: bool,
    pub num_triangles: usize,
    pub model_matrix: Mat4,
}

/// Test device recording everything submitted to it.
#[cfg(test)]
pub struct RecordingDevice {
    next_handle: u32,
    pub live_meshes: Vec<MeshHandle>,
    pub destroyed_meshes: Vec<MeshHandle>,
    pub live_textures: Vec<TextureHandle>,
    pub draw_calls: Vec<DrawCall>,
    pub lines_drawn: usize,
    pub points_drawn: usize,
    pub uniforms: Vec<(String, UniformValue)>,
    pub bound_textures: Vec<(u32, TextureHandle)>,
    pub viewport_rect: Option<(i32, i32, u32, u32)>,
    pub clear_color: Option<ColorF>,
    pub clears: usize,
    matrix_stack: Vec<Mat4>,
    triangle_counts: std::collections::HashMap<MeshHandle, usize>,
    pub program: Option<ProgramHandle>,
    pub blend: Option<(BlendFactor, BlendFactor)>,
    pub cull: CullMode,
    pub depth_test: bool,
    pub depth_write: bool,
    /// Meshes that received a vertex upload, in order.
    pub vertex_uploads: Vec<MeshHandle>,
    /// When set, the next `create_mesh`/`create_texture` fails.
    pub fail_allocations: bool,
}

#[cfg(test)]
impl RecordingDevice {
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            live_meshes: Vec::new(),
            destroyed_meshes: Vec::new(),
            live_textures: Vec::new(),
            draw_calls: Vec::new(),
            lines_drawn: 0,
            points_drawn: 0,
            uniforms: Vec::new(),
            bound_textures: Vec::new(),
            viewport_rect: None,
            clear_color: None,
            clears: 0,
            matrix_stack: vec![mat4_identity()],
            triangle_counts: std::collections::HashMap::new(),
            program: None,
            blend: None,
            cull: CullMode::Positive,
            depth_test: true,
            depth_write: true,
            vertex_uploads: Vec::new(),
            fail_allocations: false,
        }
    }

    fn next(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformValue> {
        self.uniforms
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

#[cfg(test)]
impl RenderDevice for RecordingDevice {
    fn create_mesh(
        &mut self,
        _vertices: &[WorldVertex],
        _max_triangles: usize,
    ) -> Result<MeshHandle, DeviceError> {
        if self.fail_allocations {
            return Err(DeviceError::ResourceAllocation("mesh".to_string()));
        }
        let handle = MeshHandle(self.next());
        self.live_meshes.push(handle);
        Ok(handle)
    }

    fn destroy_mesh(&mut self, mesh: MeshHandle) {
        self.live_meshes.retain(|&m| m != mesh);
        self.destroyed_meshes.push(mesh);
    }

    fn create_texture(
        &mut self,
        _width: u32,
        _height: u32,
        _pixels: &[u8],
    ) -> Result<TextureHandle, DeviceError> {
        if self.fail_allocations {
            return Err(DeviceError::ResourceAllocation("texture".to_string()));
        }
        let handle = TextureHandle(self.next());
        self.live_textures.push(handle);
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.live_textures.retain(|&t| t != texture);
    }

    fn program(&mut self, _name: &str) -> Result<ProgramHandle, DeviceError> {
        Ok(ProgramHandle(self.next()))
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.viewport_rect = Some((x, y, width, height));
    }

    fn set_clear_color(&mut self, color: ColorF) {
        self.clear_color = Some(color);
    }

    fn clear(&mut self, _color: bool, _depth: bool) {
        self.clears += 1;
    }

    fn bind_program(&mut self, program: ProgramHandle) {
        self.program = Some(program);
    }

    fn set_blend(&mut self, src: BlendFactor, dst: BlendFactor) {
        self.blend = Some((src, dst));
    }

    fn set_cull(&mut self, mode: CullMode) {
        self.cull = mode;
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.depth_test = enabled;
    }

    fn set_depth_write(&mut self, enabled: bool) {
        self.depth_write = enabled;
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) {
        self.bound_textures.push((unit, texture));
    }

    fn set_texture_filter(&mut self, _texture: TextureHandle, _filter: FilterMode) {}

    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        self.uniforms.push((name.to_string(), value));
    }

    fn push_matrix(&mut self) {
        let top = self.model_matrix();
        self.matrix_stack.push(top);
    }

    fn pop_matrix(&mut self) {
        if self.matrix_stack.len() > 1 {
            self.matrix_stack.pop();
        }
    }

    fn load_identity(&mut self) {
        *self.matrix_stack.last_mut().unwrap() = mat4_identity();
    }

    fn mult_matrix(&mut self, m: &Mat4) {
        let top = self.matrix_stack.last_mut().unwrap();
        *top = mat4_mul(top, m);
    }

    fn model_matrix(&self) -> Mat4 {
        *self.matrix_stack.last().unwrap()
    }

    fn set_mesh_vertices(&mut self, mesh: MeshHandle, _vertices: &[WorldVertex]) {
        self.vertex_uploads.push(mesh);
    }

    fn set_mesh_triangles(&mut self, mesh: MeshHandle, triangles: &[[u32; 3]]) {
        self.triangle_counts.insert(mesh, triangles.len());
    }

    fn draw_mesh(&mut self, mesh: MeshHandle) {
        self.draw_calls.push(DrawCall {
            mesh,
            program: self.program,
            cull: self.cull,
            blend: self.blend,
            depth_test: self.depth_test,
            num_triangles: self.triangle_counts.get(&mesh).copied().unwrap_or(0),
            model_matrix: self.model_matrix(),
        });
    }

    fn draw_lines(&mut self, points: &[(Vec3, Color)]) {
        self.lines_drawn += points.len() / 2;
    }

    fn draw_points(&mut self, points: &[(Vec3, Color)], _size: f32) {
        self.points_drawn += points.len();
    }

    fn depth_texture(&self) -> Option<TextureHandle> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::mat4_translation;

    #[test]
    fn test_matrix_stack_push_pop() {
        let mut device = RecordingDevice::new();
        device.push_matrix();
        device.mult_matrix(&mat4_translation(Vec3::new(1.0, 0.0, 0.0)));
        let moved = device.model_matrix();
        assert!((moved[0][3] - 1.0).abs() < 0.001);
        device.pop_matrix();
        let top = device.model_matrix();
        assert!(top[0][3].abs() < 0.001);
    }

    #[test]
    fn test_draw_records_staged_triangles() {
        let mut device = RecordingDevice::new();
        let mesh = device.create_mesh(&[], 8).unwrap();
        device.set_mesh_triangles(mesh, &[[0, 1, 2], [0, 2, 3]]);
        device.draw_mesh(mesh);
        assert_eq!(device.draw_calls.len(), 1);
        assert_eq!(device.draw_calls[0].num_triangles, 2);
    }

    #[test]
    fn test_failed_allocation_reports_error() {
        let mut device = RecordingDevice::new();
        device.fail_allocations = true;
        assert!(device.create_mesh(&[], 4).is_err());
        assert!(device.live_meshes.is_empty());
    }
}
