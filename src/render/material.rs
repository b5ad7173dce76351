//! Material system
//!
//! Materials are RON documents (compressed like every other document)
//! describing up to four draw passes: shader program, blend pair, cull and
//! depth state, texture filter, and a list of named shader variables.
//! Variables either carry a literal value, reference a texture by path, or
//! name a builtin resolved at draw time (ticks, depth attachment, viewport
//! size).
//!
//! The cache is path-keyed and infallible: a material that fails to load
//! resolves to the built-in fallback (checkerboard, default program), so a
//! missing file never takes the frame down with it.

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::math::{ColorF, Vec2, Vec3};
use crate::render::context::{FrameStats, PassState, SceneState};
use crate::render::device::{
    BlendFactor, CullMode, DeviceError, FilterMode, MeshHandle, ProgramHandle, RenderDevice,
    TextureHandle, UniformValue,
};
use crate::world::{parse_document, read_document, Light, WorldError};

/// Passes beyond this are dropped at load with a warning.
pub const MAX_MATERIAL_PASSES: usize = 4;
/// Variables beyond this are dropped at load with a warning.
pub const MAX_MATERIAL_VARIABLES: usize = 64;

/// Slot into a [`MaterialCache`]. Stable for the cache's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialId(pub usize);

impl MaterialId {
    /// The built-in fallback material, always present at slot 0.
    pub const FALLBACK: MaterialId = MaterialId(0);
}

/// Values a shader variable can be resolved from at draw time rather than
/// authored in the material document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuiltinVar {
    /// Engine tick counter, as an integer uniform.
    Time,
    /// Depth attachment of the active target, bound as a texture.
    Depth,
    /// Viewport dimensions as a vec2.
    ViewportSize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VariableValue {
    Float(f32),
    Int(i32),
    Vec2(Vec2),
    Vec3(Vec3),
    Color(ColorF),
    /// Image path, uploaded and bound to a sequential texture unit.
    Texture(String),
    Builtin(BuiltinVar),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableData {
    pub name: String,
    pub value: VariableValue,
}

/// One pass of a material document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassData {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_blend")]
    pub blend: (BlendFactor, BlendFactor),
    #[serde(default = "default_depth_test")]
    pub depth_test: bool,
    #[serde(default)]
    pub cull: CullMode,
    #[serde(default)]
    pub filter: FilterMode,
    #[serde(default)]
    pub variables: Vec<VariableData>,
}

fn default_program() -> String {
    "default".to_string()
}

fn default_blend() -> (BlendFactor, BlendFactor) {
    (BlendFactor::One, BlendFactor::Zero)
}

fn default_depth_test() -> bool {
    true
}

/// On-disk form of a material.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MaterialData {
    /// Editor thumbnail; also what preview-only loads draw with.
    #[serde(default)]
    pub preview: Option<String>,
    #[serde(default)]
    pub passes: Vec<PassData>,
}

/// Load and parse a material document.
pub fn load_material<P: AsRef<Path>>(path: P) -> Result<MaterialData, WorldError> {
    let path = path.as_ref();
    let contents = read_document(path)?;
    let mut data: MaterialData = parse_document(&contents, path)?;

    if data.passes.len() > MAX_MATERIAL_PASSES {
        warn!(
            "{} has {} passes, keeping the first {}",
            path.display(),
            data.passes.len(),
            MAX_MATERIAL_PASSES
        );
        data.passes.truncate(MAX_MATERIAL_PASSES);
    }
    for (i, pass) in data.passes.iter_mut().enumerate() {
        if pass.variables.len() > MAX_MATERIAL_VARIABLES {
            warn!(
                "{} pass {} has {} variables, keeping the first {}",
                path.display(),
                i,
                pass.variables.len(),
                MAX_MATERIAL_VARIABLES
            );
            pass.variables.truncate(MAX_MATERIAL_VARIABLES);
        }
    }

    Ok(data)
}

/// A variable's draw-time binding.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Uniform(UniformValue),
    Texture(TextureHandle),
    Builtin(BuiltinVar),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaterialVariable {
    pub name: String,
    pub binding: Binding,
}

/// A fully resolved material pass, ready to submit through.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialPass {
    pub program: ProgramHandle,
    pub blend: (BlendFactor, BlendFactor),
    pub depth_test: bool,
    pub cull: CullMode,
    pub filter: FilterMode,
    pub variables: Vec<MaterialVariable>,
}

/// A cached material. `cached == false` means only the preview was loaded;
/// drawing such a material goes through the fallback with the preview
/// texture substituted in.
#[derive(Debug, Clone)]
pub struct Material {
    pub path: String,
    pub passes: Vec<MaterialPass>,
    pub preview: Option<TextureHandle>,
    cached: bool,
}

impl Material {
    /// Whether the full pass list has been resolved.
    pub fn is_cached(&self) -> bool {
        self.cached
    }
}

/// Path-keyed material cache with an always-present fallback at slot 0.
pub struct MaterialCache {
    materials: Vec<Material>,
    by_path: HashMap<String, MaterialId>,
    textures: HashMap<String, TextureHandle>,
    fallback_texture: TextureHandle,
    fallback_program: ProgramHandle,
}

impl MaterialCache {
    /// Build the cache and its fallback material: default program, no
    /// blending, one diffuse variable bound to a generated checkerboard.
    pub fn new(device: &mut dyn RenderDevice) -> Result<Self, DeviceError> {
        let mut pixels = Vec::with_capacity(8 * 8 * 4);
        for y in 0..8u32 {
            for x in 0..8u32 {
                if (x / 2 + y / 2) % 2 == 0 {
                    pixels.extend_from_slice(&[255, 0, 255, 255]);
                } else {
                    pixels.extend_from_slice(&[0, 0, 0, 255]);
                }
            }
        }
        let fallback_texture = device.create_texture(8, 8, &pixels)?;
        let fallback_program = device.program("default")?;

        let fallback = Material {
            path: "fallback".to_string(),
            passes: vec![MaterialPass {
                program: fallback_program,
                blend: (BlendFactor::One, BlendFactor::Zero),
                depth_test: true,
                cull: CullMode::Positive,
                filter: FilterMode::Nearest,
                variables: vec![MaterialVariable {
                    name: "diffuseMap".to_string(),
                    binding: Binding::Texture(fallback_texture),
                }],
            }],
            preview: None,
            cached: true,
        };

        Ok(Self {
            materials: vec![fallback],
            by_path: HashMap::new(),
            textures: HashMap::new(),
            fallback_texture,
            fallback_program,
        })
    }

    /// Load a material from `path`, or return its cached id.
    ///
    /// Never fails: a document that cannot be loaded resolves to
    /// [`MaterialId::FALLBACK`]. With `preview_only` set, only the preview
    /// texture is loaded; asking again without it upgrades the entry to a
    /// full load in place.
    pub fn cache(
        &mut self,
        path: &str,
        device: &mut dyn RenderDevice,
        preview_only: bool,
    ) -> MaterialId {
        if let Some(&id) = self.by_path.get(path) {
            if !self.materials[id.0].cached && !preview_only {
                match load_material(path) {
                    Ok(data) => {
                        let preview = self.materials[id.0].preview;
                        let mut material = self.resolve(data, path, device);
                        if material.preview.is_none() {
                            material.preview = preview;
                        }
                        self.materials[id.0] = material;
                    }
                    Err(e) => warn!("failed to cache material {path}: {e}"),
                }
            }
            return id;
        }

        let data = match load_material(path) {
            Ok(data) => data,
            Err(e) => {
                warn!("failed to load material {path}: {e}");
                return MaterialId::FALLBACK;
            }
        };

        let material = if preview_only {
            let preview = data
                .preview
                .as_deref()
                .and_then(|p| self.load_texture(p, device));
            Material {
                path: path.to_string(),
                passes: Vec::new(),
                preview,
                cached: false,
            }
        } else {
            self.resolve(data, path, device)
        };

        let id = MaterialId(self.materials.len());
        self.materials.push(material);
        self.by_path.insert(path.to_string(), id);
        id
    }

    fn resolve(&mut self, data: MaterialData, path: &str, device: &mut dyn RenderDevice) -> Material {
        let preview = data
            .preview
            .as_deref()
            .and_then(|p| self.load_texture(p, device));

        let mut passes = Vec::with_capacity(data.passes.len());
        for pass in data.passes {
            let program = match device.program(&pass.program) {
                Ok(program) => program,
                Err(e) => {
                    warn!("{path}: {e}, using the default program");
                    self.fallback_program
                }
            };

            let variables = pass
                .variables
                .into_iter()
                .map(|variable| {
                    let binding = match variable.value {
                        VariableValue::Float(v) => Binding::Uniform(UniformValue::Float(v)),
                        VariableValue::Int(v) => Binding::Uniform(UniformValue::Int(v)),
                        VariableValue::Vec2(v) => Binding::Uniform(UniformValue::Vec2(v)),
                        VariableValue::Vec3(v) => Binding::Uniform(UniformValue::Vec3(v)),
                        VariableValue::Color(v) => Binding::Uniform(UniformValue::Color(v)),
                        VariableValue::Texture(texture_path) => Binding::Texture(
                            self.load_texture(&texture_path, device)
                                .unwrap_or(self.fallback_texture),
                        ),
                        VariableValue::Builtin(builtin) => Binding::Builtin(builtin),
                    };
                    MaterialVariable {
                        name: variable.name,
                        binding,
                    }
                })
                .collect();

            passes.push(MaterialPass {
                program,
                blend: pass.blend,
                depth_test: pass.depth_test,
                cull: pass.cull,
                filter: pass.filter,
                variables,
            });
        }

        Material {
            path: path.to_string(),
            passes,
            preview,
            cached: true,
        }
    }

    /// Load an image and upload it, memoized by path. Failures warn and
    /// return `None`; callers substitute the fallback texture.
    fn load_texture(&mut self, path: &str, device: &mut dyn RenderDevice) -> Option<TextureHandle> {
        if let Some(&texture) = self.textures.get(path) {
            return Some(texture);
        }
        let handle = match image::open(path) {
            Ok(img) => {
                let rgba = img.to_rgba8();
                let (width, height) = rgba.dimensions();
                match device.create_texture(width, height, rgba.as_raw()) {
                    Ok(handle) => handle,
                    Err(e) => {
                        warn!("failed to upload texture {path}: {e}");
                        return None;
                    }
                }
            }
            Err(e) => {
                warn!("failed to load texture {path}: {e}");
                return None;
            }
        };
        self.textures.insert(path.to_string(), handle);
        Some(handle)
    }

    /// Resolve an id, falling back to slot 0 for anything out of range.
    pub fn get(&self, id: MaterialId) -> &Material {
        self.materials
            .get(id.0)
            .unwrap_or(&self.materials[MaterialId::FALLBACK.0])
    }

    pub fn is_fallback(&self, id: MaterialId) -> bool {
        id == MaterialId::FALLBACK
    }

    pub fn preview(&self, id: MaterialId) -> Option<TextureHandle> {
        self.get(id).preview
    }

    pub fn fallback_texture(&self) -> TextureHandle {
        self.fallback_texture
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    fn set_fallback_texture_binding(&mut self, texture: TextureHandle) {
        let fallback = &mut self.materials[MaterialId::FALLBACK.0];
        for variable in &mut fallback.passes[0].variables {
            if let Binding::Texture(bound) = &mut variable.binding {
                *bound = texture;
                return;
            }
        }
    }

    /// Draw a staged mesh with a material: one device submission per pass.
    ///
    /// Preview-only materials draw through the fallback, with its texture
    /// variable pointed at the preview for the duration of the call.
    pub fn draw_mesh(
        &mut self,
        id: MaterialId,
        device: &mut dyn RenderDevice,
        mesh: MeshHandle,
        num_triangles: usize,
        scene: &SceneState,
        lights: &[Light],
        state: &PassState,
        stats: &mut FrameStats,
    ) {
        let (index, substituted) = match self.materials.get(id.0) {
            Some(material) if material.cached => (id.0, false),
            Some(material) => {
                let preview = material.preview.unwrap_or(self.fallback_texture);
                self.set_fallback_texture_binding(preview);
                (MaterialId::FALLBACK.0, true)
            }
            None => (MaterialId::FALLBACK.0, false),
        };

        let material = &self.materials[index];
        for pass in &material.passes {
            device.bind_program(pass.program);
            device.set_blend(pass.blend.0, pass.blend.1);

            // Mirrored passes flip the winding, so culling flips with them
            let cull = if state.mirror && state.depth % 2 == 1 {
                match pass.cull {
                    CullMode::Positive => CullMode::Negative,
                    CullMode::Negative => CullMode::Positive,
                    CullMode::None => CullMode::None,
                }
            } else {
                pass.cull
            };
            device.set_cull(cull);
            device.set_depth_test(pass.depth_test);

            let model = device.model_matrix();
            device.set_uniform("model", UniformValue::Mat4(model));
            set_scene_uniforms(device, scene, lights);

            let mut unit = 0u32;
            for variable in &pass.variables {
                match &variable.binding {
                    Binding::Uniform(value) => device.set_uniform(&variable.name, *value),
                    Binding::Texture(texture) => {
                        device.bind_texture(unit, *texture);
                        device.set_texture_filter(*texture, pass.filter);
                        device.set_uniform(&variable.name, UniformValue::Int(unit as i32));
                        unit += 1;
                    }
                    Binding::Builtin(BuiltinVar::Time) => {
                        device.set_uniform(&variable.name, UniformValue::Int(scene.ticks as i32));
                    }
                    Binding::Builtin(BuiltinVar::Depth) => {
                        if let Some(depth) = device.depth_texture() {
                            device.bind_texture(unit, depth);
                            device.set_uniform(&variable.name, UniformValue::Int(unit as i32));
                            unit += 1;
                        }
                    }
                    Binding::Builtin(BuiltinVar::ViewportSize) => {
                        let (width, height) = scene.viewport_size;
                        device.set_uniform(
                            &variable.name,
                            UniformValue::Vec2(Vec2::new(width as f32, height as f32)),
                        );
                    }
                }
            }

            device.draw_mesh(mesh);
            stats.batches += 1;
            stats.triangles += num_triangles;
        }

        device.set_cull(CullMode::Positive);

        if substituted {
            let texture = self.fallback_texture;
            self.set_fallback_texture_binding(texture);
        }
    }
}

fn set_scene_uniforms(device: &mut dyn RenderDevice, scene: &SceneState, lights: &[Light]) {
    let properties = scene.properties;
    device.set_uniform("sun.color", UniformValue::Color(properties.sun_color));
    device.set_uniform("sun.position", UniformValue::Vec3(properties.sun_position));
    device.set_uniform("sun.ambience", UniformValue::Color(properties.ambience));
    device.set_uniform("fogColor", UniformValue::Color(properties.fog_color));
    device.set_uniform("fogNear", UniformValue::Float(properties.fog_near));
    device.set_uniform("fogFar", UniformValue::Float(properties.fog_far));

    device.set_uniform("numLights", UniformValue::Int(lights.len() as i32));
    for (i, light) in lights.iter().enumerate() {
        device.set_uniform(&format!("lights[{i}].color"), UniformValue::Color(light.color));
        device.set_uniform(
            &format!("lights[{i}].position"),
            UniformValue::Vec3(light.position),
        );
        device.set_uniform(&format!("lights[{i}].radius"), UniformValue::Float(light.radius));
    }
}
