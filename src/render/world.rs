//! World drawing
//!
//! The frame path for sector worlds, front to back:
//! - `begin_draw` stamps viewport timing and resets the render state
//! - `draw_world` draws the sky slab, finds the camera's origin sector and
//!   walks it recursively through open mirror and portal faces
//! - visible faces batch per material and submit opaque first, then
//!   portal-class, then the sector's actors
//! - `draw_wireframe` draws face outlines directly, for editor views
//!
//! Recursion multiplies reflection / portal transforms onto the device
//! model stack, so nested draws need no camera surgery; the walk is bounded
//! by a depth cap and a per-face exclusion set.

use log::warn;

use std::collections::HashSet;
use std::time::Instant;

use crate::actor::ActorRegistry;
use crate::math::{
    mat4_align, mat4_mul, mat4_reflection, mat4_translation, Color, ColorF, Mat4, Vec2, Vec3,
};
use crate::render::camera::{Camera, CameraId, CameraMode, DrawMode};
use crate::render::context::{RenderContext, SceneState};
use crate::render::device::{
    CullMode, DeviceError, MeshHandle, RenderDevice, UniformValue,
};
use crate::render::material::MaterialId;
use crate::render::viewport::ViewportId;
use crate::render::visibility::{visible_faces, visible_portals, FaceKey, Frustum};
use crate::world::{FaceFlags, Light, World, WorldFace, WorldMesh, WorldVertex};

/// The static sky slab: a fan of translucent quads hovering above the
/// camera, scrolled per layer. Eight vertices, an opaque inner ring and an
/// outer ring faded to transparent so layers dissolve at the horizon.
pub(crate) struct SkyMesh {
    mesh: MeshHandle,
    vertices: [WorldVertex; 8],
}

impl SkyMesh {
    const TRIANGLES: [[u32; 3]; 10] = [
        // corners
        [2, 1, 0],
        [3, 1, 2],
        [4, 3, 2],
        [5, 3, 4],
        [6, 5, 4],
        [7, 5, 6],
        [0, 7, 6],
        [1, 7, 0],
        // middle
        [4, 2, 0],
        [6, 4, 0],
    ];

    fn slab_vertices() -> [WorldVertex; 8] {
        let corner = |x: f32, z: f32, alpha: u8| WorldVertex {
            position: Vec3::new(x, 10.0, z),
            color: Color::new(255, 255, 255, alpha),
            ..WorldVertex::default()
        };
        [
            corner(100.0, 100.0, 255),
            corner(200.0, 200.0, 0),
            corner(100.0, -100.0, 255),
            corner(200.0, -200.0, 0),
            corner(-100.0, -100.0, 255),
            corner(-200.0, -200.0, 0),
            corner(-100.0, 100.0, 255),
            corner(-200.0, 200.0, 0),
        ]
    }

    fn create(device: &mut dyn RenderDevice) -> Result<Self, DeviceError> {
        let vertices = Self::slab_vertices();
        let mesh = device.create_mesh(&vertices, Self::TRIANGLES.len())?;
        device.set_mesh_triangles(mesh, &Self::TRIANGLES);
        Ok(Self { mesh, vertices })
    }
}

/// Per-viewport frame setup: record frame timing, reset the render state
/// and clear the target.
///
/// The clear colour comes from the world when the viewport has no camera
/// or a perspective one; editor projections clear to a neutral grey.
pub fn begin_draw(
    ctx: &mut RenderContext,
    device: &mut dyn RenderDevice,
    viewport: ViewportId,
    world: Option<&World>,
) {
    let Some(viewport) = ctx.viewports.get_mut(viewport) else {
        warn!("begin_draw on unknown viewport {}", viewport.0);
        return;
    };
    viewport.tick(Instant::now());

    let camera_mode = viewport
        .camera
        .and_then(|id| ctx.cameras.get(id))
        .map(|camera| camera.mode);

    let mut clear = ColorF::new(50.0 / 255.0, 50.0 / 255.0, 50.0 / 255.0, 1.0);
    if let Some(world) = world {
        if camera_mode.is_none() || camera_mode == Some(CameraMode::Perspective) {
            clear = world.properties.clear_color;
        }
    }

    device.set_clear_color(clear);
    device.set_depth_test(true);
    device.set_depth_write(true);
    device.set_cull(CullMode::Positive);

    let (x, y, width, height) = viewport.rect();
    device.set_viewport(x, y, width, height);
    device.clear(true, true);
}

/// Shared inputs of one world draw, threaded through the sector recursion.
struct SectorWalk<'a> {
    world: &'a World,
    actors: &'a ActorRegistry,
    camera: &'a Camera,
    frustum: Frustum,
    viewport_size: (u32, u32),
}

/// Draw a world through `camera` (or the active camera) into a viewport.
///
/// Draws the sky first with depth writes off, then recursively walks
/// sectors starting from the one containing the camera.
pub fn draw_world(
    ctx: &mut RenderContext,
    device: &mut dyn RenderDevice,
    world: &World,
    actors: &ActorRegistry,
    camera: Option<CameraId>,
    viewport: ViewportId,
) {
    let Some(camera) = ctx.cameras.resolve(camera).cloned() else {
        return;
    };
    let Some(viewport) = ctx.viewports.get(viewport) else {
        warn!("draw_world on unknown viewport {}", viewport.0);
        return;
    };
    let viewport_size = viewport.size();
    // A collapsed viewport would zero the aspect and poison the projection
    let aspect = viewport_size.0.max(1) as f32 / viewport_size.1.max(1) as f32;

    device.set_uniform("projection", UniformValue::Mat4(camera.projection(aspect)));
    device.set_uniform("view", UniformValue::Mat4(camera.view()));

    if camera.draw_mode == DrawMode::Wireframe {
        draw_wireframe(device, world);
        return;
    }

    device.push_matrix();
    device.load_identity();

    draw_sky(ctx, device, world, &camera, viewport_size);

    if let Some(origin) = world.sector_index_by_global_origin(camera.position) {
        let walk = SectorWalk {
            world,
            actors,
            camera: &camera,
            frustum: camera.frustum(aspect),
            viewport_size,
        };
        let mut excluded = HashSet::new();
        draw_sector(ctx, device, &walk, origin, &mut excluded);
    }

    device.pop_matrix();
}

fn draw_sector(
    ctx: &mut RenderContext,
    device: &mut dyn RenderDevice,
    walk: &SectorWalk,
    sector_index: usize,
    excluded: &mut HashSet<FaceKey>,
) {
    let Some(sector) = walk.world.sector_by_index(sector_index) else {
        return;
    };

    draw_sector_body(ctx, device, walk, sector_index, excluded);

    walk.actors.draw_actors(&sector.actors, device, walk.camera);
}

fn draw_sector_body(
    ctx: &mut RenderContext,
    device: &mut dyn RenderDevice,
    walk: &SectorWalk,
    sector_index: usize,
    excluded: &mut HashSet<FaceKey>,
) {
    let Some(sector) = walk.world.sector_by_index(sector_index) else {
        return;
    };
    let Some(mesh) = &sector.mesh else {
        return;
    };

    let visible = visible_faces(&walk.frustum, mesh, sector_index, excluded, &ctx.options);
    if visible.is_empty() {
        return;
    }

    // Portals first - their recursive draws land underneath this sector's
    // own geometry
    let portals = visible_portals(mesh, &visible);
    ctx.stats.visible_portals += portals.len();

    let lights = sector.visible_lights();
    let lights = &lights[..lights.len().min(ctx.options.max_lights_per_pass)];

    for &face_index in &portals {
        let face = &mesh.faces[face_index as usize];
        if face.portal.map_or(false, |portal| portal.closed) {
            continue;
        }

        // Excluding the face bounds self-recursion; restored after so later
        // passes over the sector still draw it
        let key = FaceKey {
            sector: sector_index,
            face: face_index,
        };
        excluded.insert(key);

        if face.flags.contains(FaceFlags::MIRROR) {
            if ctx.pass.depth < ctx.options.max_portal_depth {
                ctx.pass.depth += 1;
                ctx.pass.mirror = true;

                device.push_matrix();
                device.mult_matrix(&mat4_reflection(face.normal, face.origin));
                draw_sector(ctx, device, walk, sector_index, excluded);
                device.pop_matrix();

                ctx.pass.depth -= 1;
                if ctx.pass.depth == 0 {
                    ctx.pass.mirror = false;
                }
            }
        } else if let Some(portal) = face.portal {
            if ctx.pass.depth < ctx.options.max_portal_depth {
                let target_sector = portal.target_sector as usize;
                let target = walk
                    .world
                    .sector_by_index(target_sector)
                    .and_then(|sector| sector.mesh.as_ref())
                    .and_then(|mesh| mesh.faces.get(portal.target_face as usize));

                match target {
                    Some(target_face) => {
                        ctx.pass.depth += 1;

                        let target_key = FaceKey {
                            sector: target_sector,
                            face: portal.target_face,
                        };
                        excluded.insert(target_key);

                        device.push_matrix();
                        device.mult_matrix(&portal_transform(face, target_face));
                        draw_sector(ctx, device, walk, target_sector, excluded);
                        device.pop_matrix();

                        excluded.remove(&target_key);
                        ctx.pass.depth -= 1;
                    }
                    None => warn!(
                        "portal in sector {sector_index} targets missing sector {} face {}",
                        portal.target_sector, portal.target_face
                    ),
                }
            }
        }

        excluded.remove(&key);
    }

    draw_faces(ctx, device, walk, mesh, &visible, lights, false);
    draw_faces(ctx, device, walk, mesh, &portals, lights, true);
}

/// Rigid transform presenting the target sector behind the source portal:
/// maps target-sector coordinates so the target face lands on the source
/// face, facing back out of it.
fn portal_transform(source: &WorldFace, target: &WorldFace) -> Mat4 {
    let align = mat4_align(target.normal, source.normal.scale(-1.0));
    mat4_mul(
        &mat4_translation(source.origin),
        &mat4_mul(&align, &mat4_translation(target.origin.scale(-1.0))),
    )
}

/// Stage and submit a face subset, one batch per material slot plus a
/// trailing fallback batch.
///
/// A slot that resolved to the fallback material is skipped; its faces,
/// along with faces carrying no material at all, draw in the fallback
/// batch instead so nothing submits twice.
fn draw_faces(
    ctx: &mut RenderContext,
    device: &mut dyn RenderDevice,
    walk: &SectorWalk,
    mesh: &WorldMesh,
    subset: &[u32],
    lights: &[Light],
    transparent_only: bool,
) {
    let num_materials = mesh.materials.len();

    let face_material = |face: &WorldFace| -> MaterialId {
        face.material
            .and_then(|slot| mesh.materials.get(slot).copied())
            .unwrap_or(MaterialId::FALLBACK)
    };

    for batch in 0..=num_materials {
        let material = if batch < num_materials {
            mesh.materials[batch]
        } else {
            MaterialId::FALLBACK
        };
        if batch < num_materials && ctx.materials.is_fallback(material) {
            continue;
        }

        let mut triangles: Vec<[u32; 3]> = Vec::new();
        for &face_index in subset {
            let face = &mesh.faces[face_index as usize];
            if face.is_portal() != transparent_only || face_material(face) != material {
                continue;
            }
            triangles.extend(face.triangulate());
            ctx.stats.faces_drawn += 1;
        }

        if triangles.is_empty() {
            continue;
        }

        device.set_mesh_triangles(mesh.draw_mesh, &triangles);

        let scene = SceneState {
            properties: &walk.world.properties,
            viewport_size: walk.viewport_size,
            ticks: ctx.ticks,
        };
        let pass = ctx.pass;
        ctx.materials.draw_mesh(
            material,
            device,
            mesh.draw_mesh,
            triangles.len(),
            &scene,
            lights,
            &pass,
            &mut ctx.stats,
        );
    }
}

fn draw_sky(
    ctx: &mut RenderContext,
    device: &mut dyn RenderDevice,
    world: &World,
    camera: &Camera,
    viewport_size: (u32, u32),
) {
    let layers = &world.properties.sky_materials;
    if layers.is_empty() {
        return;
    }

    if ctx.sky.is_none() {
        match SkyMesh::create(device) {
            Ok(sky) => ctx.sky = Some(sky),
            Err(e) => {
                warn!("failed to create sky mesh: {e}");
                return;
            }
        }
    }

    let materials: Vec<MaterialId> = layers
        .iter()
        .map(|path| ctx.materials.cache(path, device, false))
        .collect();

    // The slab must never occlude world geometry, so depth writes stay off
    // for every layer
    device.set_depth_test(false);
    device.set_depth_write(false);

    let mut location = camera.position;
    location.y += ctx.options.sky_height_offset;

    let ticks = ctx.ticks as f32;

    draw_sky_layer(
        ctx,
        device,
        world,
        viewport_size,
        materials[0],
        location,
        Vec2::new(ticks / 700.0, ticks / 400.0),
        0.15,
    );

    if materials.len() > 1 {
        location.y += 2.0;
        draw_sky_layer(
            ctx,
            device,
            world,
            viewport_size,
            materials[1],
            location,
            Vec2::new(-(ticks / 100.0), ticks / 100.0),
            0.45,
        );
    }

    if materials.len() > 2 {
        location.y += 4.0;
        draw_sky_layer(
            ctx,
            device,
            world,
            viewport_size,
            materials[2],
            location,
            Vec2::new(camera.position.x / 100.0, camera.position.z / 100.0),
            0.01,
        );
    }

    device.set_depth_test(true);
    device.set_depth_write(true);
}

/// One scrolling cloud layer: re-project the slab's planar UVs with this
/// layer's offset and scale, then draw it translated to `location`.
fn draw_sky_layer(
    ctx: &mut RenderContext,
    device: &mut dyn RenderDevice,
    world: &World,
    viewport_size: (u32, u32),
    material: MaterialId,
    location: Vec3,
    offset: Vec2,
    scale: f32,
) {
    let Some(sky) = &ctx.sky else {
        return;
    };
    let mesh = sky.mesh;
    let mut vertices = sky.vertices;
    for vertex in &mut vertices {
        vertex.uv = Vec2::new(
            vertex.position.x * scale + offset.x,
            vertex.position.z * scale + offset.y,
        );
    }

    device.push_matrix();
    device.load_identity();
    device.mult_matrix(&mat4_translation(location));

    device.set_mesh_vertices(mesh, &vertices);

    let scene = SceneState {
        properties: &world.properties,
        viewport_size,
        ticks: ctx.ticks,
    };
    let pass = ctx.pass;
    ctx.materials.draw_mesh(
        material,
        device,
        mesh,
        SkyMesh::TRIANGLES.len(),
        &scene,
        &[],
        &pass,
        &mut ctx.stats,
    );

    device.pop_matrix();
}

/// Outline every sector body as line loops, portal-linked faces in magenta
/// and the rest in white, with green vertex markers. The world is authored
/// as polygons, so this is truer than a triangulated wireframe; editor
/// views use it.
pub fn draw_wireframe(device: &mut dyn RenderDevice, world: &World) {
    match device.program("default_vertex") {
        Ok(program) => device.bind_program(program),
        Err(e) => warn!("wireframe shader unavailable: {e}"),
    }

    device.push_matrix();
    device.load_identity();

    let mut lines: Vec<(Vec3, Color)> = Vec::new();
    let mut points: Vec<(Vec3, Color)> = Vec::new();

    for sector in &world.sectors {
        let Some(mesh) = &sector.mesh else {
            continue;
        };
        for face in &mesh.faces {
            let color = if face.portal.is_some() {
                Color::MAGENTA
            } else {
                Color::WHITE
            };

            for (j, &index) in face.vertices.iter().enumerate() {
                let next = face.vertices[(j + 1) % face.vertices.len()];
                let a = mesh.vertices[index as usize].position;
                let b = mesh.vertices[next as usize].position;
                lines.push((a, color));
                lines.push((b, color));
                points.push((a, Color::GREEN));
            }
        }
    }

    device.draw_lines(&lines);
    device.draw_points(&points, 4.0);

    device.pop_matrix();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{mat4_identity, Aabb};
    use crate::render::device::{BlendFactor, FilterMode, RecordingDevice};
    use crate::render::material::{MaterialData, PassData};
    use crate::world::{
        limits, save_mesh, write_document, MeshData, PortalLink, SectorData, WorldData,
        WorldProperties, WorldSector,
    };
    use std::rc::Rc;

    fn push_quad(
        vertices: &mut Vec<WorldVertex>,
        corners: [[f32; 3]; 4],
        normal: Vec3,
    ) -> Vec<u32> {
        let base = vertices.len() as u32;
        for [x, y, z] in corners {
            vertices.push(WorldVertex {
                position: Vec3::new(x, y, z),
                normal,
                ..WorldVertex::default()
            });
        }
        (base..base + 4).collect()
    }

    fn finish_mesh(
        device: &mut RecordingDevice,
        path: &str,
        vertices: Vec<WorldVertex>,
        faces: Vec<WorldFace>,
        materials: Vec<MaterialId>,
    ) -> Rc<WorldMesh> {
        let mut mesh = WorldMesh {
            path: path.to_string(),
            vertices,
            faces,
            material_paths: Vec::new(),
            materials,
            bounds: Aabb::default(),
            draw_mesh: crate::render::device::MeshHandle(0),
        };
        mesh.generate_bounds();
        mesh.draw_mesh = device
            .create_mesh(&mesh.vertices, mesh.total_triangles())
            .unwrap();
        Rc::new(mesh)
    }

    fn sector_around_origin(mesh: Rc<WorldMesh>) -> WorldSector {
        WorldSector {
            name: "room".to_string(),
            mesh: Some(mesh),
            bounds: Aabb::new(Vec3::new(-500.0, -500.0, -500.0), Vec3::new(500.0, 500.0, 500.0)),
            ..WorldSector::default()
        }
    }

    fn ready_context(device: &mut RecordingDevice) -> (RenderContext, CameraId, ViewportId) {
        let mut ctx = RenderContext::new(device).unwrap();
        let camera = ctx.cameras.create("main", Vec3::ZERO, Vec3::ZERO);
        let viewport = ctx.viewports.create(0, 0, 256, 256).unwrap();
        ctx.begin_frame(0);
        (ctx, camera, viewport)
    }

    /// Floor ahead of the camera plus one wall flagged MIRROR facing it.
    fn mirror_room_geometry() -> (Vec<WorldVertex>, Vec<WorldFace>) {
        let mut vertices = Vec::new();
        let floor = push_quad(
            &mut vertices,
            [
                [-50.0, -10.0, -50.0],
                [-50.0, -10.0, -150.0],
                [50.0, -10.0, -150.0],
                [50.0, -10.0, -50.0],
            ],
            Vec3::UP,
        );
        let wall = push_quad(
            &mut vertices,
            [
                [-40.0, -40.0, -100.0],
                [40.0, -40.0, -100.0],
                [40.0, 40.0, -100.0],
                [-40.0, 40.0, -100.0],
            ],
            Vec3::new(0.0, 0.0, 1.0),
        );

        let faces = vec![
            WorldFace::new(floor, None, FaceFlags::empty()),
            WorldFace::new(wall, None, FaceFlags::MIRROR),
        ];
        (vertices, faces)
    }

    fn mirror_world(device: &mut RecordingDevice) -> World {
        let (vertices, faces) = mirror_room_geometry();
        let mesh = finish_mesh(device, "test://mirror-room", vertices, faces, Vec::new());

        let mut world = World::new();
        world.meshes.push(Rc::clone(&mesh));
        world.sectors.push(sector_around_origin(mesh));
        world
    }

    /// Two rooms: the near one carries an open portal connecting to the far
    /// one, whose own portal face sits on the shared wall.
    fn portal_world(device: &mut RecordingDevice, closed: bool) -> World {
        let mut near_vertices = Vec::new();
        let near_floor = push_quad(
            &mut near_vertices,
            [
                [-50.0, -10.0, -10.0],
                [-50.0, -10.0, -150.0],
                [50.0, -10.0, -150.0],
                [50.0, -10.0, -10.0],
            ],
            Vec3::UP,
        );
        let doorway = push_quad(
            &mut near_vertices,
            [
                [-20.0, -20.0, -50.0],
                [20.0, -20.0, -50.0],
                [20.0, 20.0, -50.0],
                [-20.0, 20.0, -50.0],
            ],
            Vec3::new(0.0, 0.0, 1.0),
        );
        let mut doorway_face = WorldFace::new(doorway, None, FaceFlags::PORTAL);
        doorway_face.portal = Some(PortalLink {
            target_sector: 1,
            target_face: 0,
            closed,
        });
        let near_faces = vec![
            doorway_face,
            WorldFace::new(near_floor, None, FaceFlags::empty()),
        ];
        let near =
            finish_mesh(device, "test://near-room", near_vertices, near_faces, Vec::new());

        let mut far_vertices = Vec::new();
        let far_doorway = push_quad(
            &mut far_vertices,
            [
                [-20.0, -20.0, -150.0],
                [20.0, -20.0, -150.0],
                [20.0, 20.0, -150.0],
                [-20.0, 20.0, -150.0],
            ],
            Vec3::new(0.0, 0.0, -1.0),
        );
        let far_floor = push_quad(
            &mut far_vertices,
            [
                [-50.0, -10.0, -150.0],
                [-50.0, -10.0, -250.0],
                [50.0, -10.0, -250.0],
                [50.0, -10.0, -150.0],
            ],
            Vec3::UP,
        );
        let mut far_doorway_face = WorldFace::new(far_doorway, None, FaceFlags::PORTAL);
        far_doorway_face.portal = Some(PortalLink {
            target_sector: 0,
            target_face: 0,
            closed,
        });
        let far_faces = vec![
            far_doorway_face,
            WorldFace::new(far_floor, None, FaceFlags::empty()),
        ];
        let far = finish_mesh(device, "test://far-room", far_vertices, far_faces, Vec::new());

        let mut world = World::new();
        world.meshes.push(Rc::clone(&near));
        world.meshes.push(Rc::clone(&far));
        world.sectors.push(WorldSector {
            name: "near".to_string(),
            mesh: Some(near),
            bounds: Aabb::new(Vec3::new(-60.0, -60.0, -50.0), Vec3::new(60.0, 60.0, 10.0)),
            ..WorldSector::default()
        });
        world.sectors.push(WorldSector {
            name: "far".to_string(),
            mesh: Some(far),
            bounds: Aabb::new(
                Vec3::new(-60.0, -60.0, -250.0),
                Vec3::new(60.0, 60.0, -150.0),
            ),
            ..WorldSector::default()
        });
        world
    }

    #[test]
    fn test_mirror_recursion_end_to_end() {
        let mut device = RecordingDevice::new();
        let (mut ctx, camera, viewport) = ready_context(&mut device);

        // The mirror room takes the document route: mesh and world files on
        // disk, loaded back through the context's caches. A second sector
        // off to the side shares the same mesh.
        let dir = tempfile::tempdir().unwrap();
        let mesh_path = dir.path().join("mirror-room.mesh");
        let (vertices, faces) = mirror_room_geometry();
        save_mesh(
            &MeshData {
                version: limits::MESH_VERSION,
                materials: Vec::new(),
                vertices,
                faces,
            },
            &mesh_path,
        )
        .unwrap();

        let world_path = dir.path().join("mirror.world");
        write_document(
            &WorldData {
                version: limits::WORLD_VERSION,
                properties: WorldProperties::default(),
                entities: Vec::new(),
                meshes: vec![mesh_path.to_str().unwrap().to_string()],
                sectors: vec![
                    SectorData {
                        name: "room".to_string(),
                        mesh: Some(0),
                        bounds: Aabb::new(
                            Vec3::new(-500.0, -500.0, -500.0),
                            Vec3::new(500.0, 500.0, 500.0),
                        ),
                        objects: Vec::new(),
                        lights: Vec::new(),
                    },
                    SectorData {
                        name: "annex".to_string(),
                        mesh: Some(0),
                        bounds: Aabb::new(
                            Vec3::new(600.0, -500.0, -500.0),
                            Vec3::new(1600.0, 500.0, 500.0),
                        ),
                        objects: Vec::new(),
                        lights: Vec::new(),
                    },
                ],
            },
            &world_path,
        )
        .unwrap();

        let world = ctx.load_world(world_path.to_str().unwrap(), &mut device).unwrap();
        assert_eq!(world.sectors.len(), 2);
        // The pool hands both sectors the one cached mesh
        assert!(Rc::ptr_eq(
            world.sectors[0].mesh.as_ref().unwrap(),
            world.sectors[1].mesh.as_ref().unwrap()
        ));
        let actors = ActorRegistry::new();

        draw_world(&mut ctx, &mut device, &world, &actors, Some(camera), viewport);

        // Reflected floor, direct floor, then the mirror face itself; the
        // camera sits in the first sector, so the annex never enters the walk
        assert_eq!(device.draw_calls.len(), 3);
        assert_eq!(ctx.stats.visible_portals, 1);
        assert_eq!(ctx.stats.batches, 3);
        assert_eq!(ctx.stats.faces_drawn, 3);
        assert_eq!(ctx.stats.triangles, 6);

        // The recursive draw goes out under the reflection with its
        // winding flipped; the direct draws stay put
        let reflected = &device.draw_calls[0];
        assert_eq!(reflected.cull, CullMode::Negative);
        assert!((reflected.model_matrix[2][2] - -1.0).abs() < 0.001);
        assert!((reflected.model_matrix[2][3] - -200.0).abs() < 0.001);

        let direct = &device.draw_calls[1];
        assert_eq!(direct.cull, CullMode::Positive);
        assert!((direct.model_matrix[2][3] - 0.0).abs() < 0.001);

        // Stack balanced and state restored once the frame is out
        assert_eq!(device.model_matrix(), mat4_identity());
        assert_eq!(device.cull, CullMode::Positive);
        assert_eq!(ctx.pass.depth, 0);
        assert!(!ctx.pass.mirror);
    }

    #[test]
    fn test_portal_recursion_reaches_target() {
        let mut device = RecordingDevice::new();
        let (mut ctx, camera, viewport) = ready_context(&mut device);
        let world = portal_world(&mut device, false);
        let actors = ActorRegistry::new();

        draw_world(&mut ctx, &mut device, &world, &actors, Some(camera), viewport);

        // Far floor through the portal, near floor, then the portal face.
        // The far room's own portal face is excluded, so it neither draws
        // nor recurses back.
        assert_eq!(device.draw_calls.len(), 3);
        assert_eq!(ctx.stats.visible_portals, 1);

        // Far geometry appears shifted so its doorway lands on ours
        let through = &device.draw_calls[0];
        assert_eq!(through.cull, CullMode::Positive);
        assert!((through.model_matrix[2][3] - 100.0).abs() < 0.001);

        assert_eq!(device.model_matrix(), mat4_identity());
        assert_eq!(ctx.pass.depth, 0);
    }

    #[test]
    fn test_closed_portal_skips_recursion() {
        let mut device = RecordingDevice::new();
        let (mut ctx, camera, viewport) = ready_context(&mut device);
        let world = portal_world(&mut device, true);
        let actors = ActorRegistry::new();

        draw_world(&mut ctx, &mut device, &world, &actors, Some(camera), viewport);

        // Near floor and the (still visible) closed portal face only
        assert_eq!(device.draw_calls.len(), 2);
        assert_eq!(ctx.stats.visible_portals, 1);
    }

    #[test]
    fn test_depth_cap_stops_recursion() {
        let mut device = RecordingDevice::new();
        let (mut ctx, camera, viewport) = ready_context(&mut device);
        ctx.options.max_portal_depth = 0;
        let world = mirror_world(&mut device);
        let actors = ActorRegistry::new();

        draw_world(&mut ctx, &mut device, &world, &actors, Some(camera), viewport);

        assert_eq!(device.draw_calls.len(), 2);
        assert_eq!(ctx.stats.visible_portals, 1);
        assert!(device
            .draw_calls
            .iter()
            .all(|call| call.cull == CullMode::Positive));
    }

    #[test]
    fn test_material_slots_split_batches() {
        let mut device = RecordingDevice::new();
        let (mut ctx, camera, viewport) = ready_context(&mut device);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wall.ron");
        write_document(
            &MaterialData {
                preview: None,
                passes: vec![PassData {
                    program: "default".to_string(),
                    blend: (BlendFactor::One, BlendFactor::Zero),
                    depth_test: true,
                    cull: CullMode::Positive,
                    filter: FilterMode::Nearest,
                    variables: Vec::new(),
                }],
            },
            &path,
        )
        .unwrap();
        let wall_material = ctx
            .materials
            .cache(path.to_str().unwrap(), &mut device, false);
        let broken_material = ctx.materials.cache("test://missing.ron", &mut device, false);
        assert_eq!(broken_material, MaterialId::FALLBACK);

        // Three floors: a real material slot, a slot that fell back, and
        // no material at all
        let mut vertices = Vec::new();
        let mut faces = Vec::new();
        for (i, material) in [Some(0), Some(1), None].into_iter().enumerate() {
            let z = -40.0 * (i as f32 + 1.0);
            let quad = push_quad(
                &mut vertices,
                [
                    [-50.0, -10.0, z],
                    [-50.0, -10.0, z - 30.0],
                    [50.0, -10.0, z - 30.0],
                    [50.0, -10.0, z],
                ],
                Vec3::UP,
            );
            faces.push(WorldFace::new(quad, material, FaceFlags::empty()));
        }
        let mesh = finish_mesh(
            &mut device,
            "test://floors",
            vertices,
            faces,
            vec![wall_material, MaterialId::FALLBACK],
        );

        let mut world = World::new();
        world.meshes.push(Rc::clone(&mesh));
        world.sectors.push(sector_around_origin(mesh));

        let actors = ActorRegistry::new();
        draw_world(&mut ctx, &mut device, &world, &actors, Some(camera), viewport);

        // Slot 0 draws on its own; slot 1 is skipped and both its face and
        // the material-less face fold into the one fallback batch
        assert_eq!(device.draw_calls.len(), 2);
        assert_eq!(ctx.stats.faces_drawn, 3);
        assert_eq!(device.draw_calls[0].num_triangles, 2);
        assert_eq!(device.draw_calls[1].num_triangles, 4);
    }

    #[test]
    fn test_sky_layers_scroll_above_camera() {
        let mut device = RecordingDevice::new();
        let (mut ctx, camera, viewport) = ready_context(&mut device);
        ctx.begin_frame(700);

        let mut world = World::new();
        world.properties.sky_materials = vec![
            "test://sky0.ron".to_string(),
            "test://sky1.ron".to_string(),
            "test://sky2.ron".to_string(),
        ];
        let actors = ActorRegistry::new();

        draw_world(&mut ctx, &mut device, &world, &actors, Some(camera), viewport);

        // One submission per layer, stacked upward from the height offset
        assert_eq!(device.draw_calls.len(), 3);
        let heights: Vec<f32> = device
            .draw_calls
            .iter()
            .map(|call| call.model_matrix[1][3])
            .collect();
        assert!((heights[0] - 10.0).abs() < 0.001);
        assert!((heights[1] - 12.0).abs() < 0.001);
        assert!((heights[2] - 16.0).abs() < 0.001);

        // Each layer re-uploads the slab with fresh UVs
        let sky_mesh = device.draw_calls[0].mesh;
        assert_eq!(
            device
                .vertex_uploads
                .iter()
                .filter(|&&mesh| mesh == sky_mesh)
                .count(),
            3
        );

        assert_eq!(ctx.stats.batches, 3);
        assert_eq!(ctx.stats.triangles, 30);

        // Depth writes come back on for the sector walk
        assert!(device.depth_write);
        assert!(device.depth_test);
        assert_eq!(device.model_matrix(), mat4_identity());
    }

    #[test]
    fn test_no_sky_without_materials() {
        let mut device = RecordingDevice::new();
        let (mut ctx, camera, viewport) = ready_context(&mut device);
        let world = World::new();
        let actors = ActorRegistry::new();

        draw_world(&mut ctx, &mut device, &world, &actors, Some(camera), viewport);

        assert!(device.draw_calls.is_empty());
        assert!(ctx.sky.is_none());
    }

    #[test]
    fn test_begin_draw_clear_color_follows_camera_mode() {
        let mut device = RecordingDevice::new();
        let (mut ctx, camera, viewport) = ready_context(&mut device);
        let mut world = World::new();
        world.properties.clear_color = ColorF::new(0.1, 0.2, 0.3, 1.0);

        // Perspective camera on the viewport takes the world colour
        ctx.viewports.set_camera(viewport, Some(camera));
        begin_draw(&mut ctx, &mut device, viewport, Some(&world));
        assert_eq!(device.clear_color, Some(world.properties.clear_color));
        assert_eq!(device.viewport_rect, Some((0, 0, 256, 256)));
        assert_eq!(device.clears, 1);

        // An editor projection clears neutral grey instead
        ctx.cameras.get_mut(camera).unwrap().mode = CameraMode::Top;
        begin_draw(&mut ctx, &mut device, viewport, Some(&world));
        let grey = device.clear_color.unwrap();
        assert!((grey.r - 50.0 / 255.0).abs() < 0.001);
        assert_eq!(device.clears, 2);
    }

    #[test]
    fn test_zero_size_viewport_still_culls() {
        let mut device = RecordingDevice::new();
        let (mut ctx, camera, viewport) = ready_context(&mut device);
        ctx.viewports.set_size(viewport, 0, 0);

        // One floor ahead of the camera, one off beyond the right frustum edge
        let mut vertices = Vec::new();
        let ahead = push_quad(
            &mut vertices,
            [
                [-50.0, -10.0, -50.0],
                [-50.0, -10.0, -150.0],
                [50.0, -10.0, -150.0],
                [50.0, -10.0, -50.0],
            ],
            Vec3::UP,
        );
        let aside = push_quad(
            &mut vertices,
            [
                [300.0, -10.0, -50.0],
                [300.0, -10.0, -150.0],
                [400.0, -10.0, -150.0],
                [400.0, -10.0, -50.0],
            ],
            Vec3::UP,
        );
        let faces = vec![
            WorldFace::new(ahead, None, FaceFlags::empty()),
            WorldFace::new(aside, None, FaceFlags::empty()),
        ];
        let mesh = finish_mesh(&mut device, "test://lopsided", vertices, faces, Vec::new());
        let mut world = World::new();
        world.meshes.push(Rc::clone(&mesh));
        world.sectors.push(sector_around_origin(mesh));
        let actors = ActorRegistry::new();

        draw_world(&mut ctx, &mut device, &world, &actors, Some(camera), viewport);

        // A collapsed viewport must not zero the aspect; the frustum stays
        // finite, the side quad stays culled and only the floor draws
        let Some(UniformValue::Mat4(projection)) = device.uniform("projection") else {
            panic!("projection uniform missing");
        };
        assert!(projection[0][0].is_finite());
        assert_eq!(ctx.stats.faces_drawn, 1);
        assert_eq!(device.draw_calls.len(), 1);
        assert_eq!(device.draw_calls[0].num_triangles, 2);
    }

    #[test]
    fn test_wireframe_outlines_faces() {
        let mut device = RecordingDevice::new();
        let world = portal_world(&mut device, false);

        draw_wireframe(&mut device, &world);

        // Two rooms, two quads each: 16 edges and 16 corner markers
        assert_eq!(device.lines_drawn, 16);
        assert_eq!(device.points_drawn, 16);
        assert_eq!(device.model_matrix(), mat4_identity());
    }

    #[test]
    fn test_wireframe_camera_swaps_draw_path() {
        let mut device = RecordingDevice::new();
        let (mut ctx, camera, viewport) = ready_context(&mut device);
        ctx.cameras.get_mut(camera).unwrap().draw_mode = DrawMode::Wireframe;
        let world = mirror_world(&mut device);
        let actors = ActorRegistry::new();

        draw_world(&mut ctx, &mut device, &world, &actors, Some(camera), viewport);

        // Outlines only, no material batches
        assert!(device.draw_calls.is_empty());
        assert_eq!(device.lines_drawn, 8);
        assert_eq!(device.points_drawn, 8);
    }
}
