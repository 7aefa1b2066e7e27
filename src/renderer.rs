//! The wgpu rendering backend for the compositor.
//!
//! The compositor wants to interleave stamp, restrict and draw operations
//! with per-draw view matrices. Uniform writes cannot be interleaved with an
//! open render pass, so rendering runs in two phases: [`FrameGraph`] records
//! the compositor's operations and accumulates every uniform block, then the
//! renderer writes the uniform arrays once and replays the recorded commands
//! inside a single pass using dynamic offsets.
//!
//! The visibility mask lives in the stencil plane of one
//! `Depth24PlusStencil8` target:
//!
//! | operation         | compare        | pass op        | writes      |
//! |-------------------|----------------|----------------|-------------|
//! | stamp (first)     | `Always`       | `Replace`      | stencil     |
//! | stamp (increment) | `Equal` (id-1) | `IncrementClamp` | stencil   |
//! | restrict exact    | `Equal`        | `Keep`         | color+depth |
//! | restrict at-least | `LessEqual`    | `Keep`         | color+depth |
//! | draw-and-stamp    | `Always`       | `Replace`      | all         |
//!
//! "At least" means `reference <= stored` (this window or any deeper one),
//! which wgpu spells as `LessEqual` with the reference on the left. It lets
//! content in front of a window rasterize over it, with the depth test
//! resolving against the recursion content inside.

use glam::{Mat4, Vec3, Vec4};
use hecs::Entity;

use crate::assets::{Assets, MeshId, TextureId};
use crate::camera;
use crate::compositor::{camera_position, Compositor, MaskedDraw, PortalSide};
use crate::gpu::{GpuContext, DEPTH_STENCIL_FORMAT};
use crate::mesh::Vertex3d;
use crate::scene::{RenderMesh, Scene, Translucent};
use crate::texture::Texture;

/// First mask id used for pick stamping; portal recursion ids stay below it.
const PICK_BASE_ID: u32 = 128;

/// Dynamic-offset stride; also the default uniform offset alignment limit.
const UNIFORM_STRIDE: usize = 256;

/// Per-view uniforms, one entry per distinct (eye, view) a frame uses.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct CameraUniforms {
    view_proj: [[f32; 4]; 4],
    view: [[f32; 4]; 4],
    proj: [[f32; 4]; 4],
    camera_pos: [f32; 3],
    time: f32,
}

/// Per-draw uniforms.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ModelUniforms {
    model: [[f32; 4]; 4],
    normal_matrix: [[f32; 4]; 4],
    color: [f32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct StampUniforms {
    mvp: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct SkyUniforms {
    inv_view_proj: [[f32; 4]; 4],
}

/// Which restriction the next ordinary draws run under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MaskMode {
    Exact,
    AtLeast,
    /// Draw normally but also overwrite the mask with the current reference.
    ExactStamp,
}

#[derive(Clone, Copy, Debug)]
enum Cmd {
    StencilRef(u32),
    Mode(MaskMode),
    StampFirst { mvp: u32 },
    StampIncrement { mvp: u32 },
    DrawMesh {
        mesh: MeshId,
        texture: Option<TextureId>,
        cam: u32,
        model: u32,
    },
    DrawSky { sky: u32 },
    DrawPortal { cam: u32, model: u32 },
}

/// Records one frame's worth of compositor operations plus their uniforms.
struct FrameGraph<'s> {
    scene: &'s Scene,
    proj: Mat4,
    time: f32,
    cmds: Vec<Cmd>,
    cameras: Vec<CameraUniforms>,
    models: Vec<ModelUniforms>,
    stamps: Vec<StampUniforms>,
    skies: Vec<SkyUniforms>,
    /// Pickable props queued for the id-stamping pass.
    picks: Vec<(Entity, MeshId, u32)>,
    last_camera: Option<(Vec3, Mat4, u32)>,
}

impl<'s> FrameGraph<'s> {
    fn new(scene: &'s Scene, proj: Mat4, time: f32) -> Self {
        Self {
            scene,
            proj,
            time,
            cmds: Vec::with_capacity(256),
            cameras: Vec::new(),
            models: Vec::new(),
            stamps: Vec::new(),
            skies: Vec::new(),
            picks: Vec::new(),
            last_camera: None,
        }
    }

    fn push_camera(&mut self, eye: Vec3, view: Mat4) -> u32 {
        // Consecutive draws at one recursion level share a view.
        if let Some((last_eye, last_view, index)) = self.last_camera {
            if last_eye == eye && last_view == view {
                return index;
            }
        }
        let index = self.cameras.len() as u32;
        self.cameras.push(CameraUniforms {
            view_proj: (self.proj * view).to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            proj: self.proj.to_cols_array_2d(),
            camera_pos: eye.to_array(),
            time: self.time,
        });
        self.last_camera = Some((eye, view, index));
        index
    }

    fn push_model(&mut self, model: Mat4, color: Vec4) -> u32 {
        let index = self.models.len() as u32;
        self.models.push(ModelUniforms {
            model: model.to_cols_array_2d(),
            normal_matrix: model.inverse().transpose().to_cols_array_2d(),
            color: color.to_array(),
        });
        index
    }

    fn push_stamp(&mut self, mvp: Mat4) -> u32 {
        let index = self.stamps.len() as u32;
        self.stamps.push(StampUniforms {
            mvp: mvp.to_cols_array_2d(),
        });
        index
    }

    fn portal(&self, side: PortalSide) -> &crate::portal::Portal {
        match side {
            PortalSide::Blue => &self.scene.blue,
            PortalSide::Orange => &self.scene.orange,
        }
    }

    fn surface_color(side: PortalSide) -> Vec4 {
        match side {
            PortalSide::Blue => Vec4::new(0.25, 0.5, 1.0, 0.6),
            PortalSide::Orange => Vec4::new(1.0, 0.55, 0.15, 0.6),
        }
    }

    /// Queues every pickable prop for the id-stamping pass.
    fn record_picks(&mut self, view: Mat4) {
        for entity in self.scene.pickables() {
            let Ok(transform) = self.scene.world.get::<&crate::mesh::Transform>(entity) else {
                continue;
            };
            let Ok(render) = self.scene.world.get::<&RenderMesh>(entity) else {
                continue;
            };
            let mvp = self.proj * view * transform.matrix();
            let mesh = render.mesh;
            drop(transform);
            drop(render);
            let index = self.push_stamp(mvp);
            self.picks.push((entity, mesh, index));
        }
    }
}

impl MaskedDraw for FrameGraph<'_> {
    fn stamp_first(&mut self, _portal: PortalSide, mvp: Mat4, id: u8) {
        let mvp = self.push_stamp(mvp);
        self.cmds.push(Cmd::StencilRef(id as u32));
        self.cmds.push(Cmd::StampFirst { mvp });
    }

    fn stamp_increment(&mut self, _portal: PortalSide, mvp: Mat4, id: u8) {
        let mvp = self.push_stamp(mvp);
        // The increment only fires where the mask already equals id - 1.
        self.cmds.push(Cmd::StencilRef(id as u32 - 1));
        self.cmds.push(Cmd::StampIncrement { mvp });
    }

    fn stamp_with_current(&mut self, id: u8) {
        self.cmds.push(Cmd::Mode(MaskMode::ExactStamp));
        self.cmds.push(Cmd::StencilRef(id as u32));
    }

    fn restrict_exact(&mut self, id: u8) {
        self.cmds.push(Cmd::Mode(MaskMode::Exact));
        self.cmds.push(Cmd::StencilRef(id as u32));
    }

    fn restrict_at_least(&mut self, id: u8) {
        self.cmds.push(Cmd::Mode(MaskMode::AtLeast));
        self.cmds.push(Cmd::StencilRef(id as u32));
    }

    fn draw_floor(&mut self, eye: Vec3, view: Mat4) {
        let cam = self.push_camera(eye, view);
        let model = self.push_model(Mat4::IDENTITY, Vec4::ONE);
        self.cmds.push(Cmd::DrawMesh {
            mesh: self.scene.floor.mesh,
            texture: Some(self.scene.floor.texture),
            cam,
            model,
        });
    }

    fn draw_walls(&mut self, eye: Vec3, view: Mat4) {
        let cam = self.push_camera(eye, view);
        let model = self.push_model(Mat4::IDENTITY, Vec4::ONE);
        self.cmds.push(Cmd::DrawMesh {
            mesh: self.scene.walls.mesh,
            texture: Some(self.scene.walls.texture),
            cam,
            model,
        });
    }

    fn draw_props(&mut self, eye: Vec3, view: Mat4) {
        let cam = self.push_camera(eye, view);
        let mut draws = Vec::new();
        for (_entity, (transform, render)) in self
            .scene
            .world
            .query::<(&crate::mesh::Transform, &RenderMesh)>()
            .without::<&Translucent>()
            .iter()
        {
            draws.push((transform.matrix(), *render));
        }
        for (matrix, render) in draws {
            let model = self.push_model(matrix, render.color);
            self.cmds.push(Cmd::DrawMesh {
                mesh: render.mesh,
                texture: render.texture,
                cam,
                model,
            });
        }
    }

    fn draw_sky(&mut self, view: Mat4) {
        // Direction-only view: drop the translation so the backdrop sits at
        // infinity.
        let mut rotation = view;
        rotation.w_axis = Vec4::W;
        let index = self.skies.len() as u32;
        self.skies.push(SkyUniforms {
            inv_view_proj: (self.proj * rotation).inverse().to_cols_array_2d(),
        });
        self.cmds.push(Cmd::DrawSky { sky: index });
    }

    fn draw_portal_surface(&mut self, portal: PortalSide, view: Mat4) {
        let eye = camera_position(view);
        let cam = self.push_camera(eye, view);
        let model = self.push_model(
            self.portal(portal).model_matrix(),
            Self::surface_color(portal),
        );
        self.cmds.push(Cmd::DrawPortal { cam, model });
    }

    fn draw_transparent(&mut self, eye: Vec3, view: Mat4) {
        let cam = self.push_camera(eye, view);
        let mut draws = Vec::new();
        for (_entity, (transform, render, _)) in self
            .scene
            .world
            .query::<(&crate::mesh::Transform, &RenderMesh, &Translucent)>()
            .iter()
        {
            draws.push((transform.matrix(), *render));
        }
        for (matrix, render) in draws {
            let model = self.push_model(matrix, render.color);
            self.cmds.push(Cmd::DrawMesh {
                mesh: render.mesh,
                texture: render.texture,
                cam,
                model,
            });
        }
    }
}

/// One growable uniform buffer bound with a dynamic offset.
struct UniformArena {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    capacity: usize,
    binding_size: u64,
    label: &'static str,
}

impl UniformArena {
    fn new(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        binding_size: u64,
        capacity: usize,
        label: &'static str,
    ) -> Self {
        let (buffer, bind_group) = Self::allocate(device, layout, binding_size, capacity, label);
        Self {
            buffer,
            bind_group,
            capacity,
            binding_size,
            label,
        }
    }

    fn allocate(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        binding_size: u64,
        capacity: usize,
        label: &str,
    ) -> (wgpu::Buffer, wgpu::BindGroup) {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (capacity * UNIFORM_STRIDE) as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(binding_size),
                }),
            }],
        });
        (buffer, bind_group)
    }

    /// Writes `items` at stride offsets, growing the buffer when needed.
    fn upload<T: bytemuck::Pod>(
        &mut self,
        gpu: &GpuContext,
        layout: &wgpu::BindGroupLayout,
        items: &[T],
    ) {
        if items.is_empty() {
            return;
        }
        if items.len() > self.capacity {
            self.capacity = items.len().next_power_of_two();
            let (buffer, bind_group) = Self::allocate(
                &gpu.device,
                layout,
                self.binding_size,
                self.capacity,
                self.label,
            );
            self.buffer = buffer;
            self.bind_group = bind_group;
        }

        let mut bytes = vec![0u8; items.len() * UNIFORM_STRIDE];
        for (i, item) in items.iter().enumerate() {
            let src = bytemuck::bytes_of(item);
            bytes[i * UNIFORM_STRIDE..i * UNIFORM_STRIDE + src.len()].copy_from_slice(src);
        }
        gpu.queue.write_buffer(&self.buffer, 0, &bytes);
    }
}

fn offset(index: u32) -> u32 {
    index * UNIFORM_STRIDE as u32
}

/// Owns the pipelines, the depth-stencil target and the uniform arenas.
pub struct Renderer {
    depth_view: wgpu::TextureView,
    depth_texture: wgpu::Texture,
    depth_size: (u32, u32),

    camera_layout: wgpu::BindGroupLayout,
    model_layout: wgpu::BindGroupLayout,
    stamp_layout: wgpu::BindGroupLayout,
    sky_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,

    cameras: UniformArena,
    models: UniformArena,
    stamps: UniformArena,
    skies: UniformArena,

    mesh_exact: wgpu::RenderPipeline,
    mesh_at_least: wgpu::RenderPipeline,
    mesh_stamping: wgpu::RenderPipeline,
    stamp_first: wgpu::RenderPipeline,
    stamp_increment: wgpu::RenderPipeline,
    stamp_pick: wgpu::RenderPipeline,
    sky_pipeline: wgpu::RenderPipeline,
    portal_exact: wgpu::RenderPipeline,
    portal_at_least: wgpu::RenderPipeline,

    texture_bind_groups: Vec<wgpu::BindGroup>,
    default_texture_bind_group: wgpu::BindGroup,

    pick_readback: wgpu::Buffer,
}

impl Renderer {
    pub fn new(gpu: &GpuContext) -> Self {
        let device = &gpu.device;

        let mesh_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Mesh Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/mesh.wgsl").into()),
        });
        let stamp_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Stamp Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/stamp.wgsl").into()),
        });
        let sky_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Sky Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/sky.wgsl").into()),
        });
        let portal_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Portal Surface Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/portal.wgsl").into()),
        });

        let camera_layout = dynamic_uniform_layout(device, "Camera Bind Group Layout");
        let model_layout = dynamic_uniform_layout(device, "Model Bind Group Layout");
        let stamp_layout = dynamic_uniform_layout(device, "Stamp Bind Group Layout");
        let sky_layout = dynamic_uniform_layout(device, "Sky Bind Group Layout");

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Texture Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let cameras = UniformArena::new(
            device,
            &camera_layout,
            std::mem::size_of::<CameraUniforms>() as u64,
            64,
            "Camera Uniform Arena",
        );
        let models = UniformArena::new(
            device,
            &model_layout,
            std::mem::size_of::<ModelUniforms>() as u64,
            256,
            "Model Uniform Arena",
        );
        let stamps = UniformArena::new(
            device,
            &stamp_layout,
            std::mem::size_of::<StampUniforms>() as u64,
            32,
            "Stamp Uniform Arena",
        );
        let skies = UniformArena::new(
            device,
            &sky_layout,
            std::mem::size_of::<SkyUniforms>() as u64,
            8,
            "Sky Uniform Arena",
        );

        let mesh_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mesh Pipeline Layout"),
            bind_group_layouts: &[&camera_layout, &model_layout, &texture_layout],
            push_constant_ranges: &[],
        });
        let stamp_pipe_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Stamp Pipeline Layout"),
            bind_group_layouts: &[&stamp_layout],
            push_constant_ranges: &[],
        });
        let sky_pipe_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Sky Pipeline Layout"),
            bind_group_layouts: &[&sky_layout],
            push_constant_ranges: &[],
        });
        let portal_pipe_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Portal Surface Pipeline Layout"),
            bind_group_layouts: &[&camera_layout, &model_layout],
            push_constant_ranges: &[],
        });

        let keep = |compare| wgpu::StencilFaceState {
            compare,
            fail_op: wgpu::StencilOperation::Keep,
            depth_fail_op: wgpu::StencilOperation::Keep,
            pass_op: wgpu::StencilOperation::Keep,
        };
        let replace = wgpu::StencilFaceState {
            compare: wgpu::CompareFunction::Always,
            fail_op: wgpu::StencilOperation::Keep,
            depth_fail_op: wgpu::StencilOperation::Keep,
            pass_op: wgpu::StencilOperation::Replace,
        };
        let increment = wgpu::StencilFaceState {
            compare: wgpu::CompareFunction::Equal,
            fail_op: wgpu::StencilOperation::Keep,
            depth_fail_op: wgpu::StencilOperation::Keep,
            pass_op: wgpu::StencilOperation::IncrementClamp,
        };

        let spec = PipelineSpec {
            device,
            color_format: gpu.config.format,
        };

        let mesh_exact = spec.build(
            "Mesh Pipeline (exact)",
            &mesh_layout,
            &mesh_shader,
            &[Vertex3d::LAYOUT],
            Some(wgpu::BlendState::ALPHA_BLENDING),
            wgpu::ColorWrites::ALL,
            true,
            wgpu::CompareFunction::Less,
            keep(wgpu::CompareFunction::Equal),
            0x00,
            Some(wgpu::Face::Back),
        );
        let mesh_at_least = spec.build(
            "Mesh Pipeline (at least)",
            &mesh_layout,
            &mesh_shader,
            &[Vertex3d::LAYOUT],
            Some(wgpu::BlendState::ALPHA_BLENDING),
            wgpu::ColorWrites::ALL,
            true,
            wgpu::CompareFunction::Less,
            keep(wgpu::CompareFunction::LessEqual),
            0x00,
            Some(wgpu::Face::Back),
        );
        let mesh_stamping = spec.build(
            "Mesh Pipeline (draw and stamp)",
            &mesh_layout,
            &mesh_shader,
            &[Vertex3d::LAYOUT],
            Some(wgpu::BlendState::ALPHA_BLENDING),
            wgpu::ColorWrites::ALL,
            true,
            wgpu::CompareFunction::Less,
            replace,
            0xFF,
            Some(wgpu::Face::Back),
        );

        // Stamps rasterize the portal silhouette into the stencil plane only.
        let silhouette_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex3d>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x3,
            }],
        };
        let stamp_first = spec.build(
            "Stamp Pipeline (first)",
            &stamp_pipe_layout,
            &stamp_shader,
            std::slice::from_ref(&silhouette_layout),
            None,
            wgpu::ColorWrites::empty(),
            false,
            wgpu::CompareFunction::Less,
            replace,
            0xFF,
            None,
        );
        let stamp_increment = spec.build(
            "Stamp Pipeline (increment)",
            &stamp_pipe_layout,
            &stamp_shader,
            std::slice::from_ref(&silhouette_layout),
            None,
            wgpu::ColorWrites::empty(),
            false,
            wgpu::CompareFunction::Less,
            increment,
            0xFF,
            None,
        );
        // Pick stamping keeps depth writes on so overlapping props resolve
        // to the nearest one per pixel.
        let stamp_pick = spec.build(
            "Stamp Pipeline (pick ids)",
            &stamp_pipe_layout,
            &stamp_shader,
            std::slice::from_ref(&silhouette_layout),
            None,
            wgpu::ColorWrites::empty(),
            true,
            wgpu::CompareFunction::Less,
            replace,
            0xFF,
            None,
        );

        let sky_pipeline = spec.build(
            "Sky Pipeline",
            &sky_pipe_layout,
            &sky_shader,
            &[],
            None,
            wgpu::ColorWrites::ALL,
            false,
            wgpu::CompareFunction::LessEqual,
            keep(wgpu::CompareFunction::Equal),
            0x00,
            None,
        );

        let portal_exact = spec.build(
            "Portal Surface Pipeline (exact)",
            &portal_pipe_layout,
            &portal_shader,
            &[Vertex3d::LAYOUT],
            Some(wgpu::BlendState::ALPHA_BLENDING),
            wgpu::ColorWrites::ALL,
            false,
            wgpu::CompareFunction::Always,
            keep(wgpu::CompareFunction::Equal),
            0x00,
            None,
        );
        let portal_at_least = spec.build(
            "Portal Surface Pipeline (at least)",
            &portal_pipe_layout,
            &portal_shader,
            &[Vertex3d::LAYOUT],
            Some(wgpu::BlendState::ALPHA_BLENDING),
            wgpu::ColorWrites::ALL,
            false,
            wgpu::CompareFunction::Always,
            keep(wgpu::CompareFunction::LessEqual),
            0x00,
            None,
        );

        let default_texture = Texture::white(gpu);
        let default_texture_bind_group =
            texture_bind_group(device, &texture_layout, &default_texture);

        let pick_readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Pick Readback Buffer"),
            size: UNIFORM_STRIDE as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let (depth_texture, depth_view) = create_depth_stencil(gpu);

        Self {
            depth_view,
            depth_texture,
            depth_size: (gpu.width(), gpu.height()),
            camera_layout,
            model_layout,
            stamp_layout,
            sky_layout,
            texture_layout,
            cameras,
            models,
            stamps,
            skies,
            mesh_exact,
            mesh_at_least,
            mesh_stamping,
            stamp_first,
            stamp_increment,
            stamp_pick,
            sky_pipeline,
            portal_exact,
            portal_at_least,
            texture_bind_groups: Vec::new(),
            default_texture_bind_group,
            pick_readback,
        }
    }

    /// Recreates the depth-stencil target after a window resize.
    pub fn resize(&mut self, gpu: &GpuContext) {
        if self.depth_size != (gpu.width(), gpu.height()) {
            let (texture, view) = create_depth_stencil(gpu);
            self.depth_texture = texture;
            self.depth_view = view;
            self.depth_size = (gpu.width(), gpu.height());
        }
    }

    fn ensure_texture_bind_groups(&mut self, gpu: &GpuContext, assets: &Assets) {
        while self.texture_bind_groups.len() < assets.texture_count() {
            let id = TextureId(self.texture_bind_groups.len());
            self.texture_bind_groups.push(texture_bind_group(
                &gpu.device,
                &self.texture_layout,
                assets.texture(id),
            ));
        }
    }

    /// Renders one frame. When `pick` is set, an id-stamping pass follows the
    /// main composite and the prop under the screen centre (if any) is
    /// returned.
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &mut self,
        gpu: &GpuContext,
        scene: &Scene,
        compositor: &Compositor,
        eye: Vec3,
        view: Mat4,
        time: f32,
        pick: bool,
    ) -> Result<Option<Entity>, wgpu::SurfaceError> {
        self.resize(gpu);
        self.ensure_texture_bind_groups(gpu, &scene.assets);

        let proj = camera::projection(gpu.aspect());
        let mut graph = FrameGraph::new(scene, proj, time);
        compositor.compose(&mut graph, &scene.blue, &scene.orange, eye, view, proj);
        if pick {
            graph.record_picks(view);
        }

        self.cameras.upload(gpu, &self.camera_layout, &graph.cameras);
        self.models.upload(gpu, &self.model_layout, &graph.models);
        self.stamps.upload(gpu, &self.stamp_layout, &graph.stamps);
        self.skies.upload(gpu, &self.sky_layout, &graph.skies);

        let frame = gpu.surface.get_current_texture()?;
        let color_view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Portal Composite Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &color_view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(0),
                        store: wgpu::StoreOp::Store,
                    }),
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            self.replay(&mut pass, scene, &graph);
        }

        let picked = if pick && !graph.picks.is_empty() {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Pick Stamp Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &color_view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(0),
                        store: wgpu::StoreOp::Store,
                    }),
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            pass.set_pipeline(&self.stamp_pick);
            for (i, (_entity, mesh_id, mvp)) in graph.picks.iter().enumerate() {
                pass.set_stencil_reference(PICK_BASE_ID + i as u32);
                pass.set_bind_group(0, &self.stamps.bind_group, &[offset(*mvp)]);
                let mesh = scene.assets.mesh(*mesh_id);
                pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..mesh.index_count, 0, 0..1);
            }
            drop(pass);

            encoder.copy_texture_to_buffer(
                wgpu::TexelCopyTextureInfo {
                    texture: &self.depth_texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: gpu.width() / 2,
                        y: gpu.height() / 2,
                        z: 0,
                    },
                    aspect: wgpu::TextureAspect::StencilOnly,
                },
                wgpu::TexelCopyBufferInfo {
                    buffer: &self.pick_readback,
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: None,
                        rows_per_image: None,
                    },
                },
                wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
            );
            true
        } else {
            false
        };

        gpu.queue.submit(std::iter::once(encoder.finish()));
        frame.present();

        if !picked {
            return Ok(None);
        }

        let slice = self.pick_readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = gpu.device.poll(wgpu::PollType::wait_indefinitely());
        let entity = match rx.recv() {
            Ok(Ok(())) => {
                let data = slice.get_mapped_range();
                let id = data[0] as u32;
                drop(data);
                if id >= PICK_BASE_ID {
                    graph
                        .picks
                        .get((id - PICK_BASE_ID) as usize)
                        .map(|(entity, _, _)| *entity)
                } else {
                    None
                }
            }
            _ => {
                log::warn!("pick readback failed to map");
                None
            }
        };
        self.pick_readback.unmap();
        Ok(entity)
    }

    /// Replays the recorded commands into an open pass.
    fn replay(&self, pass: &mut wgpu::RenderPass, scene: &Scene, graph: &FrameGraph) {
        let mut mode = MaskMode::Exact;
        let disk = scene.assets.mesh(scene.portal_disk);

        for cmd in &graph.cmds {
            match *cmd {
                Cmd::StencilRef(id) => pass.set_stencil_reference(id),
                Cmd::Mode(m) => mode = m,
                Cmd::StampFirst { mvp } | Cmd::StampIncrement { mvp } => {
                    pass.set_pipeline(match cmd {
                        Cmd::StampFirst { .. } => &self.stamp_first,
                        _ => &self.stamp_increment,
                    });
                    pass.set_bind_group(0, &self.stamps.bind_group, &[offset(mvp)]);
                    pass.set_vertex_buffer(0, disk.vertex_buffer.slice(..));
                    pass.set_index_buffer(disk.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                    pass.draw_indexed(0..disk.index_count, 0, 0..1);
                }
                Cmd::DrawMesh {
                    mesh,
                    texture,
                    cam,
                    model,
                } => {
                    pass.set_pipeline(match mode {
                        MaskMode::Exact => &self.mesh_exact,
                        MaskMode::AtLeast => &self.mesh_at_least,
                        MaskMode::ExactStamp => &self.mesh_stamping,
                    });
                    pass.set_bind_group(0, &self.cameras.bind_group, &[offset(cam)]);
                    pass.set_bind_group(1, &self.models.bind_group, &[offset(model)]);
                    let texture_bg = match texture {
                        Some(id) => &self.texture_bind_groups[id.0],
                        None => &self.default_texture_bind_group,
                    };
                    pass.set_bind_group(2, texture_bg, &[]);
                    let mesh = scene.assets.mesh(mesh);
                    pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                    pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                    pass.draw_indexed(0..mesh.index_count, 0, 0..1);
                }
                Cmd::DrawSky { sky } => {
                    pass.set_pipeline(&self.sky_pipeline);
                    pass.set_bind_group(0, &self.skies.bind_group, &[offset(sky)]);
                    pass.draw(0..3, 0..1);
                }
                Cmd::DrawPortal { cam, model } => {
                    pass.set_pipeline(match mode {
                        MaskMode::AtLeast => &self.portal_at_least,
                        _ => &self.portal_exact,
                    });
                    pass.set_bind_group(0, &self.cameras.bind_group, &[offset(cam)]);
                    pass.set_bind_group(1, &self.models.bind_group, &[offset(model)]);
                    pass.set_vertex_buffer(0, disk.vertex_buffer.slice(..));
                    pass.set_index_buffer(disk.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                    pass.draw_indexed(0..disk.index_count, 0, 0..1);
                }
            }
        }
    }
}

/// All mesh-drawing pipelines differ only in blend, stencil and depth
/// settings; this wraps the shared descriptor plumbing.
struct PipelineSpec<'a> {
    device: &'a wgpu::Device,
    color_format: wgpu::TextureFormat,
}

impl PipelineSpec<'_> {
    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        label: &str,
        layout: &wgpu::PipelineLayout,
        shader: &wgpu::ShaderModule,
        vertex_buffers: &[wgpu::VertexBufferLayout],
        blend: Option<wgpu::BlendState>,
        color_writes: wgpu::ColorWrites,
        depth_write: bool,
        depth_compare: wgpu::CompareFunction,
        stencil_face: wgpu::StencilFaceState,
        stencil_write_mask: u32,
        cull_mode: Option<wgpu::Face>,
    ) -> wgpu::RenderPipeline {
        self.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module: shader,
                    entry_point: Some("vs"),
                    buffers: vertex_buffers,
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: shader,
                    entry_point: Some("fs"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: self.color_format,
                        blend,
                        write_mask: color_writes,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode,
                    front_face: wgpu::FrontFace::Ccw,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_STENCIL_FORMAT,
                    depth_write_enabled: depth_write,
                    depth_compare,
                    stencil: wgpu::StencilState {
                        front: stencil_face,
                        back: stencil_face,
                        read_mask: 0xFF,
                        write_mask: stencil_write_mask,
                    },
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
    }
}

fn dynamic_uniform_layout(device: &wgpu::Device, label: &str) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: None,
            },
            count: None,
        }],
    })
}

fn texture_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    texture: &Texture,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Mesh Texture Bind Group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&texture.view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&texture.sampler),
            },
        ],
    })
}

fn create_depth_stencil(gpu: &GpuContext) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Depth Stencil Texture"),
        size: wgpu::Extent3d {
            width: gpu.width(),
            height: gpu.height(),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_STENCIL_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}
