//! Mesh geometry: CPU-side builders, GPU buffers, and spatial transforms.
//!
//! Geometry is built on the CPU as [`Geometry`] (vertices + indices), which
//! can be uploaded into a GPU [`Mesh`] and, for surfaces that answer
//! collision queries, shadowed as a [`TriMesh`](crate::intersect::TriMesh).
//! The room in this crate is entirely procedural, assembled from the
//! primitives here.

use crate::gpu::GpuContext;
use crate::intersect::TriMesh;
use glam::{Mat4, Quat, Vec3};

/// Vertex format shared by every mesh: position, normal, uv.
///
/// `#[repr(C)]` + `Pod` so the buffer upload is a straight byte cast.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex3d {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex3d {
    /// Buffer layout for pipelines consuming this vertex type:
    /// position (loc 0), normal (loc 1), uv (loc 2), 32 bytes per vertex.
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex3d>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &[
            wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x3,
            },
            wgpu::VertexAttribute {
                offset: 12,
                shader_location: 1,
                format: wgpu::VertexFormat::Float32x3,
            },
            wgpu::VertexAttribute {
                offset: 24,
                shader_location: 2,
                format: wgpu::VertexFormat::Float32x2,
            },
        ],
    };

    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }
}

/// CPU-side indexed geometry, the staging form of every mesh.
#[derive(Clone, Debug, Default)]
pub struct Geometry {
    pub vertices: Vec<Vertex3d>,
    pub indices: Vec<u32>,
}

impl Geometry {
    pub fn new(vertices: Vec<Vertex3d>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// Appends a quad given its four corners (counter-clockwise as seen from
    /// the normal side) and a shared normal. UVs span the full texture,
    /// scaled by `uv_scale` for tiling.
    pub fn push_quad(&mut self, corners: [Vec3; 4], normal: Vec3, uv_scale: f32) {
        let base = self.vertices.len() as u32;
        let n = normal.to_array();
        let uvs = [
            [0.0, 0.0],
            [uv_scale, 0.0],
            [uv_scale, uv_scale],
            [0.0, uv_scale],
        ];
        for (corner, uv) in corners.iter().zip(uvs) {
            self.vertices.push(Vertex3d::new(corner.to_array(), n, uv));
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }

    /// Merges another geometry into this one, offsetting its indices.
    pub fn merge(&mut self, other: &Geometry) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&other.vertices);
        self.indices.extend(other.indices.iter().map(|i| i + base));
    }

    /// Applies a rigid transform to positions and its rotation to normals.
    pub fn transformed(mut self, transform: Mat4) -> Self {
        let normal_matrix = glam::Mat3::from_mat4(transform).inverse().transpose();
        for v in &mut self.vertices {
            let p = transform * Vec3::from(v.position).extend(1.0);
            v.position = p.truncate().to_array();
            v.normal = (normal_matrix * Vec3::from(v.normal))
                .normalize_or_zero()
                .to_array();
        }
        self
    }

    /// Collision shadow of this geometry for ray queries.
    pub fn tri_mesh(&self) -> TriMesh {
        TriMesh::new(
            self.vertices
                .iter()
                .map(|v| Vec3::from(v.position))
                .collect(),
            self.vertices.iter().map(|v| Vec3::from(v.normal)).collect(),
            self.indices.clone(),
        )
    }

    /// Unit cube centered at the origin, one quad per face.
    pub fn cube() -> Self {
        let mut g = Geometry::default();
        let h = 0.5;
        let faces: [([Vec3; 4], Vec3); 6] = [
            (
                [
                    Vec3::new(-h, -h, h),
                    Vec3::new(h, -h, h),
                    Vec3::new(h, h, h),
                    Vec3::new(-h, h, h),
                ],
                Vec3::Z,
            ),
            (
                [
                    Vec3::new(h, -h, -h),
                    Vec3::new(-h, -h, -h),
                    Vec3::new(-h, h, -h),
                    Vec3::new(h, h, -h),
                ],
                Vec3::NEG_Z,
            ),
            (
                [
                    Vec3::new(-h, h, h),
                    Vec3::new(h, h, h),
                    Vec3::new(h, h, -h),
                    Vec3::new(-h, h, -h),
                ],
                Vec3::Y,
            ),
            (
                [
                    Vec3::new(-h, -h, -h),
                    Vec3::new(h, -h, -h),
                    Vec3::new(h, -h, h),
                    Vec3::new(-h, -h, h),
                ],
                Vec3::NEG_Y,
            ),
            (
                [
                    Vec3::new(h, -h, h),
                    Vec3::new(h, -h, -h),
                    Vec3::new(h, h, -h),
                    Vec3::new(h, h, h),
                ],
                Vec3::X,
            ),
            (
                [
                    Vec3::new(-h, -h, -h),
                    Vec3::new(-h, -h, h),
                    Vec3::new(-h, h, h),
                    Vec3::new(-h, h, -h),
                ],
                Vec3::NEG_X,
            ),
        ];
        for (corners, normal) in faces {
            g.push_quad(corners, normal, 1.0);
        }
        g
    }

    /// Flat `size`×`size` plane on XZ at y = 0, normal up, UVs tiled so floor
    /// textures repeat every couple of units.
    pub fn plane(size: f32) -> Self {
        let mut g = Geometry::default();
        let h = size * 0.5;
        g.push_quad(
            [
                Vec3::new(-h, 0.0, h),
                Vec3::new(h, 0.0, h),
                Vec3::new(h, 0.0, -h),
                Vec3::new(-h, 0.0, -h),
            ],
            Vec3::Y,
            size * 0.5,
        );
        g
    }

    /// Vertical wall panel, `width`×`height`, centered on x, standing on
    /// y = 0 at z = 0, facing +z.
    pub fn wall(width: f32, height: f32) -> Self {
        let mut g = Geometry::default();
        let h = width * 0.5;
        g.push_quad(
            [
                Vec3::new(-h, 0.0, 0.0),
                Vec3::new(h, 0.0, 0.0),
                Vec3::new(h, height, 0.0),
                Vec3::new(-h, height, 0.0),
            ],
            Vec3::Z,
            width * 0.25,
        );
        g
    }

    /// UV sphere of radius 0.5 centered at the origin.
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let mut vertices = Vec::new();
        let mut indices = Vec::new();

        for ring in 0..=rings {
            let phi = std::f32::consts::PI * ring as f32 / rings as f32;
            let y = phi.cos();
            let ring_radius = phi.sin();

            for seg in 0..=segments {
                let theta = 2.0 * std::f32::consts::PI * seg as f32 / segments as f32;
                let x = ring_radius * theta.cos();
                let z = ring_radius * theta.sin();

                vertices.push(Vertex3d::new(
                    [x * 0.5, y * 0.5, z * 0.5],
                    [x, y, z],
                    [seg as f32 / segments as f32, ring as f32 / rings as f32],
                ));
            }
        }

        for ring in 0..rings {
            for seg in 0..segments {
                let current = ring * (segments + 1) + seg;
                let next = current + segments + 1;
                indices.extend_from_slice(&[current, next, current + 1]);
                indices.extend_from_slice(&[current + 1, next, next + 1]);
            }
        }

        Self::new(vertices, indices)
    }

    /// The portal's elliptical window surface in portal-local space.
    pub fn portal_disk() -> Self {
        let vertices = crate::portal::DISK_POSITIONS
            .iter()
            .map(|p| {
                // The disk spans roughly ±0.61 × ±0.9; map that into uv space.
                let uv = [p[0] / 1.3 + 0.5, p[1] / 1.9 + 0.5];
                Vertex3d::new(*p, [0.0, 0.0, 1.0], uv)
            })
            .collect();
        Self::new(vertices, crate::portal::DISK_INDICES.to_vec())
    }
}

/// GPU-resident mesh: vertex and index buffers plus the index count.
#[derive(Debug)]
pub struct Mesh {
    pub(crate) vertex_buffer: wgpu::Buffer,
    pub(crate) index_buffer: wgpu::Buffer,
    pub(crate) index_count: u32,
}

impl Mesh {
    pub fn new(gpu: &GpuContext, geometry: &Geometry) -> Self {
        use wgpu::util::DeviceExt;

        let vertex_buffer = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Mesh Vertex Buffer"),
                contents: bytemuck::cast_slice(&geometry.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });

        let index_buffer = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Mesh Index Buffer"),
                contents: bytemuck::cast_slice(&geometry.indices),
                usage: wgpu::BufferUsages::INDEX,
            });

        Self {
            vertex_buffer,
            index_buffer,
            index_count: geometry.indices.len() as u32,
        }
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// Position, rotation and scale for placing a mesh in the world.
///
/// Converted to a matrix in the usual scale → rotate → translate order.
#[derive(Clone, Copy, Debug)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::splat(scale);
        self
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intersect::Ray;

    #[test]
    fn quad_winding_and_normal() {
        let mut g = Geometry::default();
        g.push_quad(
            [
                Vec3::new(-1.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 2.0, 0.0),
                Vec3::new(-1.0, 2.0, 0.0),
            ],
            Vec3::Z,
            1.0,
        );
        assert_eq!(g.vertices.len(), 4);
        assert_eq!(g.indices.len(), 6);

        // The collision shadow must be hittable from the normal side.
        let mesh = g.tri_mesh();
        let ray = Ray::new(Vec3::new(0.0, 1.0, 5.0), Vec3::NEG_Z);
        let hit = mesh.nearest_hit(&ray).expect("quad should be hit");
        assert!((hit.point - Vec3::new(0.0, 1.0, 0.0)).length() < 1e-5);
        assert_eq!(hit.normal, Vec3::Z);
    }

    #[test]
    fn plane_is_walkable_from_above() {
        let floor = Geometry::plane(30.0)
            .transformed(Mat4::from_translation(Vec3::new(0.0, 0.0, -8.0)))
            .tri_mesh();
        let ray = Ray::new(Vec3::new(3.0, 1.75, -10.0), Vec3::NEG_Y);
        let hit = floor.nearest_hit(&ray).expect("floor below");
        assert!(hit.point.y.abs() < 1e-5);
    }

    #[test]
    fn transformed_rotates_normals() {
        let wall =
            Geometry::wall(4.0, 3.0).transformed(Mat4::from_rotation_y(std::f32::consts::PI));
        let n = Vec3::from(wall.vertices[0].normal);
        assert!((n - Vec3::NEG_Z).length() < 1e-5);
    }

    #[test]
    fn merge_offsets_indices() {
        let mut a = Geometry::wall(1.0, 1.0);
        let b = Geometry::wall(1.0, 1.0);
        a.merge(&b);
        assert_eq!(a.vertices.len(), 8);
        assert_eq!(a.indices.len(), 12);
        assert!(a.indices[6..].iter().all(|&i| (4..8).contains(&i)));
    }

    #[test]
    fn portal_disk_matches_footprint() {
        let disk = Geometry::portal_disk();
        assert_eq!(disk.vertices.len(), 46);
        assert_eq!(disk.indices.len(), 90);
        for v in &disk.vertices {
            assert!(v.position[0].abs() <= 0.62);
            assert!(v.position[1].abs() <= 0.91);
            assert_eq!(v.position[2], -0.01);
        }
    }

    #[test]
    fn cube_has_closed_surface() {
        let cube = Geometry::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);

        // A ray through the center hits the near face first.
        let mesh = cube.tri_mesh();
        let ray = Ray::new(Vec3::new(0.0, 0.0, 3.0), Vec3::NEG_Z);
        let hit = mesh.nearest_hit(&ray).unwrap();
        assert!((hit.point.z - 0.5).abs() < 1e-5);
    }
}
