//! Central storage for GPU resources, addressed by opaque handles.
//!
//! Meshes and textures live in one arena for the lifetime of the app;
//! entities and draw commands refer to them by [`MeshId`] / [`TextureId`]
//! instead of holding buffers themselves. Handles are plain indices, so
//! they are `Copy` and trivially storable in components.

use crate::gpu::GpuContext;
use crate::mesh::{Geometry, Mesh};
use crate::texture::Texture;

/// Opaque identifier for a mesh in the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MeshId(pub(crate) usize);

/// Opaque identifier for a texture in the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub(crate) usize);

/// Arena of GPU resources shared by the whole scene.
#[derive(Default)]
pub struct Assets {
    meshes: Vec<Mesh>,
    textures: Vec<Texture>,
}

impl Assets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploads geometry and returns its handle.
    pub fn add_geometry(&mut self, gpu: &GpuContext, geometry: &Geometry) -> MeshId {
        self.add_mesh(Mesh::new(gpu, geometry))
    }

    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshId {
        self.meshes.push(mesh);
        MeshId(self.meshes.len() - 1)
    }

    pub fn add_texture(&mut self, texture: Texture) -> TextureId {
        self.textures.push(texture);
        TextureId(self.textures.len() - 1)
    }

    /// Panics when handed an id from a different arena; ids are only ever
    /// produced by the `add_*` methods above.
    pub fn mesh(&self, id: MeshId) -> &Mesh {
        &self.meshes[id.0]
    }

    pub fn texture(&self, id: TextureId) -> &Texture {
        &self.textures[id.0]
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }
}
