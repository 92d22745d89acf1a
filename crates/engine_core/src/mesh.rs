//! Mesh snapshots and handle-addressed mesh storage.
//!
//! Terrains own their vertex and index buffers. They push a [`MeshData`] snapshot to the
//! storage through a [`MeshHandle`] whenever the geometry changes, so the renderer never
//! aliases a terrain's working buffers.

use std::collections::HashMap;

use hecs::{Entity, World};
use thiserror::Error;

use crate::gpu::{TextureId, UniformValue};
use crate::vertex::Vertex;

/// How the renderer should assemble the vertex stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topology {
    /// Indexed triangle list.
    #[default]
    Triangles,
    /// Tessellation patches of a fixed vertex count, drawn without indices.
    Patches { vertices_per_patch: u32 },
}

/// Mesh data ready for upload.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub topology: Topology,
}

impl MeshData {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>, topology: Topology) -> Self {
        Self {
            vertices,
            indices,
            topology,
        }
    }

    /// Number of primitives the renderer will draw.
    pub fn primitive_count(&self) -> usize {
        match self.topology {
            Topology::Triangles => self.indices.len() / 3,
            Topology::Patches { vertices_per_patch } => {
                self.vertices.len() / vertices_per_patch.max(1) as usize
            }
        }
    }
}

/// Texture slots a terrain material exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialTexture {
    BaseColor,
    /// Height texture sampled by the tessellation evaluation stage.
    Heightmap,
}

/// Texture source bound to a material slot.
#[derive(Debug, Clone, PartialEq)]
pub enum TextureBinding {
    /// A texture living on a [`GpuDevice`](crate::gpu::GpuDevice).
    Gpu(TextureId),
    /// Tightly packed RGB8 pixels computed on the CPU.
    Rgb8 {
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    },
}

/// Material state attached to a terrain entity.
#[derive(Debug, Clone)]
pub struct Material {
    pub uniforms: HashMap<String, UniformValue>,
    pub textures: HashMap<MaterialTexture, TextureBinding>,
}

impl Default for Material {
    /// Cook-Torrance material with zero metallic and roughness factors.
    fn default() -> Self {
        let mut uniforms = HashMap::new();
        uniforms.insert("uniMaterial.metallicFactor".to_owned(), UniformValue::Float(0.0));
        uniforms.insert("uniMaterial.roughnessFactor".to_owned(), UniformValue::Float(0.0));
        Self {
            uniforms,
            textures: HashMap::new(),
        }
    }
}

impl Material {
    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniforms.get(name).copied()
    }

    pub fn texture(&self, slot: MaterialTexture) -> Option<&TextureBinding> {
        self.textures.get(&slot)
    }
}

/// Opaque handle to the storage backing one terrain mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshHandle(Entity);

impl MeshHandle {
    /// Spawn a fresh entity carrying an empty mesh and a default material.
    pub fn spawn(world: &mut World) -> Self {
        Self(world.spawn((MeshData::default(), Material::default())))
    }

    pub fn from_entity(entity: Entity) -> Self {
        Self(entity)
    }

    pub fn entity(self) -> Entity {
        self.0
    }
}

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("mesh handle {0:?} does not refer to a live entity")]
    NoSuchEntity(MeshHandle),
}

/// Storage for terrain meshes and their material state.
///
/// Every mutation goes through a [`MeshHandle`]; a stale handle is reported, never assumed valid.
pub trait MeshStorage {
    /// Replace the mesh behind `handle` with `mesh`.
    fn upload(&mut self, handle: MeshHandle, mesh: MeshData) -> Result<(), MeshError>;

    /// Set a material uniform read by the render stages.
    fn set_uniform(
        &mut self,
        handle: MeshHandle,
        name: &str,
        value: UniformValue,
    ) -> Result<(), MeshError>;

    /// Bind a texture to a material slot.
    fn set_texture(
        &mut self,
        handle: MeshHandle,
        slot: MaterialTexture,
        binding: TextureBinding,
    ) -> Result<(), MeshError>;
}

impl MeshStorage for World {
    fn upload(&mut self, handle: MeshHandle, mesh: MeshData) -> Result<(), MeshError> {
        log::debug!(
            "Uploading mesh {:?}: {} vertices, {} indices",
            handle,
            mesh.vertices.len(),
            mesh.indices.len()
        );
        self.insert_one(handle.0, mesh)
            .map_err(|_| MeshError::NoSuchEntity(handle))
    }

    fn set_uniform(
        &mut self,
        handle: MeshHandle,
        name: &str,
        value: UniformValue,
    ) -> Result<(), MeshError> {
        with_material(self, handle, |material| {
            material.uniforms.insert(name.to_owned(), value);
        })
    }

    fn set_texture(
        &mut self,
        handle: MeshHandle,
        slot: MaterialTexture,
        binding: TextureBinding,
    ) -> Result<(), MeshError> {
        with_material(self, handle, |material| {
            material.textures.insert(slot, binding);
        })
    }
}

/// Run `f` on the entity's material, attaching a default one first if it has none.
fn with_material(
    world: &mut World,
    handle: MeshHandle,
    f: impl FnOnce(&mut Material),
) -> Result<(), MeshError> {
    if !world.contains(handle.0) {
        return Err(MeshError::NoSuchEntity(handle));
    }

    if let Ok(mut material) = world.get::<&mut Material>(handle.0) {
        f(&mut material);
        return Ok(());
    }

    let mut material = Material::default();
    f(&mut material);
    world
        .insert_one(handle.0, material)
        .map_err(|_| MeshError::NoSuchEntity(handle))
}
