//! Tessellated terrain whose heights live on the GPU.
//!
//! The CPU only builds a coarse grid of quad patches and pushes the height curve as uniforms;
//! the tessellation stages sample the noise map at render time. The noise, color and slope
//! maps are produced by compute kernels on a [`GpuDevice`].

use engine_core::{
    ComputeKernel, GpuDevice, ImageTextureUsage, MaterialTexture, MeshData, MeshHandle,
    MeshStorage, ProgramId, TextureBinding, TextureDescriptor, TextureFormat, TextureId,
    Topology, UniformValue, Vertex,
};
use glam::{Vec2, Vec3};

use crate::error::TerrainError;
use crate::noise::TERRAIN_OCTAVES;
use crate::params::{check_tessellation_level, Terrain, TerrainParameters, DEFAULT_MIN_TESS_LEVEL};

/// Side of the square noise, color and slope maps.
pub const HEIGHTMAP_SIZE: u32 = 1024;

/// Patches along each side of the control mesh.
pub const PATCH_COUNT: u32 = 20;

/// Noise frequency used for the initial noise map.
pub const DEFAULT_NOISE_FACTOR: f32 = 0.01;

/// Control mesh of `PATCH_COUNT²` quad patches covering the terrain footprint.
///
/// Patches share no vertices. Each one is laid out as:
///
/// ```text
/// 1------3
/// |      |     Z
/// |      |     ^
/// |      |     |
/// 0------2     ---> X
/// ```
pub fn patch_grid(width: u32, depth: u32) -> Vec<Vertex> {
    let stride_x = width as f32 / PATCH_COUNT as f32;
    let stride_z = depth as f32 / PATCH_COUNT as f32;
    let stride_uv = 1.0 / PATCH_COUNT as f32;

    let mut vertices = Vec::with_capacity((PATCH_COUNT * PATCH_COUNT * 4) as usize);
    for x_patch in 0..PATCH_COUNT {
        let start_x = -(width as f32) * 0.5 + stride_x * x_patch as f32;
        let start_u = stride_uv * x_patch as f32;

        for z_patch in 0..PATCH_COUNT {
            let start_z = -(depth as f32) * 0.5 + stride_z * z_patch as f32;
            let start_v = stride_uv * z_patch as f32;

            for (dx, dz) in [(0.0, 0.0), (0.0, 1.0), (1.0, 0.0), (1.0, 1.0)] {
                vertices.push(Vertex::new(
                    Vec3::new(start_x + stride_x * dx, 0.0, start_z + stride_z * dz),
                    Vec2::new(start_u + stride_uv * dx, start_v + stride_uv * dz),
                    Vec3::Y,
                    Vec3::X,
                ));
            }
        }
    }
    vertices
}

/// Terrain rendered through tessellation, with GPU-computed maps.
pub struct DynamicTerrain<D: GpuDevice> {
    mesh: MeshHandle,
    device: D,
    params: TerrainParameters,
    min_tess_level: f32,
    heightmap_size: u32,

    noise_program: ProgramId,
    color_program: ProgramId,
    slope_program: ProgramId,

    noise_map: TextureId,
    color_map: TextureId,
    slope_map: TextureId,
}

impl<D: GpuDevice> DynamicTerrain<D> {
    /// Set up the maps and programs on `device` and compute the initial maps.
    pub fn new(
        device: D,
        meshes: &mut dyn MeshStorage,
        mesh: MeshHandle,
    ) -> Result<Self, TerrainError> {
        Self::with_heightmap_size(device, meshes, mesh, HEIGHTMAP_SIZE)
    }

    pub fn with_heightmap_size(
        mut device: D,
        meshes: &mut dyn MeshStorage,
        mesh: MeshHandle,
        heightmap_size: u32,
    ) -> Result<Self, TerrainError> {
        let size = heightmap_size;
        let noise_map = device.create_texture(&TextureDescriptor::new(
            "Noise map",
            size,
            size,
            TextureFormat::R32Float,
        ))?;
        let color_map = device.create_texture(&TextureDescriptor::new(
            "Color map",
            size,
            size,
            TextureFormat::Rgba8Unorm,
        ))?;
        let slope_map = device.create_texture(&TextureDescriptor::new(
            "Slope map",
            size,
            size,
            TextureFormat::Rgba32Float,
        ))?;

        let noise_program = device.create_compute_program(ComputeKernel::PerlinNoise2d)?;
        device.set_uniform(
            noise_program,
            "uniOctaveCount",
            UniformValue::Int(TERRAIN_OCTAVES as i32),
        )?;
        device.set_image_texture(noise_program, noise_map, "uniNoiseMap", ImageTextureUsage::Write)?;

        let color_program = device.create_compute_program(ComputeKernel::TerrainColor)?;
        device.set_image_texture(color_program, noise_map, "uniHeightmap", ImageTextureUsage::Read)?;
        device.set_image_texture(color_program, color_map, "uniColorMap", ImageTextureUsage::Write)?;

        let slope_program = device.create_compute_program(ComputeKernel::Slope)?;
        device.set_image_texture(slope_program, noise_map, "uniHeightmap", ImageTextureUsage::Read)?;
        device.set_image_texture(slope_program, slope_map, "uniSlopeMap", ImageTextureUsage::Write)?;

        meshes.set_texture(mesh, MaterialTexture::Heightmap, TextureBinding::Gpu(noise_map))?;
        meshes.set_texture(mesh, MaterialTexture::BaseColor, TextureBinding::Gpu(color_map))?;

        let mut terrain = Self {
            mesh,
            device,
            params: TerrainParameters::default(),
            min_tess_level: DEFAULT_MIN_TESS_LEVEL,
            heightmap_size,
            noise_program,
            color_program,
            slope_program,
            noise_map,
            color_map,
            slope_map,
        };

        terrain.push_slope_uniforms()?;
        terrain.compute_noise_map(DEFAULT_NOISE_FACTOR)?;
        terrain.compute_slope_map()?;
        terrain.compute_color_map()?;

        Ok(terrain)
    }

    /// Construct and immediately generate a terrain.
    #[allow(clippy::too_many_arguments)]
    pub fn generated(
        device: D,
        meshes: &mut dyn MeshStorage,
        mesh: MeshHandle,
        width: u32,
        depth: u32,
        height_factor: f32,
        flatness: f32,
        min_tess_level: f32,
    ) -> Result<Self, TerrainError> {
        let mut terrain = Self::new(device, meshes, mesh)?;
        terrain.generate_tessellated(meshes, width, depth, height_factor, flatness, min_tess_level)?;
        Ok(terrain)
    }

    pub fn mesh(&self) -> MeshHandle {
        self.mesh
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn min_tessellation_level(&self) -> f32 {
        self.min_tess_level
    }

    pub fn heightmap_size(&self) -> u32 {
        self.heightmap_size
    }

    pub fn noise_map(&self) -> TextureId {
        self.noise_map
    }

    pub fn color_map(&self) -> TextureId {
        self.color_map
    }

    pub fn slope_map(&self) -> TextureId {
        self.slope_map
    }

    /// Build the patch grid, upload it, then apply the parameters.
    pub fn generate_tessellated(
        &mut self,
        meshes: &mut dyn MeshStorage,
        width: u32,
        depth: u32,
        height_factor: f32,
        flatness: f32,
        min_tess_level: f32,
    ) -> Result<(), TerrainError> {
        self.params = TerrainParameters::new(width, depth, height_factor, flatness);

        meshes.upload(
            self.mesh,
            MeshData::new(
                patch_grid(width, depth),
                Vec::new(),
                Topology::Patches {
                    vertices_per_patch: 4,
                },
            ),
        )?;
        meshes.set_uniform(self.mesh, "uniTerrainSize", UniformValue::UVec2([width, depth]))?;

        log::debug!(
            "Generated {}x{} dynamic terrain ({} patches)",
            width,
            depth,
            PATCH_COUNT * PATCH_COUNT
        );

        self.set_tessellated_parameters(meshes, min_tess_level, height_factor, flatness)
    }

    /// Push the tessellation level and height curve to the render and slope programs.
    pub fn set_tessellated_parameters(
        &mut self,
        meshes: &mut dyn MeshStorage,
        min_tess_level: f32,
        height_factor: f32,
        flatness: f32,
    ) -> Result<(), TerrainError> {
        self.params = self.params.with_shape(height_factor, flatness);
        self.min_tess_level = check_tessellation_level(min_tess_level);

        meshes.set_uniform(self.mesh, "uniTessLevel", UniformValue::Float(self.min_tess_level))?;
        meshes.set_uniform(
            self.mesh,
            "uniHeightFactor",
            UniformValue::Float(self.params.height_factor()),
        )?;
        meshes.set_uniform(self.mesh, "uniFlatness", UniformValue::Float(self.params.flatness()))?;

        self.push_slope_uniforms()
    }

    pub fn set_min_tessellation_level(
        &mut self,
        meshes: &mut dyn MeshStorage,
        min_tess_level: f32,
    ) -> Result<(), TerrainError> {
        let (height_factor, flatness) = (self.params.height_factor(), self.params.flatness());
        self.set_tessellated_parameters(meshes, min_tess_level, height_factor, flatness)
    }

    /// Regenerate the noise map, sampling noise at `texel * factor`.
    pub fn compute_noise_map(&mut self, factor: f32) -> Result<TextureId, TerrainError> {
        self.device
            .set_uniform(self.noise_program, "uniNoiseFactor", UniformValue::Float(factor))?;
        self.device
            .execute(self.noise_program, self.heightmap_size, self.heightmap_size)?;
        Ok(self.noise_map)
    }

    pub fn compute_color_map(&mut self) -> Result<TextureId, TerrainError> {
        self.device
            .execute(self.color_program, self.heightmap_size, self.heightmap_size)?;
        Ok(self.color_map)
    }

    pub fn compute_slope_map(&mut self) -> Result<TextureId, TerrainError> {
        self.device
            .execute(self.slope_program, self.heightmap_size, self.heightmap_size)?;
        Ok(self.slope_map)
    }

    fn push_slope_uniforms(&mut self) -> Result<(), TerrainError> {
        self.device.set_uniform(
            self.slope_program,
            "uniHeightFactor",
            UniformValue::Float(self.params.height_factor()),
        )?;
        self.device.set_uniform(
            self.slope_program,
            "uniFlatness",
            UniformValue::Float(self.params.flatness()),
        )?;
        Ok(())
    }
}

impl<D: GpuDevice> Terrain for DynamicTerrain<D> {
    fn parameters(&self) -> &TerrainParameters {
        &self.params
    }

    fn generate(
        &mut self,
        meshes: &mut dyn MeshStorage,
        width: u32,
        depth: u32,
        height_factor: f32,
        flatness: f32,
    ) -> Result<(), TerrainError> {
        self.generate_tessellated(meshes, width, depth, height_factor, flatness, DEFAULT_MIN_TESS_LEVEL)
    }

    fn set_parameters(
        &mut self,
        meshes: &mut dyn MeshStorage,
        height_factor: f32,
        flatness: f32,
    ) -> Result<(), TerrainError> {
        let min_tess_level = self.min_tess_level;
        self.set_tessellated_parameters(meshes, min_tess_level, height_factor, flatness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::band_color;
    use crate::software_device::SoftwareDevice;
    use engine_core::{Material, World};

    const TEST_MAP_SIZE: u32 = 32;

    fn terrain(world: &mut World) -> DynamicTerrain<SoftwareDevice> {
        let mesh = MeshHandle::spawn(world);
        let mut terrain =
            DynamicTerrain::with_heightmap_size(SoftwareDevice::new(), world, mesh, TEST_MAP_SIZE)
                .unwrap();
        terrain.generate(world, 512, 256, 30.0, 3.0).unwrap();
        terrain
    }

    #[test]
    fn patch_grid_covers_footprint() {
        let vertices = patch_grid(512, 256);
        assert_eq!(vertices.len(), 1600);

        for vertex in &vertices {
            let [x, y, z] = vertex.position;
            assert!((-256.0..=256.0).contains(&x));
            assert!((-128.0..=128.0).contains(&z));
            assert_eq!(y, 0.0);
            assert!(vertex.tex_coords.iter().all(|c| (0.0..=1.0 + 1e-6).contains(c)));
            assert_eq!(vertex.normal, [0.0, 1.0, 0.0]);
            assert_eq!(vertex.tangent, [1.0, 0.0, 0.0]);
        }

        let close = |a: [f32; 3], b: [f32; 3]| a.iter().zip(b).all(|(a, b)| (a - b).abs() < 1e-4);
        let first = &vertices[..4];
        assert_eq!(first[0].position, [-256.0, 0.0, -128.0]);
        assert!(close(first[1].position, [-256.0, 0.0, -115.2]));
        assert!(close(first[2].position, [-230.4, 0.0, -128.0]));
        assert!(close(first[3].position, [-230.4, 0.0, -115.2]));

        // Second patch steps along Z.
        assert!(close(vertices[4].position, [-256.0, 0.0, -115.2]));
    }

    #[test]
    fn generate_uploads_patches_and_uniforms() {
        let mut world = World::new();
        let terrain = terrain(&mut world);

        let mesh = world.get::<&MeshData>(terrain.mesh().entity()).unwrap();
        assert_eq!(mesh.vertices.len(), 1600);
        assert!(mesh.indices.is_empty());
        assert_eq!(mesh.primitive_count(), 400);

        let material = world.get::<&Material>(terrain.mesh().entity()).unwrap();
        assert_eq!(material.uniform("uniTessLevel"), Some(UniformValue::Float(12.0)));
        assert_eq!(material.uniform("uniHeightFactor"), Some(UniformValue::Float(30.0)));
        assert_eq!(material.uniform("uniFlatness"), Some(UniformValue::Float(3.0)));
        assert_eq!(material.uniform("uniTerrainSize"), Some(UniformValue::UVec2([512, 256])));
        assert_eq!(
            material.texture(MaterialTexture::Heightmap),
            Some(&TextureBinding::Gpu(terrain.noise_map()))
        );
        assert_eq!(
            material.texture(MaterialTexture::BaseColor),
            Some(&TextureBinding::Gpu(terrain.color_map()))
        );
    }

    #[test]
    fn parameter_updates_only_touch_uniforms() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut world = World::new();
        let mut terrain = terrain(&mut world);

        terrain.set_min_tessellation_level(&mut world, 0.0).unwrap();
        assert_eq!(terrain.min_tessellation_level(), f32::EPSILON);

        terrain.set_height_factor(&mut world, -5.0).unwrap();
        assert_eq!(terrain.parameters().height_factor(), f32::EPSILON);
        assert_eq!(terrain.parameters().flatness(), 3.0);

        let material = world.get::<&Material>(terrain.mesh().entity()).unwrap();
        assert_eq!(material.uniform("uniTessLevel"), Some(UniformValue::Float(f32::EPSILON)));
        assert_eq!(
            material.uniform("uniHeightFactor"),
            Some(UniformValue::Float(f32::EPSILON))
        );
        let mesh = world.get::<&MeshData>(terrain.mesh().entity()).unwrap();
        assert_eq!(mesh.vertices.len(), 1600);
    }

    #[test]
    fn maps_are_computed_from_noise() {
        let mut world = World::new();
        let mut terrain = terrain(&mut world);

        let noise_id = terrain.compute_noise_map(0.05).unwrap();
        let color_id = terrain.compute_color_map().unwrap();
        let noise = terrain.device_mut().read_texture(noise_id).unwrap();
        let color = terrain.device_mut().read_texture(color_id).unwrap();

        assert_eq!((noise.width, noise.height), (TEST_MAP_SIZE, TEST_MAP_SIZE));
        for (y, x) in [(0, 0), (7, 19), (31, 31)] {
            let expected = band_color(noise.texel(x, y)[0]);
            let texel = color.texel(x, y);
            for c in 0..3 {
                assert!((texel[c] - expected[c] as f32 / 255.0).abs() < 1e-6);
            }
            assert_eq!(texel[3], 1.0);
        }
    }

    #[test]
    fn slope_map_follows_height_curve() {
        let mut world = World::new();
        let mut terrain = terrain(&mut world);

        let slope_id = terrain.compute_slope_map().unwrap();
        let noise_id = terrain.noise_map();
        let noise = terrain.device_mut().read_texture(noise_id).unwrap();
        let slope = terrain.device_mut().read_texture(slope_id).unwrap();

        assert_eq!(slope.texel(0, 5), &[0.0; 4]);
        assert_eq!(slope.texel(31, 31), &[0.0; 4]);

        let h = |x: u32, y: u32| noise.texel(x, y)[0].powf(3.0) * 30.0;
        let expected = crate::maps::slope_at(h(4, 3), h(4, 5), h(3, 4), h(5, 4));
        let texel = slope.texel(4, 4);
        for c in 0..3 {
            assert!((texel[c] - expected[c]).abs() < 1e-5);
        }
        assert!(texel[2] >= 0.0);
    }
}
