//! CPU-generated heightfield terrain.
//!
//! Generation runs as separate data-parallel passes with a full join between them:
//! 1. height synthesis, one independent noise sample per vertex;
//! 2. normals, reading the neighbour heights finalized by pass 1;
//! 3. triangle indices, built once per grid size.
//!
//! Parameter updates never sample noise again: existing heights are pushed back through the
//! inverse height curve and reshaped (see [`crate::params`]).

use std::time::Instant;

use engine_core::{
    MaterialTexture, MeshData, MeshHandle, MeshStorage, TextureBinding, Topology, Vertex,
};
use glam::{Vec2, Vec3};
use image::{Rgb32FImage, RgbImage};
use rayon::prelude::*;

use crate::error::TerrainError;
use crate::maps;
use crate::noise::{FractalNoise, NoiseSampler, NOISE_SCALE, TERRAIN_OCTAVES};
use crate::params::{remap_height, Terrain, TerrainParameters};

/// Vertical component of the finite-difference normals; controls their steepness.
pub const NORMAL_VERTICAL_SCALE: f32 = 0.1;

/// World units per grid unit.
pub const GRID_SPACING: f32 = 0.5;

/// Normal and tangent from the heights of the four axis neighbours.
#[inline]
pub fn finite_difference_normal(top: f32, bottom: f32, left: f32, right: f32) -> (Vec3, Vec3) {
    //              top (j - 1)
    //                   x
    //                   |
    // left (i - 1) x----X----x right (i + 1)
    //                   |
    //                   x
    //             bottom (j + 1)
    let normal = Vec3::new(left - right, NORMAL_VERTICAL_SCALE, top - bottom).normalize();
    let tangent = Vec3::new(normal.z, normal.x, normal.y);
    (normal, tangent)
}

/// Triangle indices of a `width × depth` grid, two counter-clockwise triangles per cell.
pub fn grid_indices(width: u32, depth: u32) -> Vec<u32> {
    if width < 2 || depth < 2 {
        return Vec::new();
    }

    let mut indices = Vec::with_capacity((width as usize - 1) * (depth as usize - 1) * 6);
    for j in 0..depth - 1 {
        for i in 0..width - 1 {
            //     i     i + 1
            //     v       v
            //     --------- <- j * width
            //     |      /|
            //     |    /  |
            //     |  /    |
            //     |/______| <- (j + 1) * width
            let top_left = j * width + i;
            let top_right = top_left + 1;
            let bottom_left = (j + 1) * width + i;
            let bottom_right = bottom_left + 1;

            indices.extend([top_left, bottom_left, top_right]);
            indices.extend([top_right, bottom_left, bottom_right]);
        }
    }
    indices
}

/// Heightfield mesh synthesized on the CPU from 2D fractal noise.
pub struct StaticTerrain<N: NoiseSampler = FractalNoise> {
    mesh: MeshHandle,
    noise: N,
    params: TerrainParameters,
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    color_map: RgbImage,
    normal_map: RgbImage,
    slope_map: Rgb32FImage,
}

impl StaticTerrain<FractalNoise> {
    /// Terrain writing into `mesh`; nothing is generated yet.
    pub fn new(mesh: MeshHandle) -> Self {
        Self::with_noise(mesh, FractalNoise::default())
    }

    /// Construct and immediately generate a terrain.
    pub fn generated(
        meshes: &mut dyn MeshStorage,
        mesh: MeshHandle,
        width: u32,
        depth: u32,
        height_factor: f32,
        flatness: f32,
    ) -> Result<Self, TerrainError> {
        let mut terrain = Self::new(mesh);
        terrain.generate(meshes, width, depth, height_factor, flatness)?;
        Ok(terrain)
    }
}

impl<N: NoiseSampler> StaticTerrain<N> {
    pub fn with_noise(mesh: MeshHandle, noise: N) -> Self {
        Self {
            mesh,
            noise,
            params: TerrainParameters::default(),
            vertices: Vec::new(),
            indices: Vec::new(),
            color_map: RgbImage::default(),
            normal_map: RgbImage::default(),
            slope_map: Rgb32FImage::default(),
        }
    }

    pub fn mesh(&self) -> MeshHandle {
        self.mesh
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Last computed color map (empty until [`Self::compute_color_map`] runs).
    pub fn color_map(&self) -> &RgbImage {
        &self.color_map
    }

    pub fn normal_map(&self) -> &RgbImage {
        &self.normal_map
    }

    pub fn slope_map(&self) -> &Rgb32FImage {
        &self.slope_map
    }

    /// Recompute the color map and bind it as the mesh's base color texture.
    pub fn compute_color_map(
        &mut self,
        meshes: &mut dyn MeshStorage,
    ) -> Result<&RgbImage, TerrainError> {
        self.color_map = maps::compute_color_map(&self.vertices, &self.params);

        meshes.set_texture(
            self.mesh,
            MaterialTexture::BaseColor,
            TextureBinding::Rgb8 {
                width: self.color_map.width(),
                height: self.color_map.height(),
                pixels: self.color_map.as_raw().clone(),
            },
        )?;

        Ok(&self.color_map)
    }

    pub fn compute_normal_map(&mut self) -> &RgbImage {
        self.normal_map =
            maps::compute_normal_map(&self.vertices, self.params.width(), self.params.depth());
        &self.normal_map
    }

    pub fn compute_slope_map(&mut self) -> &Rgb32FImage {
        self.slope_map =
            maps::compute_slope_map(&self.vertices, self.params.width(), self.params.depth());
        &self.slope_map
    }

    fn synthesize_heights(&mut self) {
        let params = self.params;
        let noise = &self.noise;
        let width = params.width() as usize;
        let (width_f, depth_f) = (params.width() as f32, params.depth() as f32);

        self.vertices.clear();
        self.vertices.resize(params.vertex_count(), Vertex::default());

        self.vertices
            .par_iter_mut()
            .enumerate()
            .for_each(|(index, vertex)| {
                let x = (index % width) as f32;
                let z = (index / width) as f32;

                let noise_value =
                    noise.sample_2d(x / NOISE_SCALE, z / NOISE_SCALE, TERRAIN_OCTAVES, true);

                let position = Vec3::new(
                    (x - width_f * 0.5) * GRID_SPACING,
                    params.shape(noise_value),
                    (z - depth_f * 0.5) * GRID_SPACING,
                );
                let tex_coords = Vec2::new(x / width_f, z / depth_f);
                *vertex = Vertex::new(position, tex_coords, Vec3::ZERO, Vec3::ZERO);
            });
    }

    /// Finite-difference normals for interior vertices; the outer ring keeps its normals.
    fn compute_normals(&mut self) {
        let (w, d) = (self.params.width() as usize, self.params.depth() as usize);
        if w < 3 || d < 3 {
            return;
        }

        let heights: Vec<f32> = self.vertices.par_iter().map(Vertex::height).collect();

        self.vertices
            .par_chunks_mut(w)
            .enumerate()
            .skip(1)
            .take(d - 2)
            .for_each(|(j, row)| {
                for i in 1..w - 1 {
                    let top = heights[(j - 1) * w + i];
                    let left = heights[j * w + i - 1];
                    let right = heights[j * w + i + 1];
                    let bottom = heights[(j + 1) * w + i];

                    let (normal, tangent) = finite_difference_normal(top, bottom, left, right);
                    row[i].normal = normal.into();
                    row[i].tangent = tangent.into();
                }
            });
    }

    fn remap_vertices(&mut self, target: &TerrainParameters) {
        let current = self.params;
        self.vertices.par_iter_mut().for_each(|vertex| {
            vertex.position[1] = remap_height(vertex.position[1], &current, target);
        });

        self.compute_normals();
    }

    fn upload(&self, meshes: &mut dyn MeshStorage) -> Result<(), TerrainError> {
        meshes.upload(
            self.mesh,
            MeshData::new(self.vertices.clone(), self.indices.clone(), Topology::Triangles),
        )?;
        Ok(())
    }
}

impl<N: NoiseSampler> Terrain for StaticTerrain<N> {
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
        let start = Instant::now();
        self.params = TerrainParameters::new(width, depth, height_factor, flatness);

        self.synthesize_heights();
        self.compute_normals();
        self.indices = grid_indices(width, depth);

        log::debug!(
            "Generated {}x{} static terrain ({} triangles) in {:.2?}",
            width,
            depth,
            self.indices.len() / 3,
            start.elapsed()
        );

        self.upload(meshes)
    }

    fn set_parameters(
        &mut self,
        meshes: &mut dyn MeshStorage,
        height_factor: f32,
        flatness: f32,
    ) -> Result<(), TerrainError> {
        let start = Instant::now();
        let target = self.params.with_shape(height_factor, flatness);

        self.remap_vertices(&target);
        self.params = target;

        log::debug!(
            "Remapped {} vertices to height factor {} / flatness {} in {:.2?}",
            self.vertices.len(),
            target.height_factor(),
            target.flatness(),
            start.elapsed()
        );

        self.upload(meshes)
    }
}
