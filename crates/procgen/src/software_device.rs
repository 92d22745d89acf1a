//! CPU implementation of the terrain compute kernels.
//!
//! Mirrors what the GPU backends run, texel for texel, so the dynamic terrain can be driven
//! (and tested) on machines without a usable adapter. Rows of the dispatch domain are spread
//! over the rayon pool.

use engine_core::{
    resolve_image_binding, write_uniform, ComputeKernel, GpuDevice, GpuError, ImageTextureUsage,
    ProgramId, TextureData, TextureDescriptor, TextureFormat, TextureId, UniformValue,
    KERNEL_UNIFORM_WORDS,
};
use rayon::prelude::*;

use crate::maps::{band_color, slope_at};
use crate::noise::{FractalNoise, NoiseSampler};

struct SoftwareTexture {
    descriptor: TextureDescriptor,
    texels: Vec<f32>,
}

impl SoftwareTexture {
    fn height_at(&self, x: i64, y: i64) -> f32 {
        let x = x.clamp(0, self.descriptor.width as i64 - 1) as usize;
        let y = y.clamp(0, self.descriptor.height as i64 - 1) as usize;
        let channels = self.descriptor.format.channels();
        self.texels[(y * self.descriptor.width as usize + x) * channels]
    }
}

struct SoftwareProgram {
    kernel: ComputeKernel,
    uniforms: [u32; KERNEL_UNIFORM_WORDS],
    images: Vec<Option<TextureId>>,
}

/// [`GpuDevice`] evaluating the kernels on the CPU.
pub struct SoftwareDevice {
    noise: FractalNoise,
    textures: Vec<SoftwareTexture>,
    programs: Vec<SoftwareProgram>,
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self::with_noise(FractalNoise::default())
    }

    pub fn with_noise(noise: FractalNoise) -> Self {
        Self {
            noise,
            textures: Vec::new(),
            programs: Vec::new(),
        }
    }

    fn texture(&self, id: TextureId) -> Result<&SoftwareTexture, GpuError> {
        self.textures
            .get(id.0 as usize)
            .ok_or(GpuError::UnknownTexture(id))
    }

    fn texture_mut(&mut self, id: TextureId) -> Result<&mut SoftwareTexture, GpuError> {
        self.textures
            .get_mut(id.0 as usize)
            .ok_or(GpuError::UnknownTexture(id))
    }

    fn program_mut(&mut self, id: ProgramId) -> Result<&mut SoftwareProgram, GpuError> {
        self.programs
            .get_mut(id.0 as usize)
            .ok_or(GpuError::UnknownProgram(id))
    }

    /// Run `texel` for every output texel inside the `width × height` domain.
    ///
    /// `texel` receives the texel coordinates, the output size and the texel's channels.
    fn dispatch(
        &mut self,
        kernel: ComputeKernel,
        input: Option<TextureId>,
        output: TextureId,
        width: u32,
        height: u32,
        texel: impl Fn(Option<&SoftwareTexture>, u32, u32, (u32, u32), &mut [f32]) + Sync,
    ) -> Result<(), GpuError> {
        if input == Some(output) {
            return Err(GpuError::AliasedImage {
                kernel,
                texture: output,
            });
        }

        if let Some(id) = input {
            self.texture(id)?;
        }
        let target = self.texture_mut(output)?;
        let (out_width, out_height) = (target.descriptor.width, target.descriptor.height);
        let channels = target.descriptor.format.channels();
        let mut texels = std::mem::take(&mut target.texels);

        let source = match input {
            Some(id) => Some(self.texture(id)?),
            None => None,
        };

        let columns = width.min(out_width) as usize;
        let rows = height.min(out_height) as usize;
        if columns > 0 {
            texels
                .par_chunks_mut(out_width as usize * channels)
                .take(rows)
                .enumerate()
                .for_each(|(y, row)| {
                    for (x, value) in row.chunks_mut(channels).take(columns).enumerate() {
                        texel(source, x as u32, y as u32, (out_width, out_height), value);
                    }
                });
        }

        self.texture_mut(output)?.texels = texels;
        Ok(())
    }
}

impl GpuDevice for SoftwareDevice {
    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> Result<TextureId, GpuError> {
        let len = descriptor.width as usize * descriptor.height as usize * descriptor.format.channels();
        self.textures.push(SoftwareTexture {
            descriptor: descriptor.clone(),
            texels: vec![0.0; len],
        });
        Ok(TextureId(self.textures.len() as u32 - 1))
    }

    fn create_compute_program(&mut self, kernel: ComputeKernel) -> Result<ProgramId, GpuError> {
        self.programs.push(SoftwareProgram {
            kernel,
            uniforms: [0; KERNEL_UNIFORM_WORDS],
            images: vec![None; kernel.images().len()],
        });
        Ok(ProgramId(self.programs.len() as u32 - 1))
    }

    fn set_uniform(
        &mut self,
        program: ProgramId,
        name: &str,
        value: UniformValue,
    ) -> Result<(), GpuError> {
        let program = self.program_mut(program)?;
        write_uniform(program.kernel, &mut program.uniforms, name, value)
    }

    fn set_image_texture(
        &mut self,
        program: ProgramId,
        texture: TextureId,
        binding: &str,
        usage: ImageTextureUsage,
    ) -> Result<(), GpuError> {
        let format = self.texture(texture)?.descriptor.format;
        let program = self.program_mut(program)?;
        let index = resolve_image_binding(program.kernel, binding, format, usage)?;
        program.images[index] = Some(texture);
        Ok(())
    }

    fn execute(&mut self, program: ProgramId, width: u32, height: u32) -> Result<(), GpuError> {
        let program = self.program_mut(program)?;
        let kernel = program.kernel;
        let uniforms = program.uniforms;
        let images = kernel
            .images()
            .iter()
            .zip(&program.images)
            .map(|(binding, bound)| {
                bound.ok_or(GpuError::UnboundImage {
                    kernel,
                    name: binding.name,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        match kernel {
            ComputeKernel::PerlinNoise2d => {
                let factor = f32::from_bits(uniforms[0]);
                let octaves = (uniforms[1] as i32).max(1) as u32;
                let noise = self.noise.clone();

                self.dispatch(kernel, None, images[0], width, height, |_, x, y, _, out| {
                    out[0] = noise.sample_2d(x as f32 * factor, y as f32 * factor, octaves, true);
                })
            }
            ComputeKernel::TerrainColor => {
                self.dispatch(kernel, Some(images[0]), images[1], width, height, |source, x, y, _, out| {
                    let noise = source.map_or(0.0, |heights| heights.height_at(x as i64, y as i64));
                    let color = band_color(noise);
                    for (channel, value) in out.iter_mut().zip(color) {
                        *channel = value as f32 / 255.0;
                    }
                    out[3] = 1.0;
                })
            }
            ComputeKernel::Slope => {
                let height_factor = f32::from_bits(uniforms[0]);
                let flatness = f32::from_bits(uniforms[1]);

                self.dispatch(kernel, Some(images[0]), images[1], width, height, |source, x, y, (w, h), out| {
                    let Some(heights) = source else { return };
                    if x == 0 || y == 0 || x + 1 >= w || y + 1 >= h {
                        out.fill(0.0);
                        return;
                    }

                    let (x, y) = (x as i64, y as i64);
                    let shaped = |sx: i64, sy: i64| heights.height_at(sx, sy).powf(flatness) * height_factor;
                    let slope = slope_at(shaped(x, y - 1), shaped(x, y + 1), shaped(x - 1, y), shaped(x + 1, y));
                    out[..3].copy_from_slice(&slope);
                    out[3] = 1.0;
                })
            }
        }
    }

    fn read_texture(&mut self, texture: TextureId) -> Result<TextureData, GpuError> {
        let texture = self.texture(texture)?;
        Ok(TextureData {
            width: texture.descriptor.width,
            height: texture.descriptor.height,
            format: texture.descriptor.format,
            texels: texture.texels.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise::TERRAIN_OCTAVES;

    fn noise_program(device: &mut SoftwareDevice, size: u32) -> (ProgramId, TextureId) {
        let map = device
            .create_texture(&TextureDescriptor::new("noise", size, size, TextureFormat::R32Float))
            .unwrap();
        let program = device.create_compute_program(ComputeKernel::PerlinNoise2d).unwrap();
        device
            .set_uniform(program, "uniOctaveCount", UniformValue::Int(TERRAIN_OCTAVES as i32))
            .unwrap();
        device
            .set_uniform(program, "uniNoiseFactor", UniformValue::Float(0.01))
            .unwrap();
        device
            .set_image_texture(program, map, "uniNoiseMap", ImageTextureUsage::Write)
            .unwrap();
        (program, map)
    }

    #[test]
    fn noise_kernel_matches_cpu_sampler() {
        let mut device = SoftwareDevice::new();
        let (program, map) = noise_program(&mut device, 16);
        device.execute(program, 16, 16).unwrap();

        let data = device.read_texture(map).unwrap();
        let noise = FractalNoise::default();
        assert_eq!(
            data.texel(5, 9)[0],
            noise.sample_2d(5.0 * 0.01, 9.0 * 0.01, TERRAIN_OCTAVES, true)
        );
        assert!(data.texels.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn dispatch_is_clipped_to_domain() {
        let mut device = SoftwareDevice::new();
        let (program, map) = noise_program(&mut device, 8);
        device
            .set_uniform(program, "uniNoiseFactor", UniformValue::Float(0.37))
            .unwrap();
        device.execute(program, 4, 2).unwrap();

        let data = device.read_texture(map).unwrap();
        assert_ne!(data.texel(3, 1)[0], 0.0);
        assert_eq!(data.texel(4, 1)[0], 0.0);
        assert_eq!(data.texel(3, 2)[0], 0.0);
    }

    #[test]
    fn unbound_image_is_reported() {
        let mut device = SoftwareDevice::new();
        let program = device.create_compute_program(ComputeKernel::Slope).unwrap();
        assert!(matches!(
            device.execute(program, 4, 4),
            Err(GpuError::UnboundImage { name: "uniHeightmap", .. })
        ));
    }

    #[test]
    fn color_kernel_rejects_mismatched_formats() {
        let mut device = SoftwareDevice::new();
        let map = device
            .create_texture(&TextureDescriptor::new("heights", 4, 4, TextureFormat::R32Float))
            .unwrap();
        let color = device
            .create_texture(&TextureDescriptor::new("color", 4, 4, TextureFormat::Rgba8Unorm))
            .unwrap();
        let program = device.create_compute_program(ComputeKernel::TerrainColor).unwrap();
        device
            .set_image_texture(program, map, "uniHeightmap", ImageTextureUsage::Read)
            .unwrap();
        assert!(device
            .set_image_texture(program, map, "uniColorMap", ImageTextureUsage::Write)
            .is_err());
        device
            .set_image_texture(program, color, "uniColorMap", ImageTextureUsage::Write)
            .unwrap();
        device.execute(program, 4, 4).unwrap();

        let data = device.read_texture(color).unwrap();
        assert_eq!(data.texel(0, 0), &[0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn unknown_ids_are_reported() {
        let mut device = SoftwareDevice::new();
        assert!(matches!(
            device.execute(ProgramId(3), 1, 1),
            Err(GpuError::UnknownProgram(ProgramId(3)))
        ));
        assert!(matches!(
            device.read_texture(TextureId(0)),
            Err(GpuError::UnknownTexture(TextureId(0)))
        ));
    }
}
