//! [`GpuDevice`] backed by wgpu compute pipelines.

use engine_core::{
    resolve_image_binding, write_uniform, ComputeKernel, GpuDevice, GpuError, ImageTextureUsage,
    ProgramId, TextureData, TextureDescriptor, TextureFormat, TextureId, UniformValue,
    KERNEL_UNIFORM_WORDS,
};

use crate::context::GpuContext;
use crate::shaders::{kernel_source, ENTRY_POINT, WORKGROUP_SIZE};

/// Kernel uniform words followed by the dispatch domain, padded to 16-byte rows.
const UNIFORM_BLOCK_WORDS: usize = KERNEL_UNIFORM_WORDS + 4;

fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
    }
}

/// Row pitch of a readback buffer, aligned as `copy_texture_to_buffer` requires.
pub fn padded_bytes_per_row(width: u32, format: TextureFormat) -> u32 {
    let unpadded = width * format.texel_size();
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Decode a padded readback into float channels; 8-bit channels are normalised.
pub fn decode_texels(
    bytes: &[u8],
    width: u32,
    height: u32,
    format: TextureFormat,
    bytes_per_row: u32,
) -> Vec<f32> {
    let row_len = (width * format.texel_size()) as usize;
    let mut texels = Vec::with_capacity(width as usize * height as usize * format.channels());

    for row in bytes.chunks(bytes_per_row as usize).take(height as usize) {
        let row = &row[..row_len];
        match format {
            TextureFormat::Rgba8Unorm => {
                texels.extend(row.iter().map(|&byte| byte as f32 / 255.0));
            }
            TextureFormat::R32Float | TextureFormat::Rgba32Float => {
                texels.extend(
                    row.chunks_exact(4)
                        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
                );
            }
        }
    }
    texels
}

fn image_layout_entry(
    binding: u32,
    format: TextureFormat,
    usage: ImageTextureUsage,
) -> wgpu::BindGroupLayoutEntry {
    let ty = match usage {
        ImageTextureUsage::Read => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        ImageTextureUsage::Write => wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: wgpu_format(format),
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        ImageTextureUsage::ReadWrite => wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::ReadWrite,
            format: wgpu_format(format),
            view_dimension: wgpu::TextureViewDimension::D2,
        },
    };

    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty,
        count: None,
    }
}

struct GpuTexture {
    descriptor: TextureDescriptor,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct GpuProgram {
    kernel: ComputeKernel,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    uniforms: [u32; KERNEL_UNIFORM_WORDS],
    images: Vec<Option<TextureId>>,
}

/// Runs the terrain kernels on a wgpu device.
pub struct WgpuDevice {
    context: GpuContext,
    textures: Vec<GpuTexture>,
    programs: Vec<GpuProgram>,
}

impl WgpuDevice {
    pub fn new(context: GpuContext) -> Self {
        Self {
            context,
            textures: Vec::new(),
            programs: Vec::new(),
        }
    }

    /// Request a headless device and wrap it.
    pub fn headless() -> Result<Self, GpuError> {
        Ok(Self::new(GpuContext::headless()?))
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    fn texture(&self, id: TextureId) -> Result<&GpuTexture, GpuError> {
        self.textures
            .get(id.0 as usize)
            .ok_or(GpuError::UnknownTexture(id))
    }

    fn program(&self, id: ProgramId) -> Result<&GpuProgram, GpuError> {
        self.programs
            .get(id.0 as usize)
            .ok_or(GpuError::UnknownProgram(id))
    }

    fn program_mut(&mut self, id: ProgramId) -> Result<&mut GpuProgram, GpuError> {
        self.programs
            .get_mut(id.0 as usize)
            .ok_or(GpuError::UnknownProgram(id))
    }

    fn bind_group(&self, program: &GpuProgram) -> Result<wgpu::BindGroup, GpuError> {
        let mut views = Vec::with_capacity(program.images.len());
        for (binding, bound) in program.kernel.images().iter().zip(&program.images) {
            let id = bound.ok_or(GpuError::UnboundImage {
                kernel: program.kernel,
                name: binding.name,
            })?;
            views.push(&self.texture(id)?.view);
        }

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: program.uniform_buffer.as_entire_binding(),
        }];
        entries.extend(views.into_iter().enumerate().map(|(index, view)| {
            wgpu::BindGroupEntry {
                binding: index as u32 + 1,
                resource: wgpu::BindingResource::TextureView(view),
            }
        }));

        Ok(self.context.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(program.kernel.label()),
            layout: &program.bind_group_layout,
            entries: &entries,
        }))
    }
}

impl GpuDevice for WgpuDevice {
    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> Result<TextureId, GpuError> {
        let texture = self.context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(descriptor.label.as_str()),
            size: wgpu::Extent3d {
                width: descriptor.width,
                height: descriptor.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format(descriptor.format),
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        self.textures.push(GpuTexture {
            descriptor: descriptor.clone(),
            texture,
            view,
        });
        Ok(TextureId(self.textures.len() as u32 - 1))
    }

    fn create_compute_program(&mut self, kernel: ComputeKernel) -> Result<ProgramId, GpuError> {
        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(kernel.label()),
            source: wgpu::ShaderSource::Wgsl(kernel_source(kernel).into()),
        });

        let mut layout_entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }];
        layout_entries.extend(kernel.images().iter().enumerate().map(|(index, image)| {
            image_layout_entry(index as u32 + 1, image.format, image.usage)
        }));

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(kernel.label()),
            entries: &layout_entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(kernel.label()),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(kernel.label()),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some(ENTRY_POINT),
            compilation_options: Default::default(),
            cache: None,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(kernel.label()),
            size: (UNIFORM_BLOCK_WORDS * std::mem::size_of::<u32>()) as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(GpuError::ProgramCreation(error.to_string()));
        }
        log::debug!("Built compute program {:?}", kernel.label());

        self.programs.push(GpuProgram {
            kernel,
            pipeline,
            bind_group_layout,
            uniform_buffer,
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
        let program = self.program(program)?;
        let bind_group = self.bind_group(program)?;

        let mut block = [0u32; UNIFORM_BLOCK_WORDS];
        block[..KERNEL_UNIFORM_WORDS].copy_from_slice(&program.uniforms);
        block[KERNEL_UNIFORM_WORDS] = width;
        block[KERNEL_UNIFORM_WORDS + 1] = height;
        self.context
            .queue
            .write_buffer(&program.uniform_buffer, 0, bytemuck::cast_slice(&block));

        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(program.kernel.label()),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(program.kernel.label()),
                timestamp_writes: None,
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                width.div_ceil(WORKGROUP_SIZE),
                height.div_ceil(WORKGROUP_SIZE),
                1,
            );
        }
        self.context.queue.submit(std::iter::once(encoder.finish()));
        self.context.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn read_texture(&mut self, texture: TextureId) -> Result<TextureData, GpuError> {
        let texture = self.texture(texture)?;
        let TextureDescriptor {
            width,
            height,
            format,
            ..
        } = texture.descriptor;
        let bytes_per_row = padded_bytes_per_row(width, format);

        let staging = self.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Texture Readback"),
            size: bytes_per_row as u64 * height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Texture Readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.context.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.context.device.poll(wgpu::Maintain::Wait);

        receiver
            .recv()
            .map_err(|e| GpuError::Readback(format!("Channel error: {}", e)))?
            .map_err(|e| GpuError::Readback(format!("Map error: {:?}", e)))?;

        let texels = {
            let mapped = slice.get_mapped_range();
            decode_texels(&mapped, width, height, format, bytes_per_row)
        };
        staging.unmap();

        Ok(TextureData {
            width,
            height,
            format,
            texels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_padded_to_copy_alignment() {
        assert_eq!(padded_bytes_per_row(1024, TextureFormat::R32Float), 4096);
        assert_eq!(padded_bytes_per_row(10, TextureFormat::R32Float), 256);
        assert_eq!(padded_bytes_per_row(65, TextureFormat::Rgba8Unorm), 512);
        assert_eq!(padded_bytes_per_row(16, TextureFormat::Rgba32Float), 256);
    }

    #[test]
    fn decode_skips_row_padding() {
        let pitch = padded_bytes_per_row(2, TextureFormat::R32Float) as usize;
        let mut bytes = vec![0xAB; pitch * 2];
        for (row, values) in [[0.25f32, 0.5], [0.75, 1.0]].iter().enumerate() {
            for (col, value) in values.iter().enumerate() {
                let start = row * pitch + col * 4;
                bytes[start..start + 4].copy_from_slice(&value.to_le_bytes());
            }
        }

        let texels = decode_texels(&bytes, 2, 2, TextureFormat::R32Float, pitch as u32);
        assert_eq!(texels, vec![0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn decode_normalises_unorm_channels() {
        let pitch = padded_bytes_per_row(1, TextureFormat::Rgba8Unorm);
        let mut bytes = vec![0; pitch as usize];
        bytes[..4].copy_from_slice(&[0, 51, 255, 255]);

        let texels = decode_texels(&bytes, 1, 1, TextureFormat::Rgba8Unorm, pitch);
        assert_eq!(texels, vec![0.0, 0.2, 1.0, 1.0]);
    }

    #[test]
    fn layout_entries_follow_usage() {
        let read = image_layout_entry(1, TextureFormat::R32Float, ImageTextureUsage::Read);
        assert!(matches!(read.ty, wgpu::BindingType::Texture { .. }));

        let write = image_layout_entry(2, TextureFormat::Rgba8Unorm, ImageTextureUsage::Write);
        assert!(matches!(
            write.ty,
            wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: wgpu::TextureFormat::Rgba8Unorm,
                ..
            }
        ));
        assert_eq!(write.binding, 2);
    }
}
