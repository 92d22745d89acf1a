//! GPU compute program abstraction.
//!
//! Programs and textures are addressed by id; the backend owns the actual resources. Each
//! [`ComputeKernel`] has a fixed layout (uniform slots and image bindings) that every backend
//! honours, so the terrain code can drive them by name without knowing the backend.

use thiserror::Error;

/// Id of a texture owned by a [`GpuDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Id of a compute program owned by a [`GpuDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

/// Texel formats usable as compute images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// Single channel height values.
    R32Float,
    /// Normalised 8-bit color.
    Rgba8Unorm,
    /// Four float channels.
    Rgba32Float,
}

impl TextureFormat {
    pub fn channels(self) -> usize {
        match self {
            TextureFormat::R32Float => 1,
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba32Float => 4,
        }
    }

    /// Size of one texel in bytes.
    pub fn texel_size(self) -> u32 {
        match self {
            TextureFormat::R32Float => 4,
            TextureFormat::Rgba8Unorm => 4,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl TextureDescriptor {
    pub fn new(label: impl Into<String>, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            format,
        }
    }
}

/// Value of a program or material uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    UVec2([u32; 2]),
}

impl UniformValue {
    /// Raw 32-bit words as laid out in a uniform slot.
    pub fn words(self) -> Vec<u32> {
        match self {
            UniformValue::Float(v) => vec![v.to_bits()],
            UniformValue::Int(v) => vec![v as u32],
            UniformValue::UVec2(v) => v.to_vec(),
        }
    }
}

/// How a program accesses an image binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageTextureUsage {
    Read,
    Write,
    ReadWrite,
}

impl ImageTextureUsage {
    /// Whether a binding declared with `self` accepts an attachment requested as `requested`.
    pub fn allows(self, requested: ImageTextureUsage) -> bool {
        self == ImageTextureUsage::ReadWrite || self == requested
    }
}

/// Image binding declared by a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBinding {
    pub name: &'static str,
    pub format: TextureFormat,
    pub usage: ImageTextureUsage,
}

/// Number of 32-bit uniform words every kernel reserves.
pub const KERNEL_UNIFORM_WORDS: usize = 4;

/// Compute kernels the terrain dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputeKernel {
    /// Multi-octave Perlin noise written into a height texture.
    PerlinNoise2d,
    /// Elevation bands classified from the height texture.
    TerrainColor,
    /// Finite-difference slope of the shaped height texture.
    Slope,
}

impl ComputeKernel {
    pub fn label(self) -> &'static str {
        match self {
            ComputeKernel::PerlinNoise2d => "Perlin noise 2D",
            ComputeKernel::TerrainColor => "Terrain color",
            ComputeKernel::Slope => "Slope",
        }
    }

    /// Uniform names in slot order; each slot is one 32-bit word.
    pub fn uniforms(self) -> &'static [&'static str] {
        match self {
            ComputeKernel::PerlinNoise2d => &["uniNoiseFactor", "uniOctaveCount"],
            ComputeKernel::TerrainColor => &[],
            ComputeKernel::Slope => &["uniHeightFactor", "uniFlatness"],
        }
    }

    /// Image bindings in binding order (binding 0 is the uniform block).
    pub fn images(self) -> &'static [ImageBinding] {
        match self {
            ComputeKernel::PerlinNoise2d => &[ImageBinding {
                name: "uniNoiseMap",
                format: TextureFormat::R32Float,
                usage: ImageTextureUsage::Write,
            }],
            ComputeKernel::TerrainColor => &[
                ImageBinding {
                    name: "uniHeightmap",
                    format: TextureFormat::R32Float,
                    usage: ImageTextureUsage::Read,
                },
                ImageBinding {
                    name: "uniColorMap",
                    format: TextureFormat::Rgba8Unorm,
                    usage: ImageTextureUsage::Write,
                },
            ],
            ComputeKernel::Slope => &[
                ImageBinding {
                    name: "uniHeightmap",
                    format: TextureFormat::R32Float,
                    usage: ImageTextureUsage::Read,
                },
                ImageBinding {
                    name: "uniSlopeMap",
                    format: TextureFormat::Rgba32Float,
                    usage: ImageTextureUsage::Write,
                },
            ],
        }
    }

    /// Slot of a uniform by name.
    pub fn uniform_slot(self, name: &str) -> Option<usize> {
        self.uniforms().iter().position(|&uniform| uniform == name)
    }

    /// Index and declaration of an image binding by name.
    pub fn image_binding(self, name: &str) -> Option<(usize, ImageBinding)> {
        self.images()
            .iter()
            .enumerate()
            .find(|(_, binding)| binding.name == name)
            .map(|(index, binding)| (index, *binding))
    }
}

/// Texture contents read back to the CPU.
///
/// Channels are stored as floats in row-major order; 8-bit formats are normalised to `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub texels: Vec<f32>,
}

impl TextureData {
    pub fn texel(&self, x: u32, y: u32) -> &[f32] {
        let channels = self.format.channels();
        let start = (y as usize * self.width as usize + x as usize) * channels;
        &self.texels[start..start + channels]
    }
}

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no suitable GPU adapter found")]
    NoAdapter,
    #[error("failed to create GPU device: {0}")]
    DeviceCreation(String),
    #[error("failed to build compute program: {0}")]
    ProgramCreation(String),
    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureId),
    #[error("unknown program {0:?}")]
    UnknownProgram(ProgramId),
    #[error("{kernel:?} has no uniform named `{name}`")]
    UnknownUniform { kernel: ComputeKernel, name: String },
    #[error("{kernel:?} has no image binding named `{name}`")]
    UnknownBinding { kernel: ComputeKernel, name: String },
    #[error("binding `{name}` expects {expected:?} texels but the texture is {found:?}")]
    FormatMismatch {
        name: &'static str,
        expected: TextureFormat,
        found: TextureFormat,
    },
    #[error("binding `{name}` is declared {declared:?} and cannot be attached for {requested:?}")]
    UsageMismatch {
        name: &'static str,
        declared: ImageTextureUsage,
        requested: ImageTextureUsage,
    },
    #[error("{kernel:?} dispatched with image binding `{name}` unbound")]
    UnboundImage {
        kernel: ComputeKernel,
        name: &'static str,
    },
    #[error("{kernel:?} reads and writes texture {texture:?} in the same dispatch")]
    AliasedImage {
        kernel: ComputeKernel,
        texture: TextureId,
    },
    #[error("texture readback failed: {0}")]
    Readback(String),
}

/// Device able to run the terrain compute kernels.
pub trait GpuDevice {
    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> Result<TextureId, GpuError>;

    fn create_compute_program(&mut self, kernel: ComputeKernel) -> Result<ProgramId, GpuError>;

    fn set_uniform(
        &mut self,
        program: ProgramId,
        name: &str,
        value: UniformValue,
    ) -> Result<(), GpuError>;

    fn set_image_texture(
        &mut self,
        program: ProgramId,
        texture: TextureId,
        binding: &str,
        usage: ImageTextureUsage,
    ) -> Result<(), GpuError>;

    /// Dispatch the program over a `width × height` domain and wait for completion.
    fn execute(&mut self, program: ProgramId, width: u32, height: u32) -> Result<(), GpuError>;

    fn read_texture(&mut self, texture: TextureId) -> Result<TextureData, GpuError>;
}

/// Write `value` into the uniform words of `kernel`, checking the slot exists and fits.
pub fn write_uniform(
    kernel: ComputeKernel,
    words: &mut [u32; KERNEL_UNIFORM_WORDS],
    name: &str,
    value: UniformValue,
) -> Result<(), GpuError> {
    let unknown = || GpuError::UnknownUniform {
        kernel,
        name: name.to_owned(),
    };
    let slot = kernel.uniform_slot(name).ok_or_else(unknown)?;
    let value_words = value.words();
    if slot + value_words.len() > KERNEL_UNIFORM_WORDS {
        return Err(unknown());
    }
    words[slot..slot + value_words.len()].copy_from_slice(&value_words);
    Ok(())
}

/// Resolve an image attachment request against the kernel layout.
pub fn resolve_image_binding(
    kernel: ComputeKernel,
    binding: &str,
    format: TextureFormat,
    usage: ImageTextureUsage,
) -> Result<usize, GpuError> {
    let (index, declared) =
        kernel
            .image_binding(binding)
            .ok_or_else(|| GpuError::UnknownBinding {
                kernel,
                name: binding.to_owned(),
            })?;
    if declared.format != format {
        return Err(GpuError::FormatMismatch {
            name: declared.name,
            expected: declared.format,
            found: format,
        });
    }
    if !declared.usage.allows(usage) {
        return Err(GpuError::UsageMismatch {
            name: declared.name,
            declared: declared.usage,
            requested: usage,
        });
    }
    Ok(index)
}
