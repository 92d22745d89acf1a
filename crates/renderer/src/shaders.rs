//! Embedded WGSL compute kernels.

use engine_core::ComputeKernel;

pub const PERLIN_NOISE_2D_WGSL: &str = include_str!("../shaders/perlin_noise_2d.wgsl");
pub const TERRAIN_COLOR_WGSL: &str = include_str!("../shaders/terrain_color.wgsl");
pub const SLOPE_WGSL: &str = include_str!("../shaders/slope.wgsl");

/// Entry point shared by every kernel.
pub const ENTRY_POINT: &str = "main";

/// Side of the square workgroup declared by every kernel.
pub const WORKGROUP_SIZE: u32 = 8;

pub fn kernel_source(kernel: ComputeKernel) -> &'static str {
    match kernel {
        ComputeKernel::PerlinNoise2d => PERLIN_NOISE_2D_WGSL,
        ComputeKernel::TerrainColor => TERRAIN_COLOR_WGSL,
        ComputeKernel::Slope => SLOPE_WGSL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernels_declare_entry_point_and_workgroup() {
        for kernel in [
            ComputeKernel::PerlinNoise2d,
            ComputeKernel::TerrainColor,
            ComputeKernel::Slope,
        ] {
            let source = kernel_source(kernel);
            assert!(source.contains("fn main("), "{kernel:?}");
            assert!(source.contains("@workgroup_size(8, 8)"), "{kernel:?}");
        }
    }

    /// Bindings after the uniform block follow the kernel's image order.
    #[test]
    fn image_bindings_match_kernel_layout() {
        let expectations: [(ComputeKernel, &[&str]); 3] = [
            (ComputeKernel::PerlinNoise2d, &["@binding(1) var noise_map"]),
            (
                ComputeKernel::TerrainColor,
                &["@binding(1) var heightmap", "@binding(2) var color_map"],
            ),
            (
                ComputeKernel::Slope,
                &["@binding(1) var heightmap", "@binding(2) var slope_map"],
            ),
        ];
        for (kernel, bindings) in expectations {
            assert_eq!(kernel.images().len(), bindings.len());
            for binding in bindings {
                assert!(kernel_source(kernel).contains(binding), "{kernel:?}: {binding}");
            }
        }
    }
}
