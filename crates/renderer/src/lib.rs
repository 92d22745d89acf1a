//! wgpu backend for the terrain compute kernels.

pub mod compute;
pub mod context;
pub mod shaders;

pub use compute::*;
pub use context::*;
pub use shaders::*;
