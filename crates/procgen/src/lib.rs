//! Procedural terrain: noise heightfields, derived maps, and GPU-driven tessellated terrain.

pub mod dynamic_terrain;
pub mod error;
pub mod maps;
pub mod noise;
pub mod params;
pub mod software_device;
pub mod static_terrain;

pub use dynamic_terrain::*;
pub use error::*;
pub use maps::*;
pub use noise::*;
pub use params::*;
pub use software_device::*;
pub use static_terrain::*;
