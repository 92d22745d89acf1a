//! Core engine types shared by the terrain generators and GPU backends.
//!
//! This crate provides the collaborator contracts the terrain core writes into:
//! - Vertex layout and mesh snapshots handed to the renderer
//! - Mesh storage addressed by handle (backed by an ECS world)
//! - The GPU compute program abstraction used by the dynamic terrain

pub mod gpu;
pub mod mesh;
pub mod vertex;

pub use gpu::*;
pub use mesh::*;
pub use vertex::*;

// Re-export commonly used types
pub use glam::{Vec2, Vec3};
pub use hecs::{Entity, World};
