//! Errors surfaced by terrain operations.
//!
//! Parameter problems never show up here: out-of-range values are clamped with a warning.
//! Only collaborator failures propagate.

use engine_core::{GpuError, MeshError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TerrainError {
    #[error("mesh storage: {0}")]
    Mesh(#[from] MeshError),
    #[error("gpu: {0}")]
    Gpu(#[from] GpuError),
}
