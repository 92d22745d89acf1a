//! Generation settings. Loaded from config.ron at startup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Device running the dynamic terrain kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Backend {
    /// wgpu if an adapter is available, software otherwise.
    #[default]
    Auto,
    Gpu,
    Software,
}

/// Height curve applied after the initial generation, as an interactive edit would.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreviewParameters {
    pub height_factor: f32,
    pub flatness: f32,
}

/// Persistent generation settings. Loaded from `config.ron` in the current directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MidgardConfig {
    /// Vertices along X.
    #[serde(default = "default_size")]
    pub width: u32,
    /// Vertices along Z.
    #[serde(default = "default_size")]
    pub depth: u32,
    #[serde(default = "default_height_factor")]
    pub height_factor: f32,
    #[serde(default = "default_flatness")]
    pub flatness: f32,
    /// Minimum tessellation level of the dynamic terrain.
    #[serde(default = "default_min_tess_level")]
    pub min_tess_level: f32,
    /// Frequency of the dynamic terrain's noise map.
    #[serde(default = "default_noise_factor")]
    pub noise_factor: f32,
    #[serde(default)]
    pub seed: u32,
    /// Also generate the dynamic terrain and export its maps.
    #[serde(default = "default_true")]
    pub dynamic: bool,
    #[serde(default)]
    pub backend: Backend,
    /// Directory receiving the exported maps.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub preview: Option<PreviewParameters>,
}

fn default_size() -> u32 {
    512
}
fn default_height_factor() -> f32 {
    30.0
}
fn default_flatness() -> f32 {
    3.0
}
fn default_min_tess_level() -> f32 {
    procgen::DEFAULT_MIN_TESS_LEVEL
}
fn default_noise_factor() -> f32 {
    procgen::DEFAULT_NOISE_FACTOR
}
fn default_true() -> bool {
    true
}
fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for MidgardConfig {
    fn default() -> Self {
        Self {
            width: default_size(),
            depth: default_size(),
            height_factor: default_height_factor(),
            flatness: default_flatness(),
            min_tess_level: default_min_tess_level(),
            noise_factor: default_noise_factor(),
            seed: 0,
            dynamic: default_true(),
            backend: Backend::default(),
            output_dir: default_output_dir(),
            preview: None,
        }
    }
}

impl MidgardConfig {
    /// Load config from `config.ron`. If the file is missing or invalid, returns default config.
    pub fn load() -> Self {
        let path = config_path();
        if let Ok(data) = std::fs::read_to_string(&path) {
            match Self::parse(&data) {
                Ok(c) => return c,
                Err(e) => log::warn!("Invalid config at {:?}: {}, using defaults", path, e),
            }
        }
        Self::default()
    }

    pub fn parse(data: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(data)
    }
}

fn config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.ron")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = MidgardConfig::parse("()").unwrap();
        assert_eq!((config.width, config.depth), (512, 512));
        assert_eq!(config.height_factor, 30.0);
        assert_eq!(config.flatness, 3.0);
        assert_eq!(config.min_tess_level, 12.0);
        assert_eq!(config.noise_factor, 0.01);
        assert_eq!(config.backend, Backend::Auto);
        assert_eq!(config.output_dir, PathBuf::from("."));
        assert!(config.dynamic);
        assert!(config.preview.is_none());
    }

    #[test]
    fn partial_config_overrides_fields() {
        let config = MidgardConfig::parse(
            "(width: 128, flatness: 1.5, backend: Software, preview: Some((height_factor: 10.0, flatness: 2.0)))",
        )
        .unwrap();
        assert_eq!((config.width, config.depth), (128, 512));
        assert_eq!(config.flatness, 1.5);
        assert_eq!(config.backend, Backend::Software);
        assert_eq!(
            config.preview,
            Some(PreviewParameters {
                height_factor: 10.0,
                flatness: 2.0
            })
        );
    }

    #[test]
    fn malformed_config_is_rejected() {
        assert!(MidgardConfig::parse("(width: \"wide\")").is_err());
    }
}
