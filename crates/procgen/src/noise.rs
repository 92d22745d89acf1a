//! Coherent noise primitive sampled by the terrain generators.
//!
//! **Determinism:** a [`FractalNoise`] is a pure function of its seed and the sample
//! coordinates, so the same grid always yields bit-identical heights regardless of how the
//! work is split across threads.

use noise::{NoiseFn, Perlin};

/// Number of octaves summed for every terrain height sample.
pub const TERRAIN_OCTAVES: u32 = 8;

/// Grid units per noise unit: cell `(i, j)` samples noise at `(i / 100, j / 100)`.
pub const NOISE_SCALE: f32 = 100.0;

/// Multi-octave 2D coherent noise.
pub trait NoiseSampler: Send + Sync {
    /// Sample the noise at `(x, y)`.
    ///
    /// With `normalized` set the result lies in `[0, 1]`, otherwise in `[-1, 1]`.
    fn sample_2d(&self, x: f32, y: f32, octaves: u32, normalized: bool) -> f32;
}

/// Fractal Brownian motion over Perlin gradient noise.
#[derive(Debug, Clone)]
pub struct FractalNoise {
    perlin: Perlin,
    /// Frequency multiplier per octave.
    lacunarity: f64,
    /// Amplitude multiplier per octave.
    persistence: f64,
}

impl Default for FractalNoise {
    fn default() -> Self {
        Self::new(0)
    }
}

impl FractalNoise {
    pub fn new(seed: u32) -> Self {
        Self {
            perlin: Perlin::new(seed),
            lacunarity: 2.0,
            persistence: 0.5,
        }
    }
}

impl NoiseSampler for FractalNoise {
    fn sample_2d(&self, x: f32, y: f32, octaves: u32, normalized: bool) -> f32 {
        let (x, y) = (x as f64, y as f64);
        let mut value = 0.0;
        let mut amplitude = 1.0;
        let mut frequency = 1.0;
        let mut max_value = 0.0;

        for _ in 0..octaves.max(1) {
            value += self.perlin.get([x * frequency, y * frequency]) * amplitude;
            max_value += amplitude;

            amplitude *= self.persistence;
            frequency *= self.lacunarity;
        }

        let value = (value / max_value).clamp(-1.0, 1.0);
        if normalized {
            ((value + 1.0) * 0.5) as f32
        } else {
            value as f32
        }
    }
}
