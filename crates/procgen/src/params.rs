//! Shared terrain parameter contract.
//!
//! Heights are stored as `noise^flatness * height_factor` with `noise ∈ [0, 1]`. Because the
//! curve is monotonic and both factors are strictly positive, the original noise sample can
//! be recovered from `(height, height_factor, flatness)` alone. Parameter updates rely on this
//! to reshape a terrain without sampling noise again.
//!
//! Heights are non-negative by construction. Negative heights are outside the contract: the
//! inverse curve raises them to a fractional power and yields NaN.

use engine_core::MeshStorage;

use crate::error::TerrainError;

/// Default minimal tessellation level of the dynamic terrain.
pub const DEFAULT_MIN_TESS_LEVEL: f32 = 12.0;

/// Clamp the height factor and flatness to strictly positive values.
///
/// Values `<= 0` (and NaN) are replaced by `f32::EPSILON` with a warning; valid values pass
/// through untouched.
pub fn check_parameters(height_factor: f32, flatness: f32) -> (f32, f32) {
    let height_factor = if height_factor > 0.0 {
        height_factor
    } else {
        log::warn!(
            "Height factor can't be 0 or negative (got {}); remapping to +epsilon",
            height_factor
        );
        f32::EPSILON
    };

    let flatness = if flatness > 0.0 {
        flatness
    } else {
        log::warn!(
            "Flatness can't be 0 or negative (got {}); remapping to +epsilon",
            flatness
        );
        f32::EPSILON
    };

    (height_factor, flatness)
}

/// Clamp the minimal tessellation level to a strictly positive value.
pub fn check_tessellation_level(min_tess_level: f32) -> f32 {
    if min_tess_level > 0.0 {
        min_tess_level
    } else {
        log::warn!(
            "The minimal tessellation level can't be 0 or negative (got {}); remapping to +epsilon",
            min_tess_level
        );
        f32::EPSILON
    }
}

/// Grid size and height curve of a terrain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerrainParameters {
    width: u32,
    depth: u32,
    height_factor: f32,
    flatness: f32,
    /// Cached `1 / flatness`.
    inv_flatness: f32,
}

impl Default for TerrainParameters {
    fn default() -> Self {
        Self {
            width: 0,
            depth: 0,
            height_factor: 1.0,
            flatness: 1.0,
            inv_flatness: 1.0,
        }
    }
}

impl TerrainParameters {
    /// Validated parameters for a `width × depth` grid.
    pub fn new(width: u32, depth: u32, height_factor: f32, flatness: f32) -> Self {
        Self {
            width,
            depth,
            ..Self::default()
        }
        .with_shape(height_factor, flatness)
    }

    /// Same grid with a new (validated) height curve.
    pub fn with_shape(self, height_factor: f32, flatness: f32) -> Self {
        let (height_factor, flatness) = check_parameters(height_factor, flatness);
        Self {
            height_factor,
            flatness,
            inv_flatness: 1.0 / flatness,
            ..self
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn height_factor(&self) -> f32 {
        self.height_factor
    }

    pub fn flatness(&self) -> f32 {
        self.flatness
    }

    pub fn inv_flatness(&self) -> f32 {
        self.inv_flatness
    }

    /// Number of grid vertices.
    pub fn vertex_count(&self) -> usize {
        self.width as usize * self.depth as usize
    }

    /// Height of a normalized noise sample under this curve.
    #[inline]
    pub fn shape(&self, noise: f32) -> f32 {
        noise.powf(self.flatness) * self.height_factor
    }

    /// Normalized elevation `t ∈ [0, 1]` recovered from a stored height.
    #[inline]
    pub fn normalized_height(&self, height: f32) -> f32 {
        debug_assert!(height >= 0.0, "terrain heights are non-negative");
        (height / self.height_factor).powf(self.inv_flatness)
    }
}

/// Re-shape a height produced by `from` so it follows the curve of `to`.
#[inline]
pub fn remap_height(height: f32, from: &TerrainParameters, to: &TerrainParameters) -> f32 {
    to.shape(from.normalized_height(height))
}

/// Capabilities shared by every terrain variant.
pub trait Terrain {
    fn parameters(&self) -> &TerrainParameters;

    /// Fully (re)synthesize the terrain and upload it.
    fn generate(
        &mut self,
        meshes: &mut dyn MeshStorage,
        width: u32,
        depth: u32,
        height_factor: f32,
        flatness: f32,
    ) -> Result<(), TerrainError>;

    /// Change the height curve without sampling noise again.
    fn set_parameters(
        &mut self,
        meshes: &mut dyn MeshStorage,
        height_factor: f32,
        flatness: f32,
    ) -> Result<(), TerrainError>;

    fn set_height_factor(
        &mut self,
        meshes: &mut dyn MeshStorage,
        height_factor: f32,
    ) -> Result<(), TerrainError> {
        let flatness = self.parameters().flatness();
        self.set_parameters(meshes, height_factor, flatness)
    }

    fn set_flatness(
        &mut self,
        meshes: &mut dyn MeshStorage,
        flatness: f32,
    ) -> Result<(), TerrainError> {
        let height_factor = self.parameters().height_factor();
        self.set_parameters(meshes, height_factor, flatness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_parameters_pass_through() {
        assert_eq!(check_parameters(30.0, 3.0), (30.0, 3.0));
        assert_eq!(check_tessellation_level(12.0), 12.0);
    }

    #[test]
    fn non_positive_parameters_clamp_to_epsilon() {
        let _ = env_logger::builder().is_test(true).try_init();

        assert_eq!(check_parameters(0.0, -2.0), (f32::EPSILON, f32::EPSILON));
        assert_eq!(check_parameters(-1.0, 2.0), (f32::EPSILON, 2.0));
        assert_eq!(check_parameters(f32::NAN, 2.0).0, f32::EPSILON);
        assert_eq!(check_tessellation_level(0.0), f32::EPSILON);
    }

    #[test]
    fn inverse_flatness_tracks_flatness() {
        let params = TerrainParameters::new(4, 4, 10.0, 4.0);
        assert_eq!(params.inv_flatness(), 0.25);
        let params = params.with_shape(10.0, 0.5);
        assert_eq!(params.inv_flatness(), 2.0);
        assert_eq!((params.width(), params.depth()), (4, 4));
    }

    #[test]
    fn remap_to_same_curve_is_identity() {
        let params = TerrainParameters::new(8, 8, 30.0, 3.0);
        for &h in &[0.0, 0.5, 7.25, 29.99, 30.0] {
            let remapped = remap_height(h, &params, &params);
            assert!((remapped - h).abs() <= 1e-4 * h.max(1.0), "{} -> {}", h, remapped);
        }
    }

    #[test]
    fn remap_round_trip_restores_heights() {
        let a = TerrainParameters::new(8, 8, 30.0, 3.0);
        let b = TerrainParameters::new(8, 8, 5.0, 0.7);
        for i in 0..=20 {
            let noise = i as f32 / 20.0;
            let h = a.shape(noise);
            let back = remap_height(remap_height(h, &a, &b), &b, &a);
            assert!((back - h).abs() < 1e-3, "{} -> {}", h, back);
        }
    }

    #[test]
    fn zero_height_stays_zero() {
        let a = TerrainParameters::new(2, 2, 10.0, 2.0);
        let b = TerrainParameters::new(2, 2, 3.0, 0.3);
        assert_eq!(remap_height(0.0, &a, &b), 0.0);
        assert_eq!(a.normalized_height(0.0), 0.0);
    }
}
