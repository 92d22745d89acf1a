//! Raster maps derived from a terrain grid.
//!
//! Every map has one pixel per grid vertex and is recomputed wholesale from the current
//! vertex buffer. Rows are processed in parallel; a pixel only reads finalized vertices.

use engine_core::Vertex;
use glam::Vec2;
use image::{Rgb32FImage, RgbImage};
use rayon::prelude::*;

use crate::params::TerrainParameters;

pub const WATER_COLOR: [u8; 3] = [0, 0, 255];
pub const GRASS_COLOR: [u8; 3] = [62, 126, 0];
pub const GROUND_COLOR: [u8; 3] = [157, 110, 94];
pub const ROCK_COLOR: [u8; 3] = [127, 127, 127];
pub const SNOW_COLOR: [u8; 3] = [255, 255, 255];

fn lerp_color(from: [u8; 3], to: [u8; 3], coeff: f32) -> [u8; 3] {
    let coeff = coeff.clamp(0.0, 1.0);
    std::array::from_fn(|i| {
        let (a, b) = (from[i] as f32, to[i] as f32);
        (a + (b - a) * coeff).round() as u8
    })
}

/// Color of a normalized elevation `t ∈ [0, 1]`.
///
/// ```text
/// water ─ 0.33 ─ grass ─ 0.5 ─ ground ─ 0.66 ─ rock ─ snow
/// ```
pub fn band_color(t: f32) -> [u8; 3] {
    if t < 0.33 {
        lerp_color(WATER_COLOR, GRASS_COLOR, t * 3.0)
    } else if t < 0.5 {
        lerp_color(GRASS_COLOR, GROUND_COLOR, (t - 0.33) * 5.75)
    } else if t < 0.66 {
        lerp_color(GROUND_COLOR, ROCK_COLOR, (t - 0.5) * 6.0)
    } else {
        lerp_color(ROCK_COLOR, SNOW_COLOR, (t - 0.66) * 3.0)
    }
}

/// Slope from the four axis neighbours: normalized direction in `xy`, strength in `z`.
///
/// A flat neighbourhood yields a zero direction.
#[inline]
pub fn slope_at(top: f32, bottom: f32, left: f32, right: f32) -> [f32; 3] {
    let slope = Vec2::new(left - right, top - bottom);
    let strength = slope.length() * 0.5;
    let direction = slope.normalize_or_zero();
    [direction.x, direction.y, strength]
}

/// Elevation-banded RGB8 color map.
pub fn compute_color_map(vertices: &[Vertex], params: &TerrainParameters) -> RgbImage {
    debug_assert_eq!(vertices.len(), params.vertex_count());

    let mut image = RgbImage::new(params.width(), params.depth());
    let pixels: &mut [u8] = &mut image;

    pixels
        .par_chunks_mut(3)
        .zip(vertices.par_iter())
        .for_each(|(pixel, vertex)| {
            let t = params.normalized_height(vertex.height());
            pixel.copy_from_slice(&band_color(t));
        });

    image
}

/// Visualization of the vertex normals: positive components scaled to `[0, 255]`.
///
/// Negative components are clamped to 0, so this is not a signed normal map encoding.
pub fn compute_normal_map(vertices: &[Vertex], width: u32, depth: u32) -> RgbImage {
    debug_assert_eq!(vertices.len(), width as usize * depth as usize);

    let mut image = RgbImage::new(width, depth);
    let pixels: &mut [u8] = &mut image;

    pixels
        .par_chunks_mut(3)
        .zip(vertices.par_iter())
        .for_each(|(pixel, vertex)| {
            for (channel, component) in pixel.iter_mut().zip(vertex.normal) {
                *channel = (component.max(0.0) * 255.0) as u8;
            }
        });

    image
}

/// Per-pixel slope `(direction.x, direction.y, strength)`; the outer ring stays zero.
pub fn compute_slope_map(vertices: &[Vertex], width: u32, depth: u32) -> Rgb32FImage {
    debug_assert_eq!(vertices.len(), width as usize * depth as usize);

    let mut image = Rgb32FImage::new(width, depth);
    let (w, d) = (width as usize, depth as usize);
    if w < 3 || d < 3 {
        return image;
    }

    let pixels: &mut [f32] = &mut image;
    pixels
        .par_chunks_mut(w * 3)
        .enumerate()
        .skip(1)
        .take(d - 2)
        .for_each(|(j, row)| {
            for i in 1..w - 1 {
                let top = vertices[(j - 1) * w + i].height();
                let left = vertices[j * w + i - 1].height();
                let right = vertices[j * w + i + 1].height();
                let bottom = vertices[(j + 1) * w + i].height();

                row[i * 3..i * 3 + 3].copy_from_slice(&slope_at(top, bottom, left, right));
            }
        });

    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn grid(width: u32, depth: u32, height: impl Fn(u32, u32) -> f32) -> Vec<Vertex> {
        (0..depth)
            .flat_map(|j| (0..width).map(move |i| (i, j)))
            .map(|(i, j)| {
                Vertex::new(Vec3::new(i as f32, height(i, j), j as f32), Vec2::ZERO, Vec3::ZERO, Vec3::ZERO)
            })
            .collect()
    }

    #[test]
    fn palette_boundaries() {
        assert_eq!(band_color(0.0), WATER_COLOR);
        assert_eq!(band_color(1.0), SNOW_COLOR);
        assert_eq!(band_color(0.33), GRASS_COLOR);
        assert_eq!(band_color(0.5), GROUND_COLOR);
        assert_eq!(band_color(0.66), ROCK_COLOR);
    }

    #[test]
    fn band_color_interpolates_within_band() {
        let mid = band_color(0.165);
        assert_eq!(mid, [31, 62, 129]);
    }

    #[test]
    fn color_map_inverts_height_curve() {
        let params = TerrainParameters::new(2, 1, 10.0, 2.0);
        let vertices = grid(2, 1, |i, _| if i == 0 { 0.0 } else { 10.0 });
        let map = compute_color_map(&vertices, &params);
        assert_eq!(map.get_pixel(0, 0).0, WATER_COLOR);
        assert_eq!(map.get_pixel(1, 0).0, SNOW_COLOR);
    }

    #[test]
    fn normal_map_clamps_negative_components() {
        let mut vertices = grid(1, 1, |_, _| 0.0);
        vertices[0].normal = [-0.6, 0.8, 0.0];
        let map = compute_normal_map(&vertices, 1, 1);
        assert_eq!(map.get_pixel(0, 0).0, [0, 204, 0]);
    }

    #[test]
    fn slope_map_leaves_border_at_zero() {
        let vertices = grid(4, 4, |i, j| (i * i + j) as f32);
        let map = compute_slope_map(&vertices, 4, 4);

        for j in 0..4 {
            for i in 0..4 {
                let pixel = map.get_pixel(i, j).0;
                if i == 0 || j == 0 || i == 3 || j == 3 {
                    assert_eq!(pixel, [0.0; 3]);
                } else {
                    assert!(pixel[2] > 0.0);
                    let dir = Vec2::new(pixel[0], pixel[1]);
                    assert!((dir.length() - 1.0).abs() < 1e-5);
                }
            }
        }

        // (1,1): left 1, right 5, top 1, bottom 3
        let [x, y, strength] = map.get_pixel(1, 1).0;
        let expected = Vec2::new(-4.0, -2.0);
        assert!((strength - expected.length() * 0.5).abs() < 1e-5);
        assert!((x - expected.normalize().x).abs() < 1e-5);
        assert!((y - expected.normalize().y).abs() < 1e-5);
    }

    #[test]
    fn flat_slope_has_zero_direction() {
        assert_eq!(slope_at(1.0, 1.0, 1.0, 1.0), [0.0, 0.0, 0.0]);
    }
}
