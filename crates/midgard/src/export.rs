//! PNG export of the generated maps.

use anyhow::{Context, Result};
use engine_core::{TextureData, TextureFormat};
use image::{Rgb, Rgb32FImage, RgbImage};
use std::path::Path;

fn unorm_to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Slope direction is signed and the strength unbounded; both are squeezed into `[0, 255]`.
fn encode_slope(slope: &[f32]) -> [u8; 3] {
    [
        unorm_to_u8(slope[0] * 0.5 + 0.5),
        unorm_to_u8(slope[1] * 0.5 + 0.5),
        unorm_to_u8(slope[2]),
    ]
}

pub fn slope_to_rgb(slope: &Rgb32FImage) -> RgbImage {
    RgbImage::from_fn(slope.width(), slope.height(), |x, y| {
        Rgb(encode_slope(&slope.get_pixel(x, y).0))
    })
}

/// Convert a readback to RGB8: heights as greyscale, colors as-is, slopes encoded.
pub fn texture_to_rgb(data: &TextureData) -> RgbImage {
    RgbImage::from_fn(data.width, data.height, |x, y| {
        let texel = data.texel(x, y);
        Rgb(match data.format {
            TextureFormat::R32Float => [unorm_to_u8(texel[0]); 3],
            TextureFormat::Rgba8Unorm => [
                unorm_to_u8(texel[0]),
                unorm_to_u8(texel[1]),
                unorm_to_u8(texel[2]),
            ],
            TextureFormat::Rgba32Float => encode_slope(texel),
        })
    })
}

pub fn save_png(image: &RgbImage, dir: &Path, name: &str) -> Result<()> {
    let path = dir.join(name);
    image
        .save(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    log::info!("Saved {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slope_encoding_centres_zero_direction() {
        assert_eq!(encode_slope(&[0.0, 0.0, 0.0]), [128, 128, 0]);
        assert_eq!(encode_slope(&[-1.0, 1.0, 4.0]), [0, 255, 255]);
    }

    #[test]
    fn texture_conversion_follows_format() {
        let heights = TextureData {
            width: 2,
            height: 1,
            format: TextureFormat::R32Float,
            texels: vec![0.0, 1.0],
        };
        let image = texture_to_rgb(&heights);
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(image.get_pixel(1, 0).0, [255, 255, 255]);

        let colors = TextureData {
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8Unorm,
            texels: vec![62.0 / 255.0, 126.0 / 255.0, 0.0, 1.0],
        };
        assert_eq!(texture_to_rgb(&colors).get_pixel(0, 0).0, [62, 126, 0]);
    }

    #[test]
    fn float_slope_map_is_encoded() {
        let mut slope = Rgb32FImage::new(2, 2);
        slope.put_pixel(1, 1, Rgb([1.0, 0.0, 0.5]));
        let image = slope_to_rgb(&slope);
        assert_eq!(image.get_pixel(0, 0).0, [128, 128, 0]);
        assert_eq!(image.get_pixel(1, 1).0, [255, 128, 128]);
    }
}
