//! Fixed-palette quantization with optional Floyd–Steinberg dithering.
//!
//! Off by default: most panels quantize on their own. Engaged per request for
//! displays that need exact palette colors.

use std::str::FromStr;

use image::{Rgb, RgbImage};
use palette::Srgb;

use crate::error::Error;

/// An ordered set of reproducible display colors.
///
/// # Example
///
/// ```
/// use ditto::compose::Palette;
///
/// let inky = Palette::parse("inky7").unwrap();
/// assert_eq!(inky.colors().len(), 7);
///
/// let custom = Palette::parse("#000000, #ffffff, #ff0000").unwrap();
/// assert_eq!(custom.colors().len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    name: String,
    colors: Vec<Rgb<u8>>,
    dither: bool,
}

impl Palette {
    /// Create a palette. Fails when `colors` is empty.
    pub fn new(name: impl Into<String>, colors: Vec<Rgb<u8>>) -> Result<Self, Error> {
        if colors.is_empty() {
            return Err(Error::Config("palette must contain at least one color".to_string()));
        }
        Ok(Self {
            name: name.into(),
            colors,
            dither: true,
        })
    }

    /// Pure black and white.
    pub fn black_white() -> Self {
        Self::preset("bw", &[[0, 0, 0], [255, 255, 255]])
    }

    /// Four evenly spaced grays.
    pub fn gray4() -> Self {
        Self::preset("gray4", &[[0, 0, 0], [85, 85, 85], [170, 170, 170], [255, 255, 255]])
    }

    /// The seven inks of an Inky Frame color panel.
    pub fn inky7() -> Self {
        Self::preset(
            "inky7",
            &[
                [0, 0, 0],
                [255, 255, 255],
                [0, 255, 0],
                [0, 0, 255],
                [255, 0, 0],
                [255, 255, 0],
                [255, 140, 0],
            ],
        )
    }

    fn preset(name: &str, colors: &[[u8; 3]]) -> Self {
        Self {
            name: name.to_string(),
            colors: colors.iter().copied().map(Rgb).collect(),
            dither: true,
        }
    }

    /// Parse a preset name (`bw`, `gray4`, `inky7`) or a comma-separated list
    /// of hex colors.
    pub fn parse(spec: &str) -> Result<Self, Error> {
        let spec = spec.trim();
        match spec.to_lowercase().as_str() {
            "bw" | "mono" => return Ok(Self::black_white()),
            "gray4" | "grey4" => return Ok(Self::gray4()),
            "inky7" | "inky" => return Ok(Self::inky7()),
            _ => {}
        }
        let colors = spec
            .split(',')
            .map(parse_hex_color)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(spec.replace(' ', ""), colors)
    }

    /// Enable or disable error-diffusion dithering (on by default).
    #[must_use]
    pub fn with_dither(mut self, dither: bool) -> Self {
        self.dither = dither;
        self
    }

    /// Palette name, or the normalized color list for custom palettes.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Palette colors in order.
    pub fn colors(&self) -> &[Rgb<u8>] {
        &self.colors
    }

    /// Whether dithering is enabled.
    pub fn dither(&self) -> bool {
        self.dither
    }

    /// Identifies this palette and dithering mode in cache keys.
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.name, if self.dither { "dither" } else { "flat" })
    }

    /// Index of the nearest palette color by squared Euclidean RGB distance.
    /// Ties go to the earlier entry.
    pub fn nearest(&self, rgb: [f32; 3]) -> usize {
        let mut best = 0;
        let mut best_distance = f32::INFINITY;
        for (i, color) in self.colors.iter().enumerate() {
            let distance: f32 = (0..3)
                .map(|c| {
                    let d = rgb[c] - f32::from(color.0[c]);
                    d * d
                })
                .sum();
            if distance < best_distance {
                best = i;
                best_distance = distance;
            }
        }
        best
    }

    /// Map every pixel of `image` to a palette color.
    pub fn apply(&self, image: &mut RgbImage) {
        if self.dither {
            self.apply_dithered(image);
        } else {
            for pixel in image.pixels_mut() {
                let rgb = pixel.0.map(f32::from);
                *pixel = self.colors[self.nearest(rgb)];
            }
        }
    }

    fn apply_dithered(&self, image: &mut RgbImage) {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let mut buffer: Vec<[f32; 3]> = image.pixels().map(|p| p.0.map(f32::from)).collect();

        for y in 0..height {
            for x in 0..width {
                let i = y * width + x;
                let old = buffer[i].map(|v| v.clamp(0.0, 255.0));
                let color = self.colors[self.nearest(old)];
                let error = [
                    old[0] - f32::from(color.0[0]),
                    old[1] - f32::from(color.0[1]),
                    old[2] - f32::from(color.0[2]),
                ];
                image.put_pixel(x as u32, y as u32, color);

                let mut spread = |dx: isize, dy: usize, weight: f32| {
                    let nx = x as isize + dx;
                    let ny = y + dy;
                    if nx < 0 || nx as usize >= width || ny >= height {
                        return;
                    }
                    let target = &mut buffer[ny * width + nx as usize];
                    for c in 0..3 {
                        target[c] += error[c] * weight;
                    }
                };
                spread(1, 0, 7.0 / 16.0);
                spread(-1, 1, 3.0 / 16.0);
                spread(0, 1, 5.0 / 16.0);
                spread(1, 1, 1.0 / 16.0);
            }
        }
    }
}

/// Parse `#rrggbb`, `rrggbb`, `#rgb` or `rgb`.
pub fn parse_hex_color(value: &str) -> Result<Rgb<u8>, Error> {
    let value = value.trim();
    let color = Srgb::<u8>::from_str(value)
        .map_err(|e| Error::Config(format!("invalid color '{}': {}", value, e)))?;
    Ok(Rgb([color.red, color.green, color.blue]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 255 / width) as u8, (y * 255 / height) as u8, 128])
        })
    }

    #[test]
    fn test_parse_presets() {
        assert_eq!(Palette::parse("bw").unwrap(), Palette::black_white());
        assert_eq!(Palette::parse(" INKY7 ").unwrap(), Palette::inky7());
        assert_eq!(Palette::parse("gray4").unwrap().colors().len(), 4);
    }

    #[test]
    fn test_parse_custom() {
        let palette = Palette::parse("#000000, ffffff,#f00").unwrap();
        assert_eq!(
            palette.colors(),
            &[Rgb([0, 0, 0]), Rgb([255, 255, 255]), Rgb([255, 0, 0])]
        );
        assert!(Palette::parse("#zzzzzz").is_err());
        assert!(Palette::parse("").is_err());
    }

    #[test]
    fn test_nearest() {
        let palette = Palette::black_white();
        assert_eq!(palette.nearest([10.0, 10.0, 10.0]), 0);
        assert_eq!(palette.nearest([200.0, 200.0, 200.0]), 1);
    }

    #[test]
    fn test_apply_uses_only_palette_colors() {
        for dither in [false, true] {
            let palette = Palette::inky7().with_dither(dither);
            let mut img = gradient(64, 48);
            palette.apply(&mut img);
            assert!(img.pixels().all(|p| palette.colors().contains(p)));
        }
    }

    #[test]
    fn test_dithering_mixes_colors_for_midtones() {
        let mut img = RgbImage::from_pixel(16, 16, Rgb([128, 128, 128]));
        Palette::black_white().apply(&mut img);
        let blacks = img.pixels().filter(|p| p.0 == [0, 0, 0]).count();
        assert!(blacks > 64 && blacks < 192);
    }

    #[test]
    fn test_flat_quantization_of_midtone() {
        let mut img = RgbImage::from_pixel(4, 4, Rgb([100, 100, 100]));
        Palette::black_white().with_dither(false).apply(&mut img);
        assert!(img.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn test_cache_key_distinguishes_dither() {
        let a = Palette::inky7();
        let b = Palette::inky7().with_dither(false);
        assert_ne!(a.cache_key(), b.cache_key());
    }
}
