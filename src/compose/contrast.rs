//! Contrast normalization for e-ink panels.
//!
//! Stretches the darkest and brightest channel values to 0 and 255, then snaps
//! every channel onto `levels` evenly spaced intensities. After one pass the
//! image already spans 0..=255 and holds only level values, so running the
//! stage again changes nothing.

use image::RgbImage;

/// Normalize `image` in place.
///
/// `levels` is clamped to `2..=256`; 256 keeps every intensity and only
/// stretches.
pub fn normalize(image: &mut RgbImage, levels: u32) {
    let Some((lo, hi)) = channel_range(image) else {
        return;
    };
    let lut = lookup_table(lo, hi, levels.clamp(2, 256));
    for pixel in image.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            *channel = lut[*channel as usize];
        }
    }
}

fn channel_range(image: &RgbImage) -> Option<(u8, u8)> {
    image
        .pixels()
        .flat_map(|p| p.0)
        .fold(None, |range, v| match range {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

fn lookup_table(lo: u8, hi: u8, levels: u32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    let (lo, hi) = (u32::from(lo), u32::from(hi));
    for (value, out) in lut.iter_mut().enumerate() {
        let v = (value as u32).clamp(lo, hi);
        let stretched = if hi > lo {
            ((v - lo) * 255 + (hi - lo) / 2) / (hi - lo)
        } else {
            v
        };
        *out = quantize(stretched, levels) as u8;
    }
    lut
}

/// Snap `value` (0..=255) to the nearest of `levels` evenly spaced intensities.
fn quantize(value: u32, levels: u32) -> u32 {
    if levels >= 256 {
        return value;
    }
    let steps = levels - 1;
    let k = (value * steps + 127) / 255;
    (k * 255 + steps / 2) / steps
}
