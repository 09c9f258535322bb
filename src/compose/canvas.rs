//! Canvas sizing: decode the background and fill the requested frame.

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};

use crate::error::Error;

/// Decode an encoded background image.
pub fn decode(quote_id: &str, bytes: Option<&[u8]>) -> Result<DynamicImage, Error> {
    let bytes = bytes.filter(|b| !b.is_empty()).ok_or_else(|| Error::AssetUnavailable {
        quote_id: quote_id.to_string(),
        reason: "quote has no background image".to_string(),
    })?;

    image::load_from_memory(bytes).map_err(|e| Error::AssetUnavailable {
        quote_id: quote_id.to_string(),
        reason: e.to_string(),
    })
}

/// Scale `background` to cover exactly `width` x `height`, preserving aspect
/// ratio and cropping the overflow evenly from both sides of the dominant axis.
pub fn fill(background: &DynamicImage, width: u32, height: u32) -> RgbImage {
    tracing::debug!(
        src_width = background.width(),
        src_height = background.height(),
        width,
        height,
        "Filling canvas"
    );
    background
        .resize_to_fill(width, height, FilterType::Triangle)
        .to_rgb8()
}

/// Soften the background so the text stays legible. `sigma <= 0` is a no-op.
pub fn soften(canvas: RgbImage, sigma: f32) -> RgbImage {
    if sigma <= 0.0 {
        return canvas;
    }
    imageops::blur(&canvas, sigma)
}
