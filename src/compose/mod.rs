//! Image compositor: one quote and one target size in, one e-ink ready raster out.
//!
//! The pipeline runs four stages in order, each a pure function of its input:
//!
//! 1. [`canvas`]: decode the background and scale/crop it to exactly fill the frame
//! 2. [`contrast`]: stretch and posterize for the panel (idempotent)
//! 3. [`text`]: lay out quote, title and author with a fixed, integer-only policy
//! 4. [`quantize`]: optionally map to a fixed palette, only when asked for
//!
//! The compositor holds no mutable state, so one instance can be shared across
//! threads and called concurrently.
//!
//! # Example
//!
//! ```rust,ignore
//! use ditto::compose::{Compositor, LayoutConfig};
//!
//! let compositor = Compositor::new(LayoutConfig::default())?;
//! let rendered = compositor.compose(&quote, 800, 480, None)?;
//! let png = rendered.to_png()?;
//! ```

pub mod canvas;
pub mod contrast;
pub mod quantize;
pub mod text;

use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::quote::Quote;
use crate::MAX_DIMENSION;

pub use quantize::{parse_hex_color, Palette};
use text::{TextBlock, TextStyle, GLYPH_SIZE};

/// Layout and tone parameters.
///
/// Band sizes are fractions of the canvas so one configuration serves every
/// panel resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Margin on every side, as a fraction of width (left/right) and height (top/bottom)
    pub padding: f32,
    /// Height of the quote region, as a fraction of canvas height
    pub quote_height: f32,
    /// Height of the title band
    pub title_height: f32,
    /// Height of the author band
    pub author_height: f32,
    /// Text fill color (hex)
    pub text_color: String,
    /// Text outline color (hex)
    pub stroke_color: String,
    /// Smallest glyph scale the quote may shrink to before failing
    pub min_scale: u32,
    /// Largest glyph scale tried for the quote
    pub max_scale: u32,
    /// Pixels between quote lines
    pub line_spacing: u32,
    /// Background blur radius, 0 disables
    pub blur_sigma: f32,
    /// Intensity levels per channel after contrast normalization
    pub contrast_levels: u32,
    /// Drop trailing sentences instead of failing when a quote cannot fit
    pub truncate_at_sentence: bool,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            padding: 0.025,
            quote_height: 0.775,
            title_height: 0.075,
            author_height: 0.05,
            text_color: "#ffffff".to_string(),
            stroke_color: "#000000".to_string(),
            min_scale: 2,
            max_scale: 12,
            line_spacing: 4,
            blur_sigma: 4.0,
            contrast_levels: 16,
            truncate_at_sentence: false,
        }
    }
}

impl LayoutConfig {
    /// Check that the bands fit on the canvas and the colors parse.
    pub fn validate(&self) -> Result<(), Error> {
        let fractions = [
            ("padding", self.padding),
            ("quote_height", self.quote_height),
            ("title_height", self.title_height),
            ("author_height", self.author_height),
        ];
        for (name, value) in fractions {
            if !(0.0..1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "layout.{} must be in [0, 1), got {}",
                    name, value
                )));
            }
        }
        let total = 2.0 * self.padding + self.quote_height + self.title_height + self.author_height;
        if total > 1.0 + f32::EPSILON {
            return Err(Error::Config(format!(
                "layout bands take {:.3} of the canvas height",
                total
            )));
        }
        if self.min_scale == 0 || self.min_scale > self.max_scale {
            return Err(Error::Config(format!(
                "layout scales must satisfy 1 <= min_scale <= max_scale, got {}..={}",
                self.min_scale, self.max_scale
            )));
        }
        if self.contrast_levels < 2 {
            return Err(Error::Config("layout.contrast_levels must be at least 2".to_string()));
        }
        parse_hex_color(&self.text_color)?;
        parse_hex_color(&self.stroke_color)?;
        Ok(())
    }
}

/// A composed frame at exactly the requested size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    /// Quote the frame shows
    pub quote_id: String,
    /// Pixels
    pub image: RgbImage,
    /// Palette the frame was quantized to, if any
    pub palette: Option<String>,
}

impl RenderedImage {
    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Encode as PNG.
    pub fn to_png(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| Error::Encode(e.to_string()))?;
        Ok(bytes)
    }
}

/// Renders quotes onto their backgrounds.
#[derive(Debug, Clone)]
pub struct Compositor {
    layout: LayoutConfig,
    text_color: Rgb<u8>,
    stroke_color: Rgb<u8>,
}

impl Compositor {
    /// Create a compositor. Fails with [`Error::Config`] on an invalid layout.
    pub fn new(layout: LayoutConfig) -> Result<Self, Error> {
        layout.validate()?;
        Ok(Self {
            text_color: parse_hex_color(&layout.text_color)?,
            stroke_color: parse_hex_color(&layout.stroke_color)?,
            layout,
        })
    }

    /// Active layout.
    pub fn layout(&self) -> &LayoutConfig {
        &self.layout
    }

    /// Render `quote` at `width` x `height`, optionally quantized to `palette`.
    pub fn compose(
        &self,
        quote: &Quote,
        width: u32,
        height: u32,
        palette: Option<&Palette>,
    ) -> Result<RenderedImage, Error> {
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(Error::InvalidDimensions {
                width: i64::from(width),
                height: i64::from(height),
            });
        }

        let background = canvas::decode(&quote.id, quote.background.as_deref())?;
        let mut image = canvas::fill(&background, width, height);
        image = canvas::soften(image, self.layout.blur_sigma);
        contrast::normalize(&mut image, self.layout.contrast_levels);

        self.draw_text(&mut image, quote)?;

        if let Some(palette) = palette {
            palette.apply(&mut image);
        }

        tracing::debug!(
            quote_id = %quote.id,
            width,
            height,
            palette = palette.map(Palette::name),
            "Composed quote image"
        );
        Ok(RenderedImage {
            quote_id: quote.id.clone(),
            image,
            palette: palette.map(Palette::cache_key),
        })
    }

    fn draw_text(&self, image: &mut RgbImage, quote: &Quote) -> Result<(), Error> {
        let (width, height) = (image.width(), image.height());
        let layout = &self.layout;
        let pad_x = (width as f32 * layout.padding) as u32;
        let pad_y = (height as f32 * layout.padding) as u32;
        let inner_width = width.saturating_sub(2 * pad_x);
        let quote_region = (height as f32 * layout.quote_height) as u32;
        let title_band = (height as f32 * layout.title_height) as u32;
        let author_band = (height as f32 * layout.author_height) as u32;

        let body = text::normalize(&quote.text);
        let block = self.fit_quote(&quote.id, &body, inner_width, quote_region)?;

        let style = self.style_for(block.scale);
        let line_height = GLYPH_SIZE * block.scale;
        let mut y = i64::from(pad_y) + i64::from(quote_region.saturating_sub(block.height(layout.line_spacing)) / 2);
        for line in &block.lines {
            let x = (i64::from(width) - i64::from(text::line_width(line, block.scale))) / 2;
            text::draw_line(image, line, x, y, block.scale, &style);
            y += i64::from(line_height + layout.line_spacing);
        }

        // Title sits directly above the author band, both flush right
        let right = i64::from(width - pad_x);
        let author_bottom = i64::from(height - pad_y);
        let title_bottom = author_bottom - i64::from(author_band);

        let title = text::normalize(&quote.title);
        self.draw_band(image, &title, right, title_bottom, inner_width, title_band);

        let author = format!("- {}", text::normalize(&quote.author));
        self.draw_band(image, &author, right, author_bottom, inner_width, author_band);
        Ok(())
    }

    fn fit_quote(
        &self,
        quote_id: &str,
        body: &str,
        max_width: u32,
        max_height: u32,
    ) -> Result<TextBlock, Error> {
        let layout = &self.layout;
        let mut candidate = body.to_string();
        loop {
            if let Some(block) = text::fit_block(
                &candidate,
                max_width,
                max_height,
                layout.min_scale,
                layout.max_scale,
                layout.line_spacing,
            ) {
                return Ok(block);
            }
            if !layout.truncate_at_sentence {
                break;
            }
            match candidate.trim_end_matches('.').rfind(". ") {
                Some(end) => {
                    candidate.truncate(end + 1);
                    tracing::warn!(
                        quote_id,
                        kept_chars = candidate.len(),
                        "Quote too long, dropped trailing sentence"
                    );
                }
                None => break,
            }
        }
        Err(Error::QuoteTooLong(quote_id.to_string()))
    }

    /// Draw one right-aligned line whose bottom edge sits at `bottom`.
    ///
    /// Skipped (not an error) when the band is too small for any scale.
    fn draw_band(
        &self,
        image: &mut RgbImage,
        line: &str,
        right: i64,
        bottom: i64,
        max_width: u32,
        band_height: u32,
    ) {
        let tallest = band_height / GLYPH_SIZE;
        let Some(scale) = text::fit_line(line, max_width, 1, tallest.min(self.layout.max_scale))
        else {
            tracing::debug!(line, band_height, "Band too small, skipping line");
            return;
        };
        let x = right - i64::from(text::line_width(line, scale));
        let y = bottom - i64::from(GLYPH_SIZE * scale);
        text::draw_line(image, line, x, y, scale, &self.style_for(scale));
    }

    fn style_for(&self, scale: u32) -> TextStyle {
        TextStyle {
            fill: self.text_color,
            stroke: self.stroke_color,
            stroke_width: (scale / 2).clamp(1, 3),
        }
    }
}
