//! Text layout and rasterization with the built-in 8x8 bitmap font.
//!
//! Every glyph is an 8x8 cell scaled by an integer factor, so layout is pure
//! integer arithmetic and the same text at the same size always lands on the
//! same pixels.

use font8x8::legacy::BASIC_LEGACY;
use font8x8::{UnicodeFonts, BASIC_FONTS, GREEK_FONTS, LATIN_FONTS};
use image::{Rgb, RgbImage};

/// Glyph cell size in pixels at scale 1.
pub const GLYPH_SIZE: u32 = 8;

const FALLBACK_GLYPH: [u8; 8] = BASIC_LEGACY['?' as usize];

/// Fill and outline colors for one run of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextStyle {
    /// Glyph color
    pub fill: Rgb<u8>,
    /// Outline color
    pub stroke: Rgb<u8>,
    /// Outline thickness in pixels, 0 for none
    pub stroke_width: u32,
}

/// Wrapped lines at a chosen scale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBlock {
    /// One entry per rendered line
    pub lines: Vec<String>,
    /// Integer glyph scale
    pub scale: u32,
}

impl TextBlock {
    /// Total height including `spacing` between lines.
    pub fn height(&self, spacing: u32) -> u32 {
        let n = self.lines.len() as u32;
        n * GLYPH_SIZE * self.scale + n.saturating_sub(1) * spacing
    }
}

/// Replace typographic punctuation the bitmap font lacks with ASCII
/// equivalents and collapse runs of whitespace.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{2018}' | '\u{2019}' | '\u{201a}' | '\u{2032}' => out.push('\''),
            '\u{201c}' | '\u{201d}' | '\u{201e}' | '\u{2033}' => out.push('"'),
            '\u{2013}' | '\u{2014}' | '\u{2212}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            _ => out.push(c),
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Width in pixels of a single line at `scale`.
pub fn line_width(text: &str, scale: u32) -> u32 {
    text.chars().count() as u32 * GLYPH_SIZE * scale
}

/// Greedy word wrap to at most `max_chars` characters per line.
///
/// Words longer than a whole line are split across lines.
pub fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    if max_chars == 0 {
        return lines;
    }

    let mut current = String::new();
    let mut current_len = 0;
    for word in text.split_whitespace() {
        let chars: Vec<char> = word.chars().collect();
        for chunk in chars.chunks(max_chars) {
            let chunk_len = chunk.len();
            if current_len == 0 {
                current.extend(chunk);
                current_len = chunk_len;
            } else if current_len + 1 + chunk_len <= max_chars {
                current.push(' ');
                current.extend(chunk);
                current_len += 1 + chunk_len;
            } else {
                lines.push(std::mem::take(&mut current));
                current.extend(chunk);
                current_len = chunk_len;
            }
        }
    }
    if current_len > 0 {
        lines.push(current);
    }
    lines
}

/// Find the largest scale in `min_scale..=max_scale` at which `text` wraps
/// into a `max_width` x `max_height` box.
///
/// Scales that would have to split a word are only used when no scale fits
/// with whole words.
pub fn fit_block(
    text: &str,
    max_width: u32,
    max_height: u32,
    min_scale: u32,
    max_scale: u32,
    spacing: u32,
) -> Option<TextBlock> {
    let longest_word = text
        .split_whitespace()
        .map(|w| w.chars().count())
        .max()
        .unwrap_or(0);

    for allow_split in [false, true] {
        for scale in (min_scale.max(1)..=max_scale).rev() {
            let max_chars = (max_width / (GLYPH_SIZE * scale)) as usize;
            if max_chars == 0 || (!allow_split && max_chars < longest_word) {
                continue;
            }
            let block = TextBlock {
                lines: wrap(text, max_chars),
                scale,
            };
            let height = block.height(spacing);
            if height > max_height {
                tracing::trace!(scale, height, max_height, "Text block too tall");
                continue;
            }
            tracing::debug!(
                scale,
                lines = block.lines.len(),
                split_words = allow_split,
                "Fit text block"
            );
            return Some(block);
        }
    }
    None
}

/// Largest scale in `min_scale..=max_scale` at which `text` fits on one line.
pub fn fit_line(text: &str, max_width: u32, min_scale: u32, max_scale: u32) -> Option<u32> {
    (min_scale.max(1)..=max_scale)
        .rev()
        .find(|&scale| line_width(text, scale) <= max_width)
}

/// Draw one line with its top-left corner at `(x, y)`. Pixels outside the
/// image are clipped.
pub fn draw_line(image: &mut RgbImage, text: &str, x: i64, y: i64, scale: u32, style: &TextStyle) {
    let glyphs: Vec<[u8; 8]> = text.chars().map(glyph).collect();

    // Outline first so neighbouring glyphs never paint over each other's fill
    if style.stroke_width > 0 {
        let grow = i64::from(style.stroke_width);
        for_each_cell(&glyphs, x, y, scale, |cx, cy, size| {
            fill_rect(image, cx - grow, cy - grow, size + 2 * grow, style.stroke);
        });
    }
    for_each_cell(&glyphs, x, y, scale, |cx, cy, size| {
        fill_rect(image, cx, cy, size, style.fill);
    });
}

fn glyph(c: char) -> [u8; 8] {
    BASIC_FONTS
        .get(c)
        .or_else(|| LATIN_FONTS.get(c))
        .or_else(|| GREEK_FONTS.get(c))
        .unwrap_or(FALLBACK_GLYPH)
}

/// Visit every set font pixel as a `size` x `size` cell.
fn for_each_cell(
    glyphs: &[[u8; 8]],
    x: i64,
    y: i64,
    scale: u32,
    mut visit: impl FnMut(i64, i64, i64),
) {
    let size = i64::from(scale);
    let advance = i64::from(GLYPH_SIZE) * size;
    for (i, rows) in glyphs.iter().enumerate() {
        let gx = x + i as i64 * advance;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..8i64 {
                // Bit 0 is the leftmost pixel
                if bits & (1u8 << col) != 0 {
                    visit(gx + col * size, y + row as i64 * size, size);
                }
            }
        }
    }
}

fn fill_rect(image: &mut RgbImage, x: i64, y: i64, size: i64, color: Rgb<u8>) {
    let (width, height) = (i64::from(image.width()), i64::from(image.height()));
    let (x0, y0) = (x.max(0), y.max(0));
    let (x1, y1) = ((x + size).min(width), (y + size).min(height));
    for py in y0..y1 {
        for px in x0..x1 {
            image.put_pixel(px as u32, py as u32, color);
        }
    }
}
