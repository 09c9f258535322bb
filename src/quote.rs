//! Quote records as held by the quote store.

use serde::{Deserialize, Serialize};

/// Placeholder used when the source leaves a title or author empty.
pub const UNKNOWN: &str = "Unknown";

/// A single quote and its display metadata.
///
/// Quotes are written only by the sync job. Everything else treats them as
/// read-only snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Stable identity from the content source
    pub id: String,

    /// Quote body
    pub text: String,

    /// Work the quote is taken from
    pub title: String,

    /// Author of the work
    pub author: String,

    /// Where the background image was fetched from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,

    /// Encoded background image (PNG, JPEG or WebP)
    #[serde(skip)]
    pub background: Option<Vec<u8>>,

    /// Eligible for rotation
    pub display: bool,
}

impl Quote {
    /// Create a displayable quote with unknown title and author.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            title: UNKNOWN.to_string(),
            author: UNKNOWN.to_string(),
            image_url: None,
            background: None,
            display: true,
        }
    }

    /// Set the title. Blank titles fall back to [`UNKNOWN`].
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = or_unknown(title.into());
        self
    }

    /// Set the author. Blank authors fall back to [`UNKNOWN`].
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = or_unknown(author.into());
        self
    }

    /// Attach encoded background image bytes.
    #[must_use]
    pub fn with_background(mut self, bytes: Vec<u8>) -> Self {
        self.background = Some(bytes);
        self
    }

    /// Set the source URL of the background image.
    #[must_use]
    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// Set the display flag.
    #[must_use]
    pub fn with_display(mut self, display: bool) -> Self {
        self.display = display;
        self
    }

    /// Content hash over everything that affects the rendered image.
    ///
    /// Used as part of render cache keys so a resynced quote never serves a
    /// stale image.
    pub fn revision(&self) -> u64 {
        let mut hash = Fnv64::new();
        hash.write(self.text.as_bytes());
        hash.write(&[0xff]);
        hash.write(self.title.as_bytes());
        hash.write(&[0xff]);
        hash.write(self.author.as_bytes());
        hash.write(&[0xff]);
        if let Some(bytes) = &self.background {
            hash.write(bytes);
        }
        hash.finish()
    }
}

fn or_unknown(value: String) -> String {
    if value.trim().is_empty() {
        UNKNOWN.to_string()
    } else {
        value
    }
}

/// 64-bit FNV-1a.
///
/// Used wherever a hash must be identical across processes and platforms
/// (seeds, fingerprints, cache revisions).
#[derive(Debug, Clone, Copy)]
pub(crate) struct Fnv64(u64);

impl Fnv64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    pub(crate) fn new() -> Self {
        Self(Self::OFFSET)
    }

    pub(crate) fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= u64::from(*byte);
            self.0 = self.0.wrapping_mul(Self::PRIME);
        }
    }

    pub(crate) fn finish(self) -> u64 {
        self.0
    }
}
