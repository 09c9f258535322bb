//! # ditto
//!
//! A rotating quote image server for e-ink picture frames.
//!
//! Every frame polls a fixed URL and gets back a PNG: a quote drawn over its
//! background image at exactly the frame's resolution. Each frame walks its
//! own shuffled order of the quote catalog, so frames in the same house show
//! different quotes, every quote comes up once before any repeats, and the
//! order survives restarts.
//!
//! - [`rotation`]: pure per-client rotation state machine
//! - [`engine`]: store-backed client registry around it
//! - [`compose`]: background + contrast + text + optional palette pipeline
//! - [`store`]: SQLite quote catalog and client table
//! - `server` (feature `server`): axum router
//! - `sync` (feature `sync`): background pull from a JSON content feed
//!
//! ## Quick Start (axum)
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ditto::{server, Settings, Store};
//!
//! let settings = Settings::default();
//! let store = Store::open(&settings.database_path)?;
//! let state = server::AppState::new(store, settings)?;
//!
//! let app = server::router(Arc::new(state));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await?;
//! axum::serve(listener, app).await?;
//! ```
//!
//! ## HTTP API
//!
//! | Endpoint | Method | Purpose |
//! |----------|--------|---------|
//! | `/current` | GET | Quote under the client's cursor, as PNG |
//! | `/next` | GET | Advance, then render |
//! | `/previous` | GET | Go back, then render |
//! | `/random` | GET | Jump to a random other quote, then render |
//! | `/clients` | POST | Pre-register a client |
//! | `/clients` | GET | List clients |
//! | `/clients/{id}` | GET, PATCH | Read or update one client |
//! | `/health` | GET | Liveness |
//! | `/` | GET | Server status |
//!
//! Frames identify themselves with `client_override=<name>` in the query
//! string, an `ID` header, or implicitly by IP address.
//!
//! ## Feature Flags
//!
//! - `server` - axum router and extractors
//! - `sync` - content feed client and scheduled sync job
//! - `full` - All features

pub mod cache;
pub mod compose;
pub mod config;
pub mod engine;
mod error;
pub mod identity;
pub mod quote;
pub mod rotation;
pub mod schedule;
pub mod status;
pub mod store;

pub use cache::{RenderCache, RenderKey};
pub use compose::{Compositor, LayoutConfig, Palette, RenderedImage};
pub use config::{Settings, SyncSettings};
pub use engine::{ClientInfo, ClientUpdate, Direction, RotationEngine, Selection};
pub use error::Error;
pub use quote::Quote;
pub use schedule::{DaySelector, SyncSchedule};
pub use store::Store;

/// Default frame width in pixels
pub const DEFAULT_WIDTH: u32 = 800;

/// Default frame height in pixels
pub const DEFAULT_HEIGHT: u32 = 480;

/// Largest width or height the compositor will render
pub const MAX_DIMENSION: u32 = 4096;

// Optional modules
#[cfg(feature = "server")]
pub mod axum_ext;
#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "sync")]
pub mod source;
#[cfg(feature = "sync")]
pub mod sync;
#[cfg(feature = "sync")]
pub use source::{HttpSource, QuoteSource, SourceQuote};
#[cfg(feature = "sync")]
pub use sync::{SyncJob, SyncReport};

/// Check caller-supplied frame dimensions.
///
/// Both must be in `1..=MAX_DIMENSION`.
///
/// # Example
///
/// ```
/// use ditto::validate_dimensions;
///
/// assert_eq!(validate_dimensions(800, 480).unwrap(), (800, 480));
/// assert!(validate_dimensions(0, 480).is_err());
/// assert!(validate_dimensions(800, -1).is_err());
/// ```
pub fn validate_dimensions(width: i64, height: i64) -> Result<(u32, u32), Error> {
    let valid = |v: i64| (1..=i64::from(MAX_DIMENSION)).contains(&v);
    if valid(width) && valid(height) {
        Ok((width as u32, height as u32))
    } else {
        Err(Error::InvalidDimensions { width, height })
    }
}
