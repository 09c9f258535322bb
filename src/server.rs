//! HTTP surface.
//!
//! Quote endpoints resolve the client, step its rotation, and render the
//! selected quote off the async runtime. Errors map to status codes through
//! [`IntoResponse`] for [`Error`].

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::axum_ext::RequestClient;
use crate::cache::{RenderCache, RenderKey};
use crate::compose::{Compositor, Palette};
use crate::config::Settings;
use crate::engine::{ClientInfo, ClientUpdate, Direction, RotationEngine};
use crate::error::Error;
use crate::status::{ConnectionInfo, RecentConnections, ServerStatus};
use crate::store::Store;

/// Response header carrying the id of the quote in the image.
pub const QUOTE_ID_HEADER: &str = "x-quote-id";

/// Everything the handlers share.
#[derive(Debug)]
pub struct AppState {
    engine: RotationEngine,
    compositor: Compositor,
    cache: Option<Arc<RenderCache>>,
    recent: RecentConnections,
    settings: Settings,
    started_at: DateTime<Utc>,
}

/// Handle passed to every handler.
pub type SharedState = Arc<AppState>;

/// A rendered frame ready to send.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Quote shown
    pub quote_id: String,
    /// PNG bytes
    pub png: Arc<Vec<u8>>,
    /// Whether the bytes came from the render cache
    pub cached: bool,
}

impl AppState {
    /// Build the shared state. Fails on an invalid layout.
    pub fn new(store: Store, settings: Settings) -> Result<Self, Error> {
        let compositor = Compositor::new(settings.layout.clone())?;
        let engine = RotationEngine::new(store, settings.default_width, settings.default_height);
        let cache = settings
            .cache_enabled
            .then(|| Arc::new(RenderCache::new(settings.cache_capacity)));
        Ok(Self {
            engine,
            compositor,
            cache,
            recent: RecentConnections::new(settings.recent_connections),
            settings,
            started_at: Utc::now(),
        })
    }

    /// Rotation engine.
    pub fn engine(&self) -> &RotationEngine {
        &self.engine
    }

    /// Quote store.
    pub fn store(&self) -> &Store {
        self.engine.store()
    }

    /// Render cache, when enabled.
    pub fn cache(&self) -> Option<Arc<RenderCache>> {
        self.cache.clone()
    }

    /// Step `client_id` in `direction` and render the selected quote.
    ///
    /// Blocking: runs SQLite queries and image composition.
    pub fn render(
        &self,
        client_id: &str,
        direction: Direction,
        width: Option<i64>,
        height: Option<i64>,
        palette: Option<&Palette>,
    ) -> Result<Frame, Error> {
        let selection = self.engine.step(client_id, direction, width, height)?;

        let quote = self
            .store()
            .get_quote(&selection.quote_id)?
            .ok_or_else(|| Error::AssetUnavailable {
                quote_id: selection.quote_id.clone(),
                reason: "quote was removed from the store".to_string(),
            })?;

        let key = RenderKey {
            quote_id: quote.id.clone(),
            revision: quote.revision(),
            width: selection.width,
            height: selection.height,
            palette: palette.map(Palette::cache_key),
        };
        if let Some(png) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            return Ok(Frame {
                quote_id: quote.id,
                png,
                cached: true,
            });
        }

        let rendered = self
            .compositor
            .compose(&quote, selection.width, selection.height, palette)?;
        let png = Arc::new(rendered.to_png()?);
        if let Some(cache) = &self.cache {
            cache.insert(key, Arc::clone(&png));
        }
        Ok(Frame {
            quote_id: quote.id,
            png,
            cached: false,
        })
    }
}

/// Build the router.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/health", get(health))
        .route("/current", get(current))
        .route("/next", get(next))
        .route("/previous", get(previous))
        .route("/random", get(random))
        .route("/clients", get(list_clients).post(create_client))
        .route("/clients/{id}", get(get_client).patch(update_client))
        .with_state(state)
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::ClientNotFound(_) => StatusCode::NOT_FOUND,
            Error::EmptyCatalog => StatusCode::SERVICE_UNAVAILABLE,
            Error::InvalidPosition { .. }
            | Error::InvalidDimensions { .. }
            | Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

async fn status(State(state): State<SharedState>) -> Result<Json<ServerStatus>, Error> {
    let status = ServerStatus::collect(
        state.started_at,
        state.store(),
        &state.settings,
        &state.recent,
    )?;
    Ok(Json(status))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn current(State(state): State<SharedState>, client: RequestClient) -> Response {
    serve_quote(state, client, Direction::Current).await
}

async fn next(State(state): State<SharedState>, client: RequestClient) -> Response {
    serve_quote(state, client, Direction::Next).await
}

async fn previous(State(state): State<SharedState>, client: RequestClient) -> Response {
    serve_quote(state, client, Direction::Previous).await
}

async fn random(State(state): State<SharedState>, client: RequestClient) -> Response {
    serve_quote(state, client, Direction::Random).await
}

async fn serve_quote(state: SharedState, client: RequestClient, direction: Direction) -> Response {
    let started = Instant::now();
    let path = format!("/{}", direction.as_str());

    let (response, quote_id) = match render_frame(Arc::clone(&state), &client, direction).await {
        Ok(frame) => {
            let response = png_response(&frame);
            (response, Some(frame.quote_id))
        }
        Err(err) => (err.into_response(), None),
    };

    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    tracing::info!(
        client = %client.client_id,
        path = %path,
        quote_id = quote_id.as_deref().unwrap_or("-"),
        status = response.status().as_u16(),
        elapsed_ms,
        "Served quote"
    );
    state.recent.record(ConnectionInfo {
        client: client.client_id,
        timestamp: Utc::now(),
        method: "GET".to_string(),
        path,
        quote_id,
        status: response.status().as_u16(),
        processing_time_ms: elapsed_ms,
    });
    response
}

async fn render_frame(
    state: SharedState,
    client: &RequestClient,
    direction: Direction,
) -> Result<Frame, Error> {
    let palette = client.query.palette()?;
    let client_id = client.client_id.clone();
    let (width, height) = (client.query.width, client.query.height);

    tokio::task::spawn_blocking(move || {
        state.render(&client_id, direction, width, height, palette.as_ref())
    })
    .await
    .map_err(|e| Error::Encode(format!("render task failed: {}", e)))?
}

fn png_response(frame: &Frame) -> Response {
    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        frame.png.as_ref().clone(),
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&frame.quote_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(QUOTE_ID_HEADER), value);
    }
    response
}

/// Body of `POST /clients`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateClient {
    /// Client id
    pub client_name: String,
    /// Default width
    pub width: Option<i64>,
    /// Default height
    pub height: Option<i64>,
}

async fn create_client(
    State(state): State<SharedState>,
    Json(body): Json<CreateClient>,
) -> Result<(StatusCode, Json<ClientInfo>), Error> {
    let name = body.client_name.trim();
    if name.is_empty() {
        return Err(Error::InvalidRequest("client_name must not be empty".to_string()));
    }
    let (info, created) = state.engine.register(name, body.width, body.height)?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(info)))
}

async fn list_clients(State(state): State<SharedState>) -> Result<Json<Vec<ClientInfo>>, Error> {
    Ok(Json(state.engine.list()?))
}

async fn get_client(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ClientInfo>, Error> {
    Ok(Json(state.engine.get(&id)?))
}

async fn update_client(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(update): Json<ClientUpdate>,
) -> Result<Json<ClientInfo>, Error> {
    Ok(Json(state.engine.update(&id, &update)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::Quote;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 90]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn state(cache_enabled: bool) -> AppState {
        let store = Store::in_memory().unwrap();
        for id in ["a", "b", "c"] {
            store
                .upsert_quote(&Quote::new(id, "Short words.").with_background(png(64, 48)))
                .unwrap();
        }
        let settings = Settings {
            cache_enabled,
            ..Settings::default()
        };
        AppState::new(store, settings).unwrap()
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (Error::ClientNotFound("x".into()), StatusCode::NOT_FOUND),
            (Error::EmptyCatalog, StatusCode::SERVICE_UNAVAILABLE),
            (
                Error::InvalidPosition {
                    position: 9,
                    len: 3,
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                Error::InvalidDimensions {
                    width: 0,
                    height: 0,
                },
                StatusCode::BAD_REQUEST,
            ),
            (Error::QuoteTooLong("q".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (Error::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_render_uses_cache() {
        let state = state(true);
        let first = state
            .render("frame-1", Direction::Current, Some(120), Some(80), None)
            .unwrap();
        assert!(!first.cached);
        let again = state
            .render("frame-1", Direction::Current, Some(120), Some(80), None)
            .unwrap();
        assert!(again.cached);
        assert_eq!(first.png, again.png);
    }

    #[test]
    fn test_render_without_cache_is_deterministic() {
        let state = state(false);
        assert!(state.cache().is_none());
        let a = state.render("frame-1", Direction::Current, None, None, None).unwrap();
        let b = state.render("frame-1", Direction::Current, None, None, None).unwrap();
        assert!(!b.cached);
        assert_eq!(a.png, b.png);
    }

    #[test]
    fn test_png_response_headers() {
        let frame = Frame {
            quote_id: "q-42".to_string(),
            png: Arc::new(vec![1, 2, 3]),
            cached: false,
        };
        let response = png_response(&frame);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(response.headers()[QUOTE_ID_HEADER], "q-42");
    }
}
