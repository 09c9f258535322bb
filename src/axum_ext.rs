//! Axum integration: who is asking, and with which overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use axum::{Router, routing::get};
//! use ditto::axum_ext::RequestClient;
//!
//! async fn whoami(client: RequestClient) -> String {
//!     client.client_id
//! }
//!
//! let app = Router::new().route("/whoami", get(whoami));
//! ```

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;

use crate::error::Error;
use crate::identity::{resolve_client_id, ClientQuery};

/// Header a frame may use to send its device id (MAC address or name).
pub const DEVICE_ID_HEADER: &str = "ID";

/// The requesting client and its query overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestClient {
    /// Resolved client id
    pub client_id: String,
    /// Parsed query string
    pub query: ClientQuery,
}

/// Resolve the client from the request.
///
/// Reads, in order: the `client_override` query parameter, the `ID` header,
/// and the peer address (when the server was started with
/// `into_make_service_with_connect_info::<SocketAddr>()`). Falls back to
/// `"unknown"`.
impl<S> FromRequestParts<S> for RequestClient
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let query = ClientQuery::from_query_string(parts.uri.query().unwrap_or_default())?;

        let device_id = parts
            .headers
            .get(DEVICE_ID_HEADER)
            .and_then(|v| v.to_str().ok());

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        let client_id = resolve_client_id(query.client_override.as_deref(), device_id, peer);
        Ok(RequestClient { client_id, query })
    }
}
