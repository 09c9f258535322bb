//! Client identity and per-request overrides.
//!
//! Quote endpoints identify the requesting frame from, in order:
//!
//! 1. the `client_override` query parameter
//! 2. the device `ID` header
//! 3. the peer IP address
//! 4. the literal `"unknown"`
//!
//! Frames are configured with a fixed URL, so everything else they can send
//! rides along in the query string:
//! `https://yourserver.com/next?client_override=kitchen&width=600&height=448&palette=inky7`

use std::collections::HashMap;
use std::net::IpAddr;

use crate::compose::Palette;
use crate::error::Error;

/// Identity used when nothing else identifies the caller.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Pick the client id from the available sources. Blank values are ignored.
pub fn resolve_client_id(
    client_override: Option<&str>,
    device_id: Option<&str>,
    peer: Option<IpAddr>,
) -> String {
    let non_blank = |v: &&str| !v.trim().is_empty();
    client_override
        .filter(non_blank)
        .or_else(|| device_id.filter(non_blank))
        .map(|s| s.trim().to_string())
        .or_else(|| peer.map(|ip| ip.to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Query parameters accepted by the quote endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientQuery {
    /// Explicit client name
    pub client_override: Option<String>,
    /// Width for this request; persisted only on first contact
    pub width: Option<i64>,
    /// Height for this request; persisted only on first contact
    pub height: Option<i64>,
    /// Palette preset or hex list
    pub palette: Option<String>,
    /// Dithering switch, only meaningful with `palette`
    pub dither: Option<bool>,
}

impl ClientQuery {
    /// Parse a raw query string.
    ///
    /// Unknown parameters are ignored; malformed numbers or booleans fail with
    /// [`Error::InvalidRequest`].
    pub fn from_query_string(query: &str) -> Result<Self, Error> {
        let params: HashMap<_, _> = form_urlencoded::parse(query.as_bytes()).collect();
        let text = |key: &str| {
            params
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(Self {
            client_override: text("client_override"),
            width: text("width").map(|v| parse_int("width", &v)).transpose()?,
            height: text("height").map(|v| parse_int("height", &v)).transpose()?,
            palette: text("palette"),
            dither: text("dither").map(|v| parse_flag("dither", &v)).transpose()?,
        })
    }

    /// The palette this request asks for, if any.
    pub fn palette(&self) -> Result<Option<Palette>, Error> {
        let Some(spec) = &self.palette else {
            return Ok(None);
        };
        let palette = Palette::parse(spec)
            .map_err(|_| Error::InvalidRequest(format!("unknown palette '{}'", spec)))?;
        Ok(Some(palette.with_dither(self.dither.unwrap_or(true))))
    }
}

fn parse_int(key: &str, value: &str) -> Result<i64, Error> {
    value
        .parse()
        .map_err(|_| Error::InvalidRequest(format!("{} must be an integer, got '{}'", key, value)))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, Error> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidRequest(format!(
            "{} must be a boolean, got '{}'",
            key, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_resolution_order() {
        let peer = Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)));
        assert_eq!(resolve_client_id(Some("kitchen"), Some("AA:BB"), peer), "kitchen");
        assert_eq!(resolve_client_id(None, Some("AA:BB"), peer), "AA:BB");
        assert_eq!(resolve_client_id(Some("  "), None, peer), "192.168.1.20");
        assert_eq!(resolve_client_id(None, None, None), UNKNOWN_CLIENT);
    }

    #[test]
    fn test_from_query_string() {
        let query = ClientQuery::from_query_string(
            "client_override=frame-1&width=600&height=448&palette=inky7&dither=false&other=x",
        )
        .unwrap();
        assert_eq!(query.client_override.as_deref(), Some("frame-1"));
        assert_eq!(query.width, Some(600));
        assert_eq!(query.height, Some(448));
        assert_eq!(query.dither, Some(false));

        let palette = query.palette().unwrap().unwrap();
        assert_eq!(palette.name(), "inky7");
        assert!(!palette.dither());
    }

    #[test]
    fn test_empty_query() {
        let query = ClientQuery::from_query_string("").unwrap();
        assert_eq!(query, ClientQuery::default());
        assert_eq!(query.palette().unwrap(), None);
    }

    #[test]
    fn test_percent_encoded_palette() {
        let query = ClientQuery::from_query_string("palette=%23000000%2C%23ffffff").unwrap();
        assert_eq!(query.palette().unwrap().unwrap().colors().len(), 2);
    }

    #[test]
    fn test_negative_size_parses() {
        // Range checks happen later, against the compositor limits
        let query = ClientQuery::from_query_string("width=-5").unwrap();
        assert_eq!(query.width, Some(-5));
    }

    #[test]
    fn test_malformed_values() {
        assert!(matches!(
            ClientQuery::from_query_string("width=wide"),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            ClientQuery::from_query_string("dither=sometimes"),
            Err(Error::InvalidRequest(_))
        ));
        let query = ClientQuery::from_query_string("palette=sepia").unwrap();
        assert!(matches!(query.palette(), Err(Error::InvalidRequest(_))));
    }
}
