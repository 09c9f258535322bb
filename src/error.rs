//! Error types for the ditto quote server.

use thiserror::Error;

/// Errors produced by the rotation engine, the compositor and their collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// An explicit client operation named a client that was never registered
    #[error("client not found: {0}")]
    ClientNotFound(String),

    /// No quote currently has `display = true`
    #[error("no eligible quotes in catalog")]
    EmptyCatalog,

    /// A caller-supplied rotation position is outside the current order
    #[error("position {position} is out of range for a rotation of {len} quotes")]
    InvalidPosition {
        /// Requested position
        position: i64,
        /// Current length of the client's rotation order
        len: usize,
    },

    /// A caller-supplied width or height is non-positive or too large
    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions {
        /// Requested width
        width: i64,
        /// Requested height
        height: i64,
    },

    /// A request parameter could not be parsed (bad number, unknown palette)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The quote's background image is missing or cannot be decoded
    #[error("background asset unavailable for quote {quote_id}: {reason}")]
    AssetUnavailable {
        /// Quote whose asset failed
        quote_id: String,
        /// What went wrong
        reason: String,
    },

    /// The quote text does not fit the canvas even at the minimum font scale
    #[error("quote {0} does not fit the canvas at minimum scale")]
    QuoteTooLong(String),

    /// SQLite failure or a poisoned lock around the connection
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid or unreadable configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The remote content source failed (network, status, payload)
    #[error("content source error: {0}")]
    Source(String),

    /// Encoding the rendered image failed
    #[error("image encoding failed: {0}")]
    Encode(String),

    /// File I/O failure
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Source(format!("invalid JSON: {}", err))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(format!("invalid YAML: {}", err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

#[cfg(feature = "sync")]
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Source(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Storage(format!("lock poisoned: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::EmptyCatalog;
        assert!(err.to_string().contains("no eligible quotes"));

        let err = Error::InvalidPosition {
            position: 99,
            len: 3,
        };
        assert!(err.to_string().contains("99"));
        assert!(err.to_string().contains("3 quotes"));

        let err = Error::AssetUnavailable {
            quote_id: "q1".to_string(),
            reason: "no image".to_string(),
        };
        assert!(err.to_string().contains("q1"));
        assert!(err.to_string().contains("no image"));
    }

    #[test]
    fn test_sqlite_error_maps_to_storage() {
        let err: Error = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, Error::Storage(_)));
    }
}
