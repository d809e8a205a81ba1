//! Failure taxonomy of the live globe.
//!
//! Only [`InitializationError`] is fatal; every other error degrades to a stale
//! map, a skipped marker or a transient notice.

use thiserror::Error;

/// The canvas could not be created. Surfaced to the caller as a blocking prompt,
/// never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitializationError {
    #[error("map container element is missing")]
    MissingContainer,

    #[error("map access token is missing")]
    MissingToken,

    #[error("map access token is invalid: {0}")]
    InvalidToken(String),

    #[error("rendering engine rejected initialization: {0}")]
    Engine(String),
}

/// A snapshot reload or reference-data lookup failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("fetch error: {0}")]
    Transport(String),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("parse error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// The rendering engine refused to create or move a single marker.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlacementError {
    #[error("invalid marker coordinates ({lng}, {lat})")]
    InvalidCoordinates { lng: f64, lat: f64 },

    #[error("unknown marker handle {0}")]
    UnknownMarker(u64),

    #[error("engine rejected marker: {0}")]
    Rejected(String),
}

/// The change-feed transport dropped or could not (re)connect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("change feed connect failed: {0}")]
    Connect(String),

    #[error("change feed closed: {0}")]
    Closed(String),

    #[error("change feed lagged, {0} notifications skipped")]
    Lagged(u64),
}
