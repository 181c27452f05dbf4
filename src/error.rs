//! Error types for Fluxgate

use thiserror::Error;

/// Message substrings that identify a host-platform egress restriction
/// rather than a destination fault. Errors matching one of these trigger
/// the fallback strategy instead of failing the request.
const RESTRICTED_NETWORK_MARKERS: &[&str] = &[
    "A network issue was detected",
    "Network connection failure",
    "connection failed",
    "timed out",
    "Stream was cancelled",
    "proxy request failed",
    "cannot connect to the specified address",
    "TCP Loop detected",
    "Connections to port 25 are prohibited",
];

/// Main error type for Fluxgate
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Gateway failure: {0}")]
    Gateway(String),
}

impl Error {
    /// HTTP status this error surfaces as when it reaches the client.
    pub fn status(&self) -> u16 {
        match self {
            Error::BadRequest(_) => 400,
            Error::Unsupported(_) => 501,
            Error::Gateway(_) => 502,
            _ => 500,
        }
    }

    /// Whether this error looks like an egress restriction of the host
    /// network rather than a problem with the destination. Matching is by
    /// message substring; the marker list covers the error strings the
    /// restricted runtimes are known to produce.
    pub fn is_network_restricted(&self) -> bool {
        let msg = self.to_string();
        RESTRICTED_NETWORK_MARKERS.iter().any(|m| msg.contains(m))
    }
}

/// Result type alias for Fluxgate
pub type Result<T> = std::result::Result<T, Error>;
