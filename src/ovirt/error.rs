//! Error types for the oVirt registry adapter.

use thiserror::Error;

/// Errors raised by the oVirt REST adapter.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OvirtError {
    /// Raised when the configured API URL cannot be used.
    #[error("invalid engine API URL {url}: {message}")]
    InvalidUrl {
        /// URL taken from configuration.
        url: String,
        /// Why the URL was rejected.
        message: String,
    },
    /// Raised when the engine rejects the credentials.
    #[error("authentication as {user} failed: {message}")]
    Authentication {
        /// User name presented to the engine.
        user: String,
        /// Description returned by the SSO service.
        message: String,
    },
    /// Raised when the engine answers with an unexpected HTTP status.
    #[error("{resource} request failed with HTTP {status}: {message}")]
    Api {
        /// Resource being accessed (for example `snapshot`).
        resource: String,
        /// HTTP status code.
        status: u16,
        /// Response body, trimmed.
        message: String,
    },
    /// Raised when a response body cannot be decoded.
    #[error("failed to parse {resource} response: {message}")]
    Parse {
        /// Resource being decoded.
        resource: String,
        /// Decoder error message.
        message: String,
    },
    /// Wrapper for connection level failures.
    #[error("transport error: {message}")]
    Transport {
        /// Message returned by the HTTP client.
        message: String,
    },
}

impl From<reqwest::Error> for OvirtError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport {
            message: value.to_string(),
        }
    }
}
