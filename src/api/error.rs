//! Error type shared by every control-plane call.

use thiserror::Error;

/// Failure surfaced by the control-plane adapter.
///
/// The adapter never retries; callers decide whether a failure is fatal.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// Raised when the request could not be sent or the connection dropped.
    #[error("transport failure calling {endpoint}: {message}")]
    Transport {
        /// Endpoint path that was being called.
        endpoint: String,
        /// Message reported by the HTTP client.
        message: String,
    },
    /// Raised when the control plane answers with a non-2xx status.
    #[error("{endpoint} returned status {status}: {message}")]
    Status {
        /// Endpoint path that was being called.
        endpoint: String,
        /// HTTP status code.
        status: u16,
        /// Error text extracted from the response body.
        message: String,
    },
    /// Raised when a successful response body cannot be decoded.
    #[error("failed to decode {endpoint} response: {message}")]
    Decode {
        /// Endpoint path that was being called.
        endpoint: String,
        /// Decoder error message.
        message: String,
    },
}

impl RemoteError {
    /// Returns the HTTP status carried by the error, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport { .. } | Self::Decode { .. } => None,
        }
    }

    /// Returns the endpoint the failing call targeted.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Transport { endpoint, .. }
            | Self::Status { endpoint, .. }
            | Self::Decode { endpoint, .. } => endpoint,
        }
    }
}

/// Raised when request parameters are rejected before any call is made.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ParamsError {
    /// A required field is empty.
    #[error("missing or empty field: {0}")]
    Validation(String),
    /// Idle runner floor exceeds the runner ceiling.
    #[error("min_idle_runners ({min_idle}) exceeds max_runners ({max})")]
    Sizing {
        /// Requested idle floor.
        min_idle: u32,
        /// Requested ceiling.
        max: u32,
    },
}
