//! Transport error taxonomy
//!
//! Every call site maps one of these into either a state transition or an
//! advisory status message; nothing here propagates past a component
//! boundary uncaught.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// 401/403 — surfaced, never retried automatically
    #[error("not authorized")]
    Unauthorized,

    /// 404/501 — the endpoint is not there; unlock degrades to offline mode
    #[error("endpoint not available")]
    Missing,

    /// 429 — advisory only, never counted toward stream failure
    #[error("rate limited")]
    Throttled,

    /// The controller refused the command (`result: "blocked"`)
    #[error("command blocked: {reason}")]
    Blocked { reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Map an HTTP status code to the taxonomy, if it is an error code
    pub fn from_status(status: reqwest::StatusCode) -> Option<Self> {
        match status.as_u16() {
            401 | 403 => Some(ApiError::Unauthorized),
            404 | 501 => Some(ApiError::Missing),
            429 => Some(ApiError::Throttled),
            code if status.is_client_error() || status.is_server_error() => {
                Some(ApiError::InvalidResponse(format!("HTTP {}", code)))
            }
            _ => None,
        }
    }
}
