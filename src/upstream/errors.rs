//! Upstream fetch error types
//!
//! Maps each resolution failure to the HTTP status the relay answers with.

use axum::http::StatusCode;

/// Failure to produce a usable upstream response
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Error: Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Google Drive file not found or confirmation failed.")]
    ConfirmationUnavailable,

    #[error("Failed to fetch: {reason}")]
    UpstreamStatus { status: u16, reason: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Upstream request timed out")]
    Timeout,
}

impl FetchError {
    /// Status code returned to the client for this failure
    ///
    /// Upstream statuses are forwarded verbatim. Network failures without a
    /// status become 502, the Drive handshake 404, and a URL that cannot be
    /// parsed or requested is an unexpected failure (500).
    pub fn status_code(&self) -> StatusCode {
        match self {
            FetchError::UpstreamStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            FetchError::ConfirmationUnavailable => StatusCode::NOT_FOUND,
            FetchError::InvalidUrl(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FetchError::Network(_) | FetchError::Timeout => StatusCode::BAD_GATEWAY,
        }
    }

    /// Create a FetchError from a non-success upstream status
    pub fn from_status(status: StatusCode) -> Self {
        let reason = status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| status.as_u16().to_string());
        FetchError::UpstreamStatus {
            status: status.as_u16(),
            reason,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_builder() {
            FetchError::InvalidUrl(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}
