//! Client-visible failures
//!
//! Every error leaves the relay as a single-line plain-text body.

use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::upstream::FetchError;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Missing url parameter")]
    MissingUrl,

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Error: {0}")]
    Unexpected(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::MissingUrl => StatusCode::BAD_REQUEST,
            ProxyError::Fetch(err) => err.status_code(),
            ProxyError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn unexpected(message: impl ToString) -> Self {
        ProxyError::Unexpected(message.to_string())
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let message = self
            .to_string()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        (
            self.status_code(),
            [(CONTENT_TYPE, "text/plain; charset=utf-8")],
            message,
        )
            .into_response()
    }
}
