//! The error type for everything that crosses the HTTP boundary.
//!
//! CLI-side code keeps using `anyhow::Result` (see the `commands` module);
//! this enum exists for the handful of places — the provisioning pipeline,
//! the store, overlay building — whose failure mode needs to become a
//! specific HTTP status rather than a generic 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum CinderError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    /// No backing artifact could be produced for an otherwise well-formed
    /// request — unresolved node on a non-`ipxe` stage, or an overlay build
    /// failure. Not one of §7's six named kinds; added so the HTTP boundary
    /// can return 503 rather than folding it into `Configuration`'s 500.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("template error: {0}")]
    Template(#[from] tera::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl CinderError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Io(_) | Self::Configuration(_) | Self::Template(_) | Self::Yaml(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for CinderError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

pub type CinderResult<T> = Result<T, CinderError>;
