use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use keyhole_core::{CoreError, ShortenerError};
use thiserror::Error;
use tracing::error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("missing user id")]
    Unauthorized,
    #[error("client is not trusted")]
    Forbidden,
    #[error(transparent)]
    Shortener(#[from] ShortenerError),
}

impl From<CoreError> for AppError {
    fn from(value: CoreError) -> Self {
        AppError::Shortener(value.into())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::BadRequest(value.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            AppError::Unauthorized => StatusCode::UNAUTHORIZED.into_response(),
            AppError::Forbidden => StatusCode::FORBIDDEN.into_response(),
            AppError::Shortener(
                e @ (ShortenerError::InvalidUrl(_) | ShortenerError::InvalidShortCode(_)),
            ) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
            AppError::Shortener(ShortenerError::Storage(e)) => {
                error!(error = %e, "request failed on storage");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
        }
    }
}
