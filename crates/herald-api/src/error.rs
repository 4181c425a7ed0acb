use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use herald_session::SessionError;
use herald_types::api::ErrorBody;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Access denied. No token provided.")]
    MissingToken,

    #[error("Invalid token.")]
    InvalidToken,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// A facade failure; `context` names the operation that failed.
    #[error("{context}: {source}")]
    Session {
        context: &'static str,
        source: SessionError,
    },

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn session(context: &'static str) -> impl FnOnce(SessionError) -> ApiError {
        move |source| ApiError::Session { context, source }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, detail) = match &self {
            ApiError::Validation(_) | ApiError::Conflict(_) => {
                (StatusCode::BAD_REQUEST, self.to_string(), None)
            }
            ApiError::InvalidCredentials | ApiError::MissingToken => {
                (StatusCode::UNAUTHORIZED, self.to_string(), None)
            }
            ApiError::InvalidToken => (StatusCode::FORBIDDEN, self.to_string(), None),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string(), None),
            ApiError::Session { context, source } => {
                error!("{}: {}", context, source);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    context.to_string(),
                    Some(source.to_string()),
                )
            }
            ApiError::Internal(e) => {
                error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
        };

        let body = ErrorBody {
            status: "error",
            message,
            error: detail,
        };

        (status, Json(body)).into_response()
    }
}
