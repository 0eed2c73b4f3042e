//! Server error types and their HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use oql::{EvalError, QueryParseError};
use thiserror::Error;

use crate::state::ErrorResponse;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("No collection named '{0}'")]
    UnknownCollection(String),

    #[error(transparent)]
    Query(#[from] QueryParseError),

    #[error("Query evaluation failed: {0}")]
    Eval(#[from] EvalError),

    #[error("{0}")]
    Task(String),
}

/// Application error type surfaced by handlers.
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<ServerError> for AppError {
    fn from(e: ServerError) -> Self {
        let status = match e {
            ServerError::UnknownCollection(_) => StatusCode::NOT_FOUND,
            ServerError::Query(_) | ServerError::Eval(_) => StatusCode::BAD_REQUEST,
            ServerError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            message: e.to_string(),
        }
    }
}
