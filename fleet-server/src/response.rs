use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt::Display;
use tracing::error;

#[derive(Debug)]
pub enum ServerError {
    InternalError(String),
    BadRequest(String),
    NotFound(String),
}

impl Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::InternalError(message) => write!(f, "Internal Error: {}", message),
            ServerError::BadRequest(message) => write!(f, "Bad Request: {}", message),
            ServerError::NotFound(message) => write!(f, "Not Found: {}", message),
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::InternalError(err.to_string())
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::InternalError(err.to_string())
    }
}

impl ServerError {
    pub fn internal_error(message: &str) -> Self {
        ServerError::InternalError(message.to_string())
    }

    pub fn bad_request(message: &str) -> Self {
        ServerError::BadRequest(message.to_string())
    }

    pub fn not_found(message: &str) -> Self {
        ServerError::NotFound(message.to_string())
    }
}

// Tell axum how `ServerError` should be converted into a response.
impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            message: String,
        }

        let (status, message) = match &self {
            ServerError::InternalError(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
            ServerError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ServerError::NotFound(message) => (StatusCode::NOT_FOUND, message),
        };

        error!("Returning error response {} {}", status, message);

        (
            status,
            axum::Json(ErrorResponse {
                message: message.to_owned(),
            }),
        )
            .into_response()
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
