//! HTTP error mapping for the API server

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gamify::EngineError;

/// API error type; converts engine errors into HTTP responses.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    #[allow(dead_code)]
    NotFound(String),

    #[error("Bad request: {0}")]
    #[allow(dead_code)]
    BadRequest(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(err) => match err {
                EngineError::Validation(_) | EngineError::InvalidCatalog(_) => {
                    StatusCode::BAD_REQUEST
                }
                EngineError::DuplicateEventId(_) => StatusCode::CONFLICT,
                EngineError::QueueFull | EngineError::QueueClosed => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                EngineError::NotFound(_) | EngineError::CatalogMissing(_) => StatusCode::NOT_FOUND,
                EngineError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({
            "error": {
                "message": self.to_string(),
                "code": status.as_u16()
            }
        }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_the_contract_statuses() {
        let cases = [
            (
                ApiError::Engine(EngineError::Validation(vec!["x".to_string()])),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::Engine(EngineError::DuplicateEventId("e1".to_string())),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::Engine(EngineError::QueueFull),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ApiError::Engine(EngineError::CatalogMissing("xp".to_string())),
                StatusCode::NOT_FOUND,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(error.status(), expected);
        }
    }
}
