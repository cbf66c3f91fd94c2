use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pdfrag_core::error::CoreError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ClientInput(msg) => ApiError::BadRequest(msg),
            CoreError::NotFound(msg) => ApiError::NotFound(msg),
            CoreError::EmptyContent => ApiError::Unprocessable("no extractable text".to_string()),
            CoreError::TransientUpstream(msg) => ApiError::ServiceUnavailable(msg),
            CoreError::PermanentUpstream(msg) => ApiError::InternalError(msg),
            CoreError::InvariantViolation(msg) => ApiError::InternalError(msg),
            CoreError::CacheUnavailable(msg) => ApiError::ServiceUnavailable(msg),
            CoreError::Queue(msg) => ApiError::ServiceUnavailable(msg),
            CoreError::Database(e) => ApiError::InternalError(e.to_string()),
            CoreError::BlobStore(e) => ApiError::InternalError(e.to_string()),
            CoreError::Io(e) => ApiError::InternalError(e.to_string()),
            CoreError::Config(msg) => ApiError::InternalError(msg),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Stable machine-readable code + human message; internals stay in logs.
        let (status, error_type, message) = match self {
            ApiError::BadRequest(msg) => {
                tracing::warn!("Bad request: {}", msg);
                (StatusCode::BAD_REQUEST, "BadRequest", msg)
            }
            ApiError::NotFound(msg) => {
                tracing::warn!("Not found: {}", msg);
                (StatusCode::NOT_FOUND, "NotFound", msg)
            }
            ApiError::PayloadTooLarge(msg) => {
                tracing::warn!("Payload too large: {}", msg);
                (StatusCode::PAYLOAD_TOO_LARGE, "PayloadTooLarge", msg)
            }
            ApiError::UnsupportedMediaType(msg) => {
                tracing::warn!("Unsupported media type: {}", msg);
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "UnsupportedMediaType", msg)
            }
            ApiError::Unprocessable(msg) => {
                tracing::warn!("Unprocessable: {}", msg);
                (StatusCode::UNPROCESSABLE_ENTITY, "Unprocessable", msg)
            }
            ApiError::ServiceUnavailable(msg) => {
                tracing::error!("Service unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "ServiceUnavailable",
                    "upstream dependency unavailable".to_string(),
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalError",
                    "internal error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_documented_statuses() {
        let cases: Vec<(CoreError, StatusCode)> = vec![
            (
                CoreError::ClientInput("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (CoreError::NotFound("doc".into()), StatusCode::NOT_FOUND),
            (CoreError::EmptyContent, StatusCode::UNPROCESSABLE_ENTITY),
            (
                CoreError::TransientUpstream("429".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                CoreError::InvariantViolation("dim".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (core, expected) in cases {
            let api: ApiError = core.into();
            let response = api.into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn internal_messages_do_not_leak() {
        let api = ApiError::InternalError("connection string with secrets".to_string());
        let response = api.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
