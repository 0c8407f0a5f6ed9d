//! Gateway error handling and the kernel-code → HTTP status mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Internal(anyhow::Error::new(err))
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
        }

        let (status, error, details) = match self {
            GatewayError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            GatewayError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            GatewayError::Config(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error".to_string(),
                Some(err.to_string()),
            ),
            GatewayError::Database(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                Some(err.to_string()),
            ),
            GatewayError::Redis(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Cache error".to_string(),
                Some(err.to_string()),
            ),
            GatewayError::Internal(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                Some(err.to_string()),
            ),
        };

        (status, Json(ErrorResponse { error, details })).into_response()
    }
}

/// HTTP status for a kernel envelope code.
pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        "ok" => StatusCode::OK,
        "invalid_api_key" => StatusCode::UNAUTHORIZED,
        "scope_denied" => StatusCode::FORBIDDEN,
        "unknown_action" => StatusCode::NOT_FOUND,
        "validation_error" => StatusCode::UNPROCESSABLE_ENTITY,
        "idempotency_conflict" => StatusCode::CONFLICT,
        "rate_limited" | "ceiling_exceeded" => StatusCode::TOO_MANY_REQUESTS,
        "invalid_verification_token" => StatusCode::BAD_REQUEST,
        "timeout" => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kernel_code_maps_to_a_status() {
        assert_eq!(status_for_code("ok"), StatusCode::OK);
        assert_eq!(status_for_code("invalid_api_key"), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for_code("scope_denied"), StatusCode::FORBIDDEN);
        assert_eq!(status_for_code("rate_limited"), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for_code("ceiling_exceeded"), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for_code("timeout"), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for_code("internal_error"), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
