//! Service health check.

use axum::{extract::State, Json};
use serde_json::json;

use crate::error::GatewayError;
use crate::AppState;

pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    state.directory.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "PostgreSQL health check failed");
        GatewayError::Internal(e)
    })?;

    state.redis.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Redis health check failed");
        GatewayError::Internal(e)
    })?;

    Ok(Json(json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "checks": {
            "postgres": "up",
            "redis": "up"
        }
    })))
}
