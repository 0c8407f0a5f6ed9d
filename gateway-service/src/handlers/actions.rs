//! The kernel entry point over HTTP.

use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use action_kernel::request::ActionRequest;

use crate::error::{status_for_code, GatewayError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct InvokeRequest {
    pub action: String,
    #[serde(default)]
    pub payload: Value,
    pub idempotency_key: Option<String>,
    pub tenant_hint: Option<Uuid>,
    pub timeout_ms: Option<u64>,
}

/// POST /v1/actions
///
/// Bearer credential, JSON body, normalized into the kernel request. The
/// kernel never returns a bare error, so this handler only fails on
/// malformed transport input.
pub async fn invoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<InvokeRequest>,
) -> Result<Response, GatewayError> {
    let credential = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|value| value.to_string())
        .ok_or_else(|| {
            GatewayError::Unauthorized("Missing or invalid Authorization header".to_string())
        })?;

    let source_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let response = state
        .kernel
        .dispatch(ActionRequest {
            credential,
            tenant_hint: body.tenant_hint,
            action: body.action,
            idempotency_key: body.idempotency_key,
            payload: body.payload,
            source_ip,
            timeout_ms: body.timeout_ms,
        })
        .await;

    let status = status_for_code(&response.code);
    let retry_after = response
        .error
        .as_ref()
        .and_then(|detail| detail.retry_after_secs);

    let mut http_response = (status, Json(response)).into_response();
    if let Some(retry) = retry_after {
        http_response
            .headers_mut()
            .insert(header::RETRY_AFTER, retry.into());
    }
    Ok(http_response)
}
