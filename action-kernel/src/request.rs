//! Normalized request and response envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::KernelError;
use crate::ratelimit::Dimension;

/// A parsed, transport-independent request handed to the kernel by its host.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionRequest {
    /// Raw bearer credential as presented by the caller.
    pub credential: String,
    /// Optional caller-asserted tenant; a mismatch with the resolved tenant
    /// is treated as an authentication failure.
    pub tenant_hint: Option<Uuid>,
    /// Fully qualified action name, e.g. `iam.keys.create`.
    pub action: String,
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub payload: Value,
    pub source_ip: String,
    /// Caller-supplied deadline in milliseconds; the kernel default applies
    /// when absent.
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Allowed,
    Denied,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<Dimension>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// The envelope returned for every dispatch, success or failure. Replays of
/// an idempotency key return the stored envelope byte-for-byte, original
/// `request_id` included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub request_id: Uuid,
    pub status: ResponseStatus,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl ActionResponse {
    pub fn allowed(request_id: Uuid, data: Value) -> Self {
        Self {
            request_id,
            status: ResponseStatus::Allowed,
            code: "ok".to_string(),
            data: Some(data),
            error: None,
        }
    }

    pub fn from_error(request_id: Uuid, err: &KernelError) -> Self {
        let (missing_scope, dimension, retry_after_secs) = match err {
            KernelError::Forbidden { missing_scope } => {
                (Some(missing_scope.clone()), None, None)
            }
            KernelError::RateLimited {
                dimension,
                retry_after_secs,
                ..
            } => (None, Some(*dimension), Some(*retry_after_secs)),
            _ => (None, None, None),
        };
        Self {
            request_id,
            status: err.status(),
            code: err.code().to_string(),
            data: None,
            error: Some(ErrorDetail {
                message: err.public_message(),
                missing_scope,
                dimension,
                retry_after_secs,
            }),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.status == ResponseStatus::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_response_names_missing_scope() {
        let err = KernelError::Forbidden {
            missing_scope: "iam.keys:write".to_string(),
        };
        let resp = ActionResponse::from_error(Uuid::new_v4(), &err);
        assert_eq!(resp.status, ResponseStatus::Denied);
        assert_eq!(resp.code, "scope_denied");
        assert_eq!(
            resp.error.unwrap().missing_scope.as_deref(),
            Some("iam.keys:write")
        );
    }

    #[test]
    fn rate_limited_response_carries_retry_hint() {
        let err = KernelError::RateLimited {
            dimension: Dimension::ApiKey,
            window: "burst".to_string(),
            retry_after_secs: 42,
        };
        let resp = ActionResponse::from_error(Uuid::new_v4(), &err);
        let detail = resp.error.unwrap();
        assert_eq!(detail.dimension, Some(Dimension::ApiKey));
        assert_eq!(detail.retry_after_secs, Some(42));
    }
}
