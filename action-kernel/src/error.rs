use thiserror::Error;

use crate::ratelimit::Dimension;
use crate::request::ResponseStatus;

/// Kernel error taxonomy.
///
/// Every failure that reaches a caller is one of these variants; raw backend
/// errors are wrapped in [`KernelError::Internal`] and never leak their
/// message into the response envelope.
#[derive(Error, Debug)]
pub enum KernelError {
    /// Credential missing, unknown, malformed, expired, or revoked. All of
    /// these collapse to one variant so callers cannot distinguish "exists
    /// but expired" from "does not exist".
    #[error("Invalid API key")]
    Unauthenticated,

    #[error("Insufficient scope: required {missing_scope}")]
    Forbidden { missing_scope: String },

    #[error("Unknown action: {name}")]
    UnknownAction { name: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Idempotency conflict: {0}")]
    IdempotencyConflict(String),

    #[error("Rate limited on {dimension} ({window}); retry after {retry_after_secs}s")]
    RateLimited {
        dimension: Dimension,
        window: String,
        retry_after_secs: u64,
    },

    #[error("Ceiling exceeded: {ceiling}")]
    CeilingExceeded { ceiling: String },

    #[error("Invalid or expired verification token")]
    InvalidVerificationToken,

    #[error("Action timed out")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl KernelError {
    /// Machine-readable code carried in the response envelope and audit trail.
    pub fn code(&self) -> &'static str {
        match self {
            KernelError::Unauthenticated => "invalid_api_key",
            KernelError::Forbidden { .. } => "scope_denied",
            KernelError::UnknownAction { .. } => "unknown_action",
            KernelError::InvalidInput(_) => "validation_error",
            KernelError::IdempotencyConflict(_) => "idempotency_conflict",
            KernelError::RateLimited { .. } => "rate_limited",
            KernelError::CeilingExceeded { .. } => "ceiling_exceeded",
            KernelError::InvalidVerificationToken => "invalid_verification_token",
            KernelError::Timeout => "timeout",
            KernelError::Internal(_) => "internal_error",
        }
    }

    /// Envelope status for this error: policy rejections are `Denied`,
    /// everything else is `Error`.
    pub fn status(&self) -> ResponseStatus {
        match self {
            KernelError::Unauthenticated
            | KernelError::Forbidden { .. }
            | KernelError::RateLimited { .. }
            | KernelError::CeilingExceeded { .. } => ResponseStatus::Denied,
            _ => ResponseStatus::Error,
        }
    }

    /// Message safe to return to the caller. Internal causes are collapsed.
    pub fn public_message(&self) -> String {
        match self {
            KernelError::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }
}
