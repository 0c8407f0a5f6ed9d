//! Append-only audit entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Allowed,
    Denied,
    Error,
}

/// One attempt against the kernel, recorded regardless of outcome. Entries
/// are never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub request_id: Uuid,
    /// Absent when the credential never resolved.
    pub tenant_id: Option<Uuid>,
    pub credential_id: Option<Uuid>,
    pub action: String,
    pub outcome: AuditOutcome,
    /// Machine code: `ok` or the error code of the rejection.
    pub code: String,
    pub detail: Option<String>,
    pub source_ip: String,
    pub idempotency_key: Option<String>,
    /// True when the response was served from the idempotency cache.
    pub replayed: bool,
    /// Redacted view of the request payload.
    pub payload: Value,
}
