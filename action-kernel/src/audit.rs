//! Append-only audit trail.
//!
//! The recorder bounds how long an append may hold the request path; a slow
//! or failing sink is reported on the tracing error channel and never turns
//! a successful action into a failed response.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::AuditEntry;
use crate::store::StoreError;

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<(), StoreError>;
}

pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
    flush_timeout: Duration,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>, flush_timeout: Duration) -> Self {
        Self {
            sink,
            flush_timeout,
        }
    }

    /// Append an entry, waiting at most the flush timeout. Failures are
    /// logged to the secondary channel; the caller's outcome is unaffected.
    pub async fn record(&self, entry: AuditEntry) {
        let action = entry.action.clone();
        let request_id = entry.request_id;
        match tokio::time::timeout(self.flush_timeout, self.sink.append(entry)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(%request_id, action, error = %e, "Audit append failed");
            }
            Err(_) => {
                tracing::error!(%request_id, action, "Audit append timed out");
            }
        }
    }
}

/// In-memory sink for tests and embedded hosts.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().expect("audit lock poisoned").clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, entry: AuditEntry) -> Result<(), StoreError> {
        self.entries
            .lock()
            .map_err(|e| StoreError::Corrupt(format!("audit lock poisoned: {}", e)))?
            .push(entry);
        Ok(())
    }
}

/// Redact secret-bearing fields from a payload before it reaches the trail.
/// Matches by field name, recursively.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (name, field) in map {
                if is_sensitive(name) {
                    out.insert(name.clone(), Value::String("[REDACTED]".to_string()));
                } else {
                    out.insert(name.clone(), redact(field));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

fn is_sensitive(field: &str) -> bool {
    let name = field.to_ascii_lowercase();
    name.contains("secret")
        || name.contains("password")
        || name.contains("token")
        || name == "key"
        || name == "api_key"
        || name == "credential"
        || name == "authorization"
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sensitive_fields_are_masked_recursively() {
        let payload = json!({
            "label": "ci",
            "token": "vt_abc123",
            "nested": {"password": "hunter2", "count": 3},
            "items": [{"api_key": "ak_live_x"}],
        });
        let redacted = redact(&payload);
        assert_eq!(redacted["label"], "ci");
        assert_eq!(redacted["token"], "[REDACTED]");
        assert_eq!(redacted["nested"]["password"], "[REDACTED]");
        assert_eq!(redacted["nested"]["count"], 3);
        assert_eq!(redacted["items"][0]["api_key"], "[REDACTED]");
    }

    #[test]
    fn identifier_fields_survive_redaction() {
        let payload = json!({"key_id": "0b7c", "idempotency_key": "abc"});
        let redacted = redact(&payload);
        assert_eq!(redacted["key_id"], "0b7c");
        // idempotency_key is not a secret; it is caller-chosen routing state.
        assert_eq!(redacted["idempotency_key"], "abc");
    }
}
