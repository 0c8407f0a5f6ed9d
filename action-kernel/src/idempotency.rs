//! Idempotency-keyed deduplication.
//!
//! Records live under `(tenant, idempotency key)` and hold a fingerprint of
//! the original request plus, once finished, the serialized response
//! envelope. The pending reservation is taken with an atomic set-if-absent,
//! so two concurrent callers with the same key can never both run a
//! side-effecting handler: one wins the reservation, the other polls the
//! record and either replays the completed envelope or gives up.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::request::ActionResponse;
use crate::store::{with_retries, KvStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RecordState {
    Pending,
    Done,
}

#[derive(Debug, Serialize, Deserialize)]
struct Record {
    state: RecordState,
    fingerprint: String,
    response: Option<ActionResponse>,
}

/// Fingerprint of a request: action name plus canonical payload JSON.
/// Same key + different fingerprint is a conflict, never a replay.
pub fn fingerprint(action: &str, payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(action.as_bytes());
    hasher.update([0u8]);
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

pub struct IdempotencyGuard {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
    pending_retries: u32,
    pending_backoff: Duration,
    retry: crate::config::RetryPolicy,
}

impl IdempotencyGuard {
    pub fn new(kv: Arc<dyn KvStore>, cfg: &KernelConfig) -> Self {
        Self {
            kv,
            ttl: Duration::from_secs(cfg.idempotency_ttl_secs),
            pending_retries: cfg.idempotency_pending_retries,
            pending_backoff: Duration::from_millis(cfg.idempotency_pending_backoff_ms),
            retry: cfg.store_retry.clone(),
        }
    }

    fn record_key(tenant_id: Uuid, idempotency_key: &str) -> String {
        format!("idem:{}:{}", tenant_id, idempotency_key)
    }

    fn parse(raw: &str) -> Result<Record, StoreError> {
        serde_json::from_str(raw)
            .map_err(|e| StoreError::Corrupt(format!("idempotency record: {}", e)))
    }

    /// Read-only probe, run before any quota is consumed: a completed match
    /// replays without touching the limiter; a fingerprint mismatch is a
    /// conflict regardless of state.
    pub async fn probe(
        &self,
        tenant_id: Uuid,
        idempotency_key: &str,
        fingerprint: &str,
    ) -> Result<Option<ActionResponse>, KernelError> {
        let key = Self::record_key(tenant_id, idempotency_key);
        let Some(raw) = with_retries(&self.retry, "idempotency_probe", || self.kv.get(&key)).await?
        else {
            return Ok(None);
        };
        let record = Self::parse(&raw)?;
        if record.fingerprint != fingerprint {
            return Err(KernelError::IdempotencyConflict(
                "idempotency key was already used with a different request".to_string(),
            ));
        }
        match record.state {
            RecordState::Done => Ok(record.response),
            RecordState::Pending => Ok(None),
        }
    }

    /// Take the in-flight reservation, or observe someone else's outcome.
    ///
    /// Returns `None` when this caller owns the reservation and must later
    /// [`complete`](Self::complete) or [`release`](Self::release) it, and
    /// `Some(response)` when a concurrent caller already finished. A caller
    /// racing a still-pending reservation polls briefly and then fails
    /// rather than risking a second execution.
    pub async fn reserve(
        &self,
        tenant_id: Uuid,
        idempotency_key: &str,
        fingerprint: &str,
    ) -> Result<Option<ActionResponse>, KernelError> {
        let key = Self::record_key(tenant_id, idempotency_key);
        let pending = serde_json::to_string(&Record {
            state: RecordState::Pending,
            fingerprint: fingerprint.to_string(),
            response: None,
        })
        .map_err(|e| KernelError::Internal(anyhow::anyhow!("serialize record: {}", e)))?;

        let won = with_retries(&self.retry, "idempotency_reserve", || {
            self.kv.set_if_absent(&key, &pending, self.ttl)
        })
        .await?;
        if won {
            return Ok(None);
        }

        for _ in 0..=self.pending_retries {
            let Some(raw) =
                with_retries(&self.retry, "idempotency_poll", || self.kv.get(&key)).await?
            else {
                // The other caller released its reservation; claim it.
                let won = with_retries(&self.retry, "idempotency_reserve", || {
                    self.kv.set_if_absent(&key, &pending, self.ttl)
                })
                .await?;
                if won {
                    return Ok(None);
                }
                continue;
            };
            let record = Self::parse(&raw)?;
            if record.fingerprint != fingerprint {
                return Err(KernelError::IdempotencyConflict(
                    "idempotency key was already used with a different request".to_string(),
                ));
            }
            match record.state {
                RecordState::Done => {
                    return Ok(Some(record.response.ok_or_else(|| {
                        KernelError::Internal(anyhow::anyhow!("completed record missing response"))
                    })?))
                }
                RecordState::Pending => tokio::time::sleep(self.pending_backoff).await,
            }
        }

        Err(KernelError::IdempotencyConflict(
            "a request with this idempotency key is still in flight".to_string(),
        ))
    }

    /// Store the finished envelope under the reservation. Runs after the
    /// handler, so failures are logged and swallowed rather than retried.
    pub async fn complete(
        &self,
        tenant_id: Uuid,
        idempotency_key: &str,
        fingerprint: &str,
        response: &ActionResponse,
    ) {
        let key = Self::record_key(tenant_id, idempotency_key);
        let record = Record {
            state: RecordState::Done,
            fingerprint: fingerprint.to_string(),
            response: Some(response.clone()),
        };
        match serde_json::to_string(&record) {
            Ok(raw) => {
                if let Err(e) = self.kv.set_with_ttl(&key, &raw, self.ttl).await {
                    tracing::error!(key, error = %e, "Failed to persist idempotency record");
                }
            }
            Err(e) => tracing::error!(key, error = %e, "Failed to serialize idempotency record"),
        }
    }

    /// Drop the reservation after a clean handler failure so the caller may
    /// retry with the same key. Best-effort: a leaked reservation expires
    /// with the TTL.
    pub async fn release(&self, tenant_id: Uuid, idempotency_key: &str) {
        let key = Self::record_key(tenant_id, idempotency_key);
        if let Err(e) = self.kv.delete(&key).await {
            tracing::error!(key, error = %e, "Failed to release idempotency reservation");
        }
    }
}
