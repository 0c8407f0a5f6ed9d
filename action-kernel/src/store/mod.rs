//! Storage access contracts.
//!
//! The kernel owns no storage engine. Hosts inject two backends: a [`KvStore`]
//! with atomic check-and-set operations (idempotency records, rate-limit
//! counters) and a [`Directory`] of durable entities (tenants, credentials,
//! verification tokens). In-memory implementations live in [`memory`] and
//! back the test suite.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::config::RetryPolicy;
use crate::error::KernelError;
use crate::models::{ApiKey, Tenant, VerificationToken};

pub use memory::{MemoryDirectory, MemoryKv};

#[derive(Error, Debug)]
pub enum StoreError {
    /// Transient backend failure; eligible for bounded retry.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Stored data failed to parse or violated an invariant. Not retryable.
    #[error("Store corruption: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<StoreError> for KernelError {
    fn from(err: StoreError) -> Self {
        KernelError::Internal(anyhow::anyhow!(err))
    }
}

/// Atomic key/value operations with TTL. Every compound operation here must
/// be atomic with respect to concurrent callers; races in these primitives
/// translate directly into double side effects or quota bypass.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration)
        -> Result<(), StoreError>;

    /// Store the value only if the key is absent. Returns true when this
    /// caller won the write.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Atomically increment a counter, creating it with the given TTL on
    /// first increment. Returns the post-increment value.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Durable entity lookups and the two compare-and-set transitions the kernel
/// performs (token consumption, tenant verification).
#[async_trait]
pub trait Directory: Send + Sync {
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), StoreError>;
    async fn find_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, StoreError>;
    /// Flip the verification flag. Returns false if the tenant is unknown.
    async fn mark_tenant_verified(&self, tenant_id: Uuid) -> Result<bool, StoreError>;

    async fn insert_api_key(&self, key: &ApiKey) -> Result<(), StoreError>;
    async fn find_api_key_by_lookup_hash(
        &self,
        lookup_hash: &str,
    ) -> Result<Option<ApiKey>, StoreError>;
    async fn list_api_keys(&self, tenant_id: Uuid) -> Result<Vec<ApiKey>, StoreError>;
    /// Returns false when the key does not exist under this tenant.
    async fn revoke_api_key(&self, tenant_id: Uuid, key_id: Uuid) -> Result<bool, StoreError>;
    async fn touch_api_key_last_used(
        &self,
        key_id: Uuid,
        when: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn insert_verification_token(
        &self,
        token: &VerificationToken,
    ) -> Result<(), StoreError>;
    async fn find_verification_token(
        &self,
        lookup_hash: &str,
    ) -> Result<Option<VerificationToken>, StoreError>;
    /// Atomically mark a token consumed. Returns true for exactly one caller
    /// per token, ever.
    async fn consume_verification_token(&self, token_id: Uuid) -> Result<bool, StoreError>;
}

/// Execute a storage operation with bounded retry and exponential backoff.
///
/// Only transient [`StoreError::Unavailable`] failures are retried. Callers
/// must not wrap operations that run after a side-effecting handler has been
/// invoked.
pub async fn with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    f: F,
) -> Result<T, StoreError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(operation, attempt = attempt + 1, "Store call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let backoff = policy.backoff_ms(attempt);
                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    error = %err,
                    backoff_ms = backoff,
                    "Transient store failure, retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                attempt += 1;
            }
            Err(err) => {
                tracing::warn!(operation, attempt = attempt + 1, error = %err, "Store call failed");
                return Err(err);
            }
        }
    }
}
