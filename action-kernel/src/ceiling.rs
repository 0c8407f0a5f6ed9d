//! Absolute ceilings.
//!
//! Constants no tier or configuration may raise, checked after identity
//! resolution and before the configured rate limits. A breach means either
//! an attack or a misconfigured limit, so it is logged at error severity
//! where an ordinary rate-limit rejection only warns.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::clock::Clock;
use crate::config::RetryPolicy;
use crate::error::KernelError;
use crate::store::{with_retries, KvStore};

/// Hard per-tenant throughput bound, independent of tier.
pub const TENANT_ACTIONS_PER_SECOND: u64 = 50;

/// Hard bound on serialized payload size.
pub const MAX_PAYLOAD_BYTES: usize = 1 << 20;

pub struct CeilingEnforcer {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl CeilingEnforcer {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>, retry: RetryPolicy) -> Self {
        Self { kv, clock, retry }
    }

    pub async fn check(&self, tenant_id: Uuid, payload_bytes: usize) -> Result<(), KernelError> {
        if payload_bytes > MAX_PAYLOAD_BYTES {
            tracing::error!(
                tenant_id = %tenant_id,
                payload_bytes,
                ceiling = MAX_PAYLOAD_BYTES,
                "Payload size ceiling exceeded"
            );
            return Err(KernelError::CeilingExceeded {
                ceiling: "payload_bytes".to_string(),
            });
        }

        let second = self.clock.now().timestamp().max(0) as u64;
        let key = format!("ceil:tenant:{}:{}", tenant_id, second);
        let count = with_retries(&self.retry, "ceiling_incr", || {
            self.kv.incr_with_ttl(&key, Duration::from_secs(2))
        })
        .await?;

        if count > TENANT_ACTIONS_PER_SECOND {
            tracing::error!(
                tenant_id = %tenant_id,
                count,
                ceiling = TENANT_ACTIONS_PER_SECOND,
                "Per-tenant throughput ceiling exceeded"
            );
            return Err(KernelError::CeilingExceeded {
                ceiling: "tenant_actions_per_second".to_string(),
            });
        }
        Ok(())
    }
}
