//! Multi-window, multi-dimension rate limiting.
//!
//! Fixed windows are keyed by the quantized window start, so resets are
//! computed lazily on access from the injected clock; there is no ticking
//! timer. The counter is incremented first and checked after, so concurrent
//! callers can never both observe "under limit" and jointly exceed it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{KernelConfig, RateLimitConfig, RetryPolicy, WindowLimit};
use crate::error::KernelError;
use crate::models::Tier;
use crate::store::{with_retries, KvStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dimension {
    ApiKey,
    Tenant,
    SourceIp,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::ApiKey => "api-key",
            Dimension::Tenant => "tenant",
            Dimension::SourceIp => "source-ip",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    cfg: RateLimitConfig,
    retry: RetryPolicy,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>, cfg: &KernelConfig) -> Self {
        Self {
            kv,
            clock,
            cfg: cfg.rate_limits.clone(),
            retry: cfg.store_retry.clone(),
        }
    }

    /// Evaluate every window of one dimension; any breach blocks the
    /// request. `limit_multiplier` scales the configured limits (tier
    /// scaling on the tenant dimension; 1 elsewhere).
    pub async fn check(
        &self,
        dimension: Dimension,
        id: &str,
        limit_multiplier: u64,
    ) -> Result<(), KernelError> {
        let windows = match dimension {
            Dimension::ApiKey => &self.cfg.api_key,
            Dimension::Tenant => &self.cfg.tenant,
            Dimension::SourceIp => &self.cfg.source_ip,
        };
        let now_secs = self.clock.now().timestamp().max(0) as u64;

        for window in windows {
            let limit = window.limit.saturating_mul(limit_multiplier.max(1));
            let window_index = now_secs / window.period_secs;
            let key = format!(
                "rl:{}:{}:{}:{}",
                dimension, id, window.name, window_index
            );
            let ttl = Duration::from_secs(window.period_secs);

            let count = with_retries(&self.retry, "rate_limit_incr", || {
                self.kv.incr_with_ttl(&key, ttl)
            })
            .await?;

            if count > limit {
                let retry_after_secs = (window_index + 1) * window.period_secs - now_secs;
                tracing::warn!(
                    dimension = %dimension,
                    window = %window.name,
                    limit,
                    count,
                    "Rate limit exceeded"
                );
                return Err(KernelError::RateLimited {
                    dimension,
                    window: window.name.clone(),
                    retry_after_secs,
                });
            }
        }
        Ok(())
    }

    /// Convenience: evaluate all three dimensions for one request, in the
    /// order api-key, tenant, source-ip.
    pub async fn check_request(
        &self,
        credential_id: Uuid,
        tenant_id: Uuid,
        tier: Tier,
        source_ip: &str,
    ) -> Result<(), KernelError> {
        self.check(Dimension::ApiKey, &credential_id.to_string(), 1)
            .await?;
        self.check(
            Dimension::Tenant,
            &tenant_id.to_string(),
            self.cfg.tier_multiplier(tier),
        )
        .await?;
        self.check(Dimension::SourceIp, source_ip, 1).await
    }
}

/// Build a config with a single window per dimension; test helper shape.
pub fn single_window_config(name: &str, period_secs: u64, limit: u64) -> RateLimitConfig {
    let windows = vec![WindowLimit::new(name, period_secs, limit)];
    RateLimitConfig {
        api_key: windows.clone(),
        tenant: windows.clone(),
        source_ip: windows,
        ..RateLimitConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryKv;
    use chrono::Utc;

    fn limiter(limit: u64, period_secs: u64) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let kv = Arc::new(MemoryKv::new(clock.clone()));
        let cfg = KernelConfig {
            rate_limits: single_window_config("burst", period_secs, limit),
            ..Default::default()
        };
        (RateLimiter::new(kv, clock.clone(), &cfg), clock)
    }

    #[tokio::test]
    async fn limit_rejects_exactly_at_n_plus_one() {
        let (limiter, _clock) = limiter(3, 300);
        for _ in 0..3 {
            limiter.check(Dimension::ApiKey, "k1", 1).await.unwrap();
        }
        let err = limiter.check(Dimension::ApiKey, "k1", 1).await.unwrap_err();
        match err {
            KernelError::RateLimited {
                dimension,
                retry_after_secs,
                ..
            } => {
                assert_eq!(dimension, Dimension::ApiKey);
                assert!(retry_after_secs > 0 && retry_after_secs <= 300);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn counter_resets_after_the_window_elapses() {
        let (limiter, clock) = limiter(1, 300);
        limiter.check(Dimension::ApiKey, "k1", 1).await.unwrap();
        assert!(limiter.check(Dimension::ApiKey, "k1", 1).await.is_err());

        clock.advance(chrono::Duration::seconds(301));
        limiter.check(Dimension::ApiKey, "k1", 1).await.unwrap();
    }

    #[tokio::test]
    async fn dimensions_are_tracked_independently() {
        let (limiter, _clock) = limiter(1, 300);
        limiter.check(Dimension::ApiKey, "k1", 1).await.unwrap();
        limiter.check(Dimension::ApiKey, "k2", 1).await.unwrap();
        limiter.check(Dimension::Tenant, "k1", 1).await.unwrap();
    }

    #[tokio::test]
    async fn tier_multiplier_raises_the_tenant_limit() {
        let (limiter, _clock) = limiter(1, 300);
        limiter.check(Dimension::Tenant, "t1", 10).await.unwrap();
        limiter.check(Dimension::Tenant, "t1", 10).await.unwrap();
        // Multiplier 1 on the same counter would already be over.
        assert!(limiter.check(Dimension::Tenant, "t1", 1).await.is_err());
    }
}
