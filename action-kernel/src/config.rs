//! Kernel configuration.
//!
//! Everything a host may tune lives here; the absolute ceilings in
//! [`crate::ceiling`] deliberately do not.

use std::collections::HashMap;

use serde::Deserialize;

use crate::models::Tier;

/// One fixed rate-limit window.
#[derive(Debug, Clone, Deserialize)]
pub struct WindowLimit {
    /// Short window label carried in rejections, e.g. "burst".
    pub name: String,
    pub period_secs: u64,
    pub limit: u64,
}

impl WindowLimit {
    pub fn new(name: &str, period_secs: u64, limit: u64) -> Self {
        Self {
            name: name.to_string(),
            period_secs,
            limit,
        }
    }
}

/// Per-dimension window sets. Each window is evaluated independently; any
/// breach blocks the request.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub api_key: Vec<WindowLimit>,
    pub tenant: Vec<WindowLimit>,
    pub source_ip: Vec<WindowLimit>,
    /// Tenant-dimension limits are multiplied by the tenant's tier factor.
    pub tier_multipliers: HashMap<Tier, u64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            api_key: vec![
                WindowLimit::new("burst", 300, 100),
                WindowLimit::new("hourly", 3_600, 1_000),
                WindowLimit::new("daily", 86_400, 10_000),
            ],
            tenant: vec![
                WindowLimit::new("burst", 300, 200),
                WindowLimit::new("hourly", 3_600, 2_000),
                WindowLimit::new("daily", 86_400, 20_000),
            ],
            source_ip: vec![
                WindowLimit::new("burst", 300, 300),
                WindowLimit::new("hourly", 3_600, 3_000),
                WindowLimit::new("daily", 86_400, 30_000),
            ],
            tier_multipliers: HashMap::from([(Tier::Free, 1), (Tier::Pro, 10)]),
        }
    }
}

impl RateLimitConfig {
    pub fn tier_multiplier(&self, tier: Tier) -> u64 {
        self.tier_multipliers.get(&tier).copied().unwrap_or(1)
    }
}

/// Bounded retry of transient storage failures. Applied only before a
/// side-effecting handler has run.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let backoff =
            self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        (backoff as u64).min(self.max_backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KernelConfig {
    pub rate_limits: RateLimitConfig,
    /// Retention of idempotency records (24h class).
    pub idempotency_ttl_secs: u64,
    /// How many times a caller racing a pending reservation re-reads the
    /// record before giving up.
    pub idempotency_pending_retries: u32,
    pub idempotency_pending_backoff_ms: u64,
    /// Lifetime of newly issued verification tokens (24h class).
    pub verification_token_ttl_secs: u64,
    /// Upper bound on handler execution when the caller supplies no timeout.
    pub handler_timeout_secs: u64,
    /// Bound on how long an audit append may hold up the response.
    pub audit_flush_timeout_ms: u64,
    pub store_retry: RetryPolicy,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            rate_limits: RateLimitConfig::default(),
            idempotency_ttl_secs: 86_400,
            idempotency_pending_retries: 5,
            idempotency_pending_backoff_ms: 50,
            verification_token_ttl_secs: 86_400,
            handler_timeout_secs: 30,
            audit_flush_timeout_ms: 250,
            store_retry: RetryPolicy::default(),
        }
    }
}
