//! Tenant verification state machine.
//!
//! `Unverified → Verified`, terminal. The transition consumes a single-use,
//! time-bounded token; consumption is an atomic compare-and-set in the
//! directory, so concurrent redemptions of the same token yield exactly one
//! success. Because the resolver recomputes effective scopes on every
//! request, flipping the flag immediately widens every existing credential
//! of the tenant; no reissue or cache invalidation happens here.

use std::sync::Arc;

use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::RetryPolicy;
use crate::error::KernelError;
use crate::models::VerificationToken;
use crate::store::{with_retries, Directory};

pub struct VerificationService {
    directory: Arc<dyn Directory>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl VerificationService {
    pub fn new(directory: Arc<dyn Directory>, clock: Arc<dyn Clock>, retry: RetryPolicy) -> Self {
        Self {
            directory,
            clock,
            retry,
        }
    }

    /// Redeem a raw token for the given tenant. Expired, consumed, unknown,
    /// and wrong-tenant tokens all fail with the same error.
    pub async fn redeem(&self, tenant_id: Uuid, raw_token: &str) -> Result<(), KernelError> {
        let lookup_hash = VerificationToken::lookup_hash_for(raw_token);
        let token = with_retries(&self.retry, "find_verification_token", || {
            self.directory.find_verification_token(&lookup_hash)
        })
        .await?
        .ok_or(KernelError::InvalidVerificationToken)?;

        let hash_matches: bool = token
            .lookup_hash
            .as_bytes()
            .ct_eq(lookup_hash.as_bytes())
            .into();
        if !hash_matches || token.tenant_id != tenant_id {
            return Err(KernelError::InvalidVerificationToken);
        }
        if token.is_expired(self.clock.now()) {
            return Err(KernelError::InvalidVerificationToken);
        }

        // The consumption CAS is deliberately not retried: after a transport
        // failure we cannot know whether the flip landed, and a blind retry
        // would report an already-consumed token as invalid.
        let consumed = self
            .directory
            .consume_verification_token(token.token_id)
            .await?;
        if !consumed {
            tracing::warn!(tenant_id = %tenant_id, "Re-presented verification token rejected");
            return Err(KernelError::InvalidVerificationToken);
        }

        let marked = with_retries(&self.retry, "mark_tenant_verified", || {
            self.directory.mark_tenant_verified(tenant_id)
        })
        .await?;
        if !marked {
            return Err(KernelError::Internal(anyhow::anyhow!(
                "verification token {} references missing tenant {}",
                token.token_id,
                tenant_id
            )));
        }

        tracing::info!(tenant_id = %tenant_id, "Tenant verified");
        Ok(())
    }
}
