//! Identity & scope resolution.
//!
//! Resolves a raw credential to its tenant and computes the effective
//! permission function for this request. Unknown, malformed, expired, and
//! revoked credentials are indistinguishable to the caller.

use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::config::RetryPolicy;
use crate::error::KernelError;
use crate::models::{credential::KEY_PREFIX_LIVE, Tenant};
use crate::scope;
use crate::store::{with_retries, Directory};

/// A resolved caller. Scope decisions go through [`Identity::permits`], which
/// consults the tenant's *current* verification state; nothing here is
/// cached across requests, so verifying a tenant widens every credential on
/// the next call.
#[derive(Debug, Clone)]
pub struct Identity {
    pub credential_id: Uuid,
    pub key_prefix: String,
    pub tenant: Tenant,
    /// Scopes as declared on the credential.
    pub scopes: Vec<String>,
}

impl Identity {
    pub fn permits(&self, required: &str) -> bool {
        scope::permits(&self.scopes, self.tenant.verified, required)
    }
}

pub struct IdentityResolver {
    directory: Arc<dyn Directory>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl IdentityResolver {
    pub fn new(directory: Arc<dyn Directory>, clock: Arc<dyn Clock>, retry: RetryPolicy) -> Self {
        Self {
            directory,
            clock,
            retry,
        }
    }

    /// Authenticate a raw credential and load its tenant.
    ///
    /// Lookup goes through the SHA-256 lookup hash; the Argon2 verifier hash
    /// is only ever checked against the single candidate that lookup
    /// returned.
    pub async fn resolve(
        &self,
        raw_credential: &str,
        tenant_hint: Option<Uuid>,
    ) -> Result<Identity, KernelError> {
        if !raw_credential.starts_with(KEY_PREFIX_LIVE) {
            return Err(KernelError::Unauthenticated);
        }

        let lookup_hash = crate::models::ApiKey::lookup_hash_for(raw_credential);
        let key = with_retries(&self.retry, "find_api_key", || {
            self.directory.find_api_key_by_lookup_hash(&lookup_hash)
        })
        .await?
        .ok_or(KernelError::Unauthenticated)?;

        let now = self.clock.now();
        if key.is_revoked() || key.is_expired(now) || !key.verify_secret(raw_credential) {
            tracing::warn!(key_prefix = %key.key_prefix, "Credential failed verification");
            return Err(KernelError::Unauthenticated);
        }

        let tenant = with_retries(&self.retry, "find_tenant", || {
            self.directory.find_tenant(key.tenant_id)
        })
        .await?
        .ok_or_else(|| {
            KernelError::Internal(anyhow::anyhow!(
                "credential {} references missing tenant {}",
                key.key_id,
                key.tenant_id
            ))
        })?;

        if tenant_hint.is_some_and(|hint| hint != tenant.tenant_id) {
            return Err(KernelError::Unauthenticated);
        }

        // Last-used bookkeeping never blocks or fails the request.
        let directory = self.directory.clone();
        let key_id = key.key_id;
        tokio::spawn(async move {
            if let Err(e) = directory.touch_api_key_last_used(key_id, now).await {
                tracing::debug!(error = %e, "Failed to update last_used_at");
            }
        });

        Ok(Identity {
            credential_id: key.key_id,
            key_prefix: key.key_prefix,
            tenant,
            scopes: key.scopes,
        })
    }
}
