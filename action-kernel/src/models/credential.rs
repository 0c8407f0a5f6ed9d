//! API key credential model.
//!
//! The raw secret is never stored: keys carry an Argon2 verifier hash plus a
//! SHA-256 lookup hash so resolution is a single indexed fetch, never a scan
//! over verifier hashes.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::KernelError;

pub const KEY_PREFIX_LIVE: &str = "ak_live_";
/// Display prefix length: scheme marker plus the first few secret chars.
const DISPLAY_PREFIX_LEN: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub key_id: Uuid,
    pub tenant_id: Uuid,
    pub label: String,
    /// Truncated, non-secret display form (e.g. `ak_live_3f9c`).
    pub key_prefix: String,
    /// Argon2 hash of the full secret, for verification.
    pub verifier_hash: String,
    /// SHA-256 hex of the full secret, for lookup.
    pub lookup_hash: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    /// Mint a new key. Returns the record and the raw secret; the secret is
    /// shown to the caller exactly once and cannot be recovered afterwards.
    pub fn generate(
        tenant_id: Uuid,
        label: String,
        scopes: Vec<String>,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(Self, String), KernelError> {
        let mut secret_bytes = [0u8; 24];
        use rand::RngCore;
        rand::rngs::OsRng.fill_bytes(&mut secret_bytes);
        let raw = format!("{}{}", KEY_PREFIX_LIVE, hex::encode(secret_bytes));

        let key = Self {
            key_id: Uuid::new_v4(),
            tenant_id,
            label,
            key_prefix: raw.chars().take(DISPLAY_PREFIX_LEN).collect(),
            verifier_hash: hash_secret(&raw)?,
            lookup_hash: Self::lookup_hash_for(&raw),
            scopes,
            expires_at,
            revoked_at: None,
            created_at: now,
            last_used_at: None,
        };
        Ok((key, raw))
    }

    pub fn lookup_hash_for(raw: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Constant-cost Argon2 verification of a presented secret.
    pub fn verify_secret(&self, raw: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(&self.verifier_hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(raw.as_bytes(), &parsed)
            .is_ok()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn summary(&self) -> ApiKeySummary {
        ApiKeySummary {
            key_id: self.key_id,
            key_prefix: self.key_prefix.clone(),
            label: self.label.clone(),
            scopes: self.scopes.clone(),
            expires_at: self.expires_at,
            revoked_at: self.revoked_at,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
        }
    }
}

fn hash_secret(raw: &str) -> Result<String, KernelError> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(raw.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash API key: {}", e))?
        .to_string())
}

/// Key view safe to return from listings: no hashes, no secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeySummary {
    pub key_id: Uuid,
    pub key_prefix: String,
    pub label: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}
