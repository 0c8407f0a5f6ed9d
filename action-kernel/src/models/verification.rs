//! Single-use tenant verification token.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const TOKEN_PREFIX: &str = "vt_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationToken {
    pub token_id: Uuid,
    pub tenant_id: Uuid,
    /// SHA-256 hex of the raw secret; the secret itself is never stored.
    pub lookup_hash: String,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl VerificationToken {
    /// Issue a fresh token for a tenant. Returns the record and the raw
    /// secret, which is handed to the signup workflow exactly once.
    pub fn issue(tenant_id: Uuid, ttl_secs: u64, now: DateTime<Utc>) -> (Self, String) {
        let mut secret_bytes = [0u8; 24];
        use rand::RngCore;
        rand::rngs::OsRng.fill_bytes(&mut secret_bytes);
        let raw = format!("{}{}", TOKEN_PREFIX, hex::encode(secret_bytes));

        let token = Self {
            token_id: Uuid::new_v4(),
            tenant_id,
            lookup_hash: Self::lookup_hash_for(&raw),
            expires_at: now + Duration::seconds(ttl_secs as i64),
            consumed_at: None,
            created_at: now,
        };
        (token, raw)
    }

    pub fn lookup_hash_for(raw: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }
}
