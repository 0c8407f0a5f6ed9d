//! In-memory store implementations.
//!
//! Single-lock maps, the same shape as a Redis/Postgres deployment but with
//! every compound operation made atomic by the lock. These back the test
//! suite and small embedded hosts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Directory, KvStore, StoreError};
use crate::clock::Clock;
use crate::models::{ApiKey, Tenant, VerificationToken};

struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

pub struct MemoryKv {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, StoreError> {
        self.entries
            .lock()
            .map_err(|e| StoreError::Corrupt(format!("kv lock poisoned: {}", e)))
    }

    fn live<'a>(
        map: &'a HashMap<String, Entry>,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<&'a Entry> {
        map.get(key)
            .filter(|e| e.expires_at.map_or(true, |at| now < at))
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        let map = self.lock()?;
        Ok(Self::live(&map, key, now).map(|e| e.value.clone()))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut map = self.lock()?;
        map.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + chrono::Duration::from_std(ttl).unwrap_or_default()),
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut map = self.lock()?;
        if Self::live(&map, key, now).is_some() {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + chrono::Duration::from_std(ttl).unwrap_or_default()),
            },
        );
        Ok(true)
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut map = self.lock()?;
        let next = match Self::live(&map, key, now) {
            Some(entry) => entry
                .value
                .parse::<u64>()
                .map_err(|e| StoreError::Corrupt(format!("counter {}: {}", key, e)))?
                .saturating_add(1),
            None => 1,
        };
        let expires_at = match map.get(key).and_then(|e| e.expires_at) {
            // Keep the original window end when the counter is still live.
            Some(at) if next > 1 => Some(at),
            _ => Some(now + chrono::Duration::from_std(ttl).unwrap_or_default()),
        };
        map.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut map = self.lock()?;
        map.remove(key);
        Ok(())
    }
}

#[derive(Default)]
struct DirectoryState {
    tenants: HashMap<Uuid, Tenant>,
    api_keys: HashMap<Uuid, ApiKey>,
    tokens: HashMap<Uuid, VerificationToken>,
}

#[derive(Default)]
pub struct MemoryDirectory {
    state: Mutex<DirectoryState>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, DirectoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|e| StoreError::Corrupt(format!("directory lock poisoned: {}", e)))
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), StoreError> {
        self.lock()?.tenants.insert(tenant.tenant_id, tenant.clone());
        Ok(())
    }

    async fn find_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, StoreError> {
        Ok(self.lock()?.tenants.get(&tenant_id).cloned())
    }

    async fn mark_tenant_verified(&self, tenant_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.tenants.get_mut(&tenant_id) {
            Some(tenant) => {
                tenant.verified = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_api_key(&self, key: &ApiKey) -> Result<(), StoreError> {
        self.lock()?.api_keys.insert(key.key_id, key.clone());
        Ok(())
    }

    async fn find_api_key_by_lookup_hash(
        &self,
        lookup_hash: &str,
    ) -> Result<Option<ApiKey>, StoreError> {
        Ok(self
            .lock()?
            .api_keys
            .values()
            .find(|k| k.lookup_hash == lookup_hash)
            .cloned())
    }

    async fn list_api_keys(&self, tenant_id: Uuid) -> Result<Vec<ApiKey>, StoreError> {
        let mut keys: Vec<ApiKey> = self
            .lock()?
            .api_keys
            .values()
            .filter(|k| k.tenant_id == tenant_id)
            .cloned()
            .collect();
        keys.sort_by_key(|k| k.created_at);
        Ok(keys)
    }

    async fn revoke_api_key(&self, tenant_id: Uuid, key_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.api_keys.get_mut(&key_id) {
            Some(key) if key.tenant_id == tenant_id => {
                if key.revoked_at.is_none() {
                    key.revoked_at = Some(Utc::now());
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch_api_key_last_used(
        &self,
        key_id: Uuid,
        when: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(key) = self.lock()?.api_keys.get_mut(&key_id) {
            key.last_used_at = Some(when);
        }
        Ok(())
    }

    async fn insert_verification_token(
        &self,
        token: &VerificationToken,
    ) -> Result<(), StoreError> {
        self.lock()?.tokens.insert(token.token_id, token.clone());
        Ok(())
    }

    async fn find_verification_token(
        &self,
        lookup_hash: &str,
    ) -> Result<Option<VerificationToken>, StoreError> {
        Ok(self
            .lock()?
            .tokens
            .values()
            .find(|t| t.lookup_hash == lookup_hash)
            .cloned())
    }

    async fn consume_verification_token(&self, token_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.tokens.get_mut(&token_id) {
            Some(token) if token.consumed_at.is_none() => {
                token.consumed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
