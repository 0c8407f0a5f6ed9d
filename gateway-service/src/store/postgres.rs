//! PostgreSQL-backed [`Directory`] and audit sink.
//!
//! Runtime `query_as` with local row structs, converted into kernel models
//! at the boundary. Both compare-and-set transitions (token consumption,
//! tenant verification) ride single guarded UPDATE statements.

use action_kernel::models::{ApiKey, AuditEntry, Tenant, Tier, VerificationToken};
use action_kernel::store::{Directory, StoreError};
use action_kernel::AuditSink;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use uuid::Uuid;

use crate::config::DatabaseConfig;

/// Create a PostgreSQL connection pool.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.url)
        .await?;

    tracing::info!("Successfully connected to PostgreSQL");
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

#[derive(FromRow)]
struct TenantRow {
    tenant_id: Uuid,
    tenant_slug: String,
    tier: String,
    verified: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<TenantRow> for Tenant {
    type Error = StoreError;

    fn try_from(row: TenantRow) -> Result<Self, Self::Error> {
        let tier: Tier = row
            .tier
            .parse()
            .map_err(|e: String| StoreError::Corrupt(e))?;
        Ok(Tenant {
            tenant_id: row.tenant_id,
            tenant_slug: row.tenant_slug,
            tier,
            verified: row.verified,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct ApiKeyRow {
    key_id: Uuid,
    tenant_id: Uuid,
    label: String,
    key_prefix: String,
    verifier_hash: String,
    lookup_hash: String,
    scopes: Vec<String>,
    expires_at: Option<DateTime<Utc>>,
    revoked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
}

impl From<ApiKeyRow> for ApiKey {
    fn from(row: ApiKeyRow) -> Self {
        ApiKey {
            key_id: row.key_id,
            tenant_id: row.tenant_id,
            label: row.label,
            key_prefix: row.key_prefix,
            verifier_hash: row.verifier_hash,
            lookup_hash: row.lookup_hash,
            scopes: row.scopes,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
        }
    }
}

#[derive(FromRow)]
struct TokenRow {
    token_id: Uuid,
    tenant_id: Uuid,
    lookup_hash: String,
    expires_at: DateTime<Utc>,
    consumed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<TokenRow> for VerificationToken {
    fn from(row: TokenRow) -> Self {
        VerificationToken {
            token_id: row.token_id,
            tenant_id: row.tenant_id,
            lookup_hash: row.lookup_hash,
            expires_at: row.expires_at,
            consumed_at: row.consumed_at,
            created_at: row.created_at,
        }
    }
}

/// PostgreSQL directory wrapper.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn health_check(&self) -> Result<(), anyhow::Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Database health check failed: {}", e))?;
        Ok(())
    }
}

#[async_trait]
impl Directory for PgDirectory {
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tenants (tenant_id, tenant_slug, tier, verified, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(tenant.tenant_id)
        .bind(&tenant.tenant_slug)
        .bind(tenant.tier.as_str())
        .bind(tenant.verified)
        .bind(tenant.created_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn find_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, StoreError> {
        let row = sqlx::query_as::<_, TenantRow>("SELECT * FROM tenants WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;
        row.map(Tenant::try_from).transpose()
    }

    async fn mark_tenant_verified(&self, tenant_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE tenants SET verified = TRUE WHERE tenant_id = $1")
            .bind(tenant_id)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_api_key(&self, key: &ApiKey) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO api_keys (
                key_id, tenant_id, label, key_prefix, verifier_hash, lookup_hash,
                scopes, expires_at, revoked_at, created_at, last_used_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(key.key_id)
        .bind(key.tenant_id)
        .bind(&key.label)
        .bind(&key.key_prefix)
        .bind(&key.verifier_hash)
        .bind(&key.lookup_hash)
        .bind(&key.scopes)
        .bind(key.expires_at)
        .bind(key.revoked_at)
        .bind(key.created_at)
        .bind(key.last_used_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn find_api_key_by_lookup_hash(
        &self,
        lookup_hash: &str,
    ) -> Result<Option<ApiKey>, StoreError> {
        let row =
            sqlx::query_as::<_, ApiKeyRow>("SELECT * FROM api_keys WHERE lookup_hash = $1")
                .bind(lookup_hash)
                .fetch_optional(&self.pool)
                .await
                .map_err(unavailable)?;
        Ok(row.map(ApiKey::from))
    }

    async fn list_api_keys(&self, tenant_id: Uuid) -> Result<Vec<ApiKey>, StoreError> {
        let rows = sqlx::query_as::<_, ApiKeyRow>(
            "SELECT * FROM api_keys WHERE tenant_id = $1 ORDER BY created_at",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(rows.into_iter().map(ApiKey::from).collect())
    }

    async fn revoke_api_key(&self, tenant_id: Uuid, key_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE api_keys
            SET revoked_at = COALESCE(revoked_at, NOW())
            WHERE key_id = $1 AND tenant_id = $2
            "#,
        )
        .bind(key_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_api_key_last_used(
        &self,
        key_id: Uuid,
        when: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE api_keys SET last_used_at = $2 WHERE key_id = $1")
            .bind(key_id)
            .bind(when)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn insert_verification_token(
        &self,
        token: &VerificationToken,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO verification_tokens (
                token_id, tenant_id, lookup_hash, expires_at, consumed_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(token.token_id)
        .bind(token.tenant_id)
        .bind(&token.lookup_hash)
        .bind(token.expires_at)
        .bind(token.consumed_at)
        .bind(token.created_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn find_verification_token(
        &self,
        lookup_hash: &str,
    ) -> Result<Option<VerificationToken>, StoreError> {
        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT * FROM verification_tokens WHERE lookup_hash = $1",
        )
        .bind(lookup_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(row.map(VerificationToken::from))
    }

    async fn consume_verification_token(&self, token_id: Uuid) -> Result<bool, StoreError> {
        // The consumed_at guard makes this a compare-and-set: exactly one
        // concurrent caller sees rows_affected = 1.
        let result = sqlx::query(
            r#"
            UPDATE verification_tokens
            SET consumed_at = NOW()
            WHERE token_id = $1 AND consumed_at IS NULL
            "#,
        )
        .bind(token_id)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(result.rows_affected() == 1)
    }
}

/// Append-only audit sink on the same pool.
#[derive(Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn append(&self, entry: AuditEntry) -> Result<(), StoreError> {
        let outcome = match entry.outcome {
            action_kernel::models::AuditOutcome::Allowed => "allowed",
            action_kernel::models::AuditOutcome::Denied => "denied",
            action_kernel::models::AuditOutcome::Error => "error",
        };
        sqlx::query(
            r#"
            INSERT INTO audit_entries (
                entry_id, ts, request_id, tenant_id, credential_id, action,
                outcome, code, detail, source_ip, idempotency_key, replayed, payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(entry.entry_id)
        .bind(entry.timestamp)
        .bind(entry.request_id)
        .bind(entry.tenant_id)
        .bind(entry.credential_id)
        .bind(&entry.action)
        .bind(outcome)
        .bind(&entry.code)
        .bind(&entry.detail)
        .bind(&entry.source_ip)
        .bind(&entry.idempotency_key)
        .bind(entry.replayed)
        .bind(entry.payload.to_string())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }
}
