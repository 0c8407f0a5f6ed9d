//! Admin provisioning surface.
//!
//! The concrete form of the external signup workflow: creates a tenant, its
//! root credential, and the verification token the kernel will later
//! consume. Gated by the operator key in `x-admin-api-key`; raw secrets
//! appear in this response exactly once.

use axum::{extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use action_kernel::models::{ApiKey, ApiKeySummary, Tenant, Tier, VerificationToken};
use action_kernel::store::Directory;

use crate::error::GatewayError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub tenant_slug: String,
    #[serde(default = "default_tier")]
    pub tier: Tier,
    #[serde(default = "default_scopes")]
    pub root_scopes: Vec<String>,
}

fn default_tier() -> Tier {
    Tier::Free
}

fn default_scopes() -> Vec<String> {
    vec!["*".to_string()]
}

#[derive(Debug, Serialize)]
pub struct CreateTenantResponse {
    pub tenant_id: Uuid,
    pub tenant_slug: String,
    pub tier: Tier,
    pub verified: bool,
    pub root_key: ApiKeySummary,
    /// Raw credential secret; shown once.
    pub root_key_secret: String,
    /// Raw verification token; shown once, 24h lifetime.
    pub verification_token: String,
}

fn require_admin_key(state: &AppState, headers: &HeaderMap) -> Result<(), GatewayError> {
    let presented = headers
        .get("x-admin-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let matches: bool = presented
        .as_bytes()
        .ct_eq(state.config.admin_api_key.as_bytes())
        .into();
    if !matches {
        tracing::warn!("Admin endpoint called with a bad or missing admin key");
        return Err(GatewayError::Unauthorized("Invalid admin API key".to_string()));
    }
    Ok(())
}

/// POST /v1/admin/tenants
pub async fn create_tenant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateTenantRequest>,
) -> Result<Json<CreateTenantResponse>, GatewayError> {
    require_admin_key(&state, &headers)?;

    if body.tenant_slug.is_empty() || body.tenant_slug.len() > 64 {
        return Err(GatewayError::BadRequest(
            "tenant_slug must be 1-64 characters".to_string(),
        ));
    }

    let now = chrono::Utc::now();
    let tenant = Tenant::new(body.tenant_slug.clone(), body.tier, now);
    state.directory.insert_tenant(&tenant).await.map_err(|e| {
        GatewayError::Internal(anyhow::anyhow!("Failed to create tenant: {}", e))
    })?;

    let (root_key, root_key_secret) = ApiKey::generate(
        tenant.tenant_id,
        "root".to_string(),
        body.root_scopes,
        None,
        now,
    )
    .map_err(|e| GatewayError::Internal(anyhow::anyhow!("Failed to mint root key: {}", e)))?;
    state.directory.insert_api_key(&root_key).await.map_err(|e| {
        GatewayError::Internal(anyhow::anyhow!("Failed to store root key: {}", e))
    })?;

    let (token, verification_token) = VerificationToken::issue(
        tenant.tenant_id,
        state.config.kernel.verification_token_ttl_secs,
        now,
    );
    state
        .directory
        .insert_verification_token(&token)
        .await
        .map_err(|e| {
            GatewayError::Internal(anyhow::anyhow!("Failed to store verification token: {}", e))
        })?;

    tracing::info!(
        tenant_id = %tenant.tenant_id,
        tenant_slug = %tenant.tenant_slug,
        "Tenant provisioned"
    );

    Ok(Json(CreateTenantResponse {
        tenant_id: tenant.tenant_id,
        tenant_slug: tenant.tenant_slug,
        tier: tenant.tier,
        verified: tenant.verified,
        root_key: root_key.summary(),
        root_key_secret,
        verification_token,
    }))
}
