//! Identity & access management pack.
//!
//! Key lifecycle (`iam.keys.*`) and the action-surface entry to tenant
//! verification (`iam.tenant.verify`). Raw secrets appear in exactly one
//! response, at mint time.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::clock::Clock;
use crate::error::KernelError;
use crate::models::{ApiKey, ApiKeySummary};
use crate::registry::{typed_handler, ActionContext, ActionDef, Pack};
use crate::scope::VERIFY_SCOPE;
use crate::store::Directory;
use crate::verify::VerificationService;

pub const NAMESPACE: &str = "iam";

pub struct IamPack {
    directory: Arc<dyn Directory>,
    verification: Arc<VerificationService>,
    clock: Arc<dyn Clock>,
}

impl IamPack {
    pub fn new(
        directory: Arc<dyn Directory>,
        verification: Arc<VerificationService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            directory,
            verification,
            clock,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
struct CreateKeyInput {
    #[validate(length(min = 1, max = 100))]
    label: String,
    #[validate(length(min = 1))]
    scopes: Vec<String>,
    expires_in_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
struct CreateKeyOutput {
    key: ApiKeySummary,
    /// The raw secret. Shown once; only hashes are stored.
    secret: String,
}

#[derive(Debug, Deserialize, Validate)]
struct ListKeysInput {}

#[derive(Debug, Serialize)]
struct ListKeysOutput {
    keys: Vec<ApiKeySummary>,
}

#[derive(Debug, Deserialize, Validate)]
struct RevokeKeyInput {
    key_id: Uuid,
}

#[derive(Debug, Serialize)]
struct RevokeKeyOutput {
    key_id: Uuid,
    revoked: bool,
}

#[derive(Debug, Deserialize, Validate)]
struct VerifyTenantInput {
    #[validate(length(min = 1))]
    token: String,
}

#[derive(Debug, Serialize)]
struct VerifyTenantOutput {
    tenant_id: Uuid,
    verified: bool,
}

async fn create_key(
    directory: Arc<dyn Directory>,
    clock: Arc<dyn Clock>,
    ctx: ActionContext,
    input: CreateKeyInput,
) -> Result<CreateKeyOutput, KernelError> {
    // A key may never grant more than its creator holds.
    for scope in &input.scopes {
        if !ctx.permits(scope) {
            return Err(KernelError::Forbidden {
                missing_scope: scope.clone(),
            });
        }
    }

    let now = clock.now();
    let expires_at = input
        .expires_in_secs
        .map(|secs| now + ChronoDuration::seconds(secs as i64));
    let (key, secret) = ApiKey::generate(
        ctx.tenant.tenant_id,
        input.label,
        input.scopes,
        expires_at,
        now,
    )?;
    directory.insert_api_key(&key).await?;

    tracing::info!(
        tenant_id = %ctx.tenant.tenant_id,
        key_id = %key.key_id,
        "API key created"
    );
    Ok(CreateKeyOutput {
        key: key.summary(),
        secret,
    })
}

async fn list_keys(
    directory: Arc<dyn Directory>,
    ctx: ActionContext,
    _input: ListKeysInput,
) -> Result<ListKeysOutput, KernelError> {
    let keys = directory.list_api_keys(ctx.tenant.tenant_id).await?;
    Ok(ListKeysOutput {
        keys: keys.iter().map(ApiKey::summary).collect(),
    })
}

async fn revoke_key(
    directory: Arc<dyn Directory>,
    ctx: ActionContext,
    input: RevokeKeyInput,
) -> Result<RevokeKeyOutput, KernelError> {
    let revoked = directory
        .revoke_api_key(ctx.tenant.tenant_id, input.key_id)
        .await?;
    if !revoked {
        return Err(KernelError::InvalidInput(format!(
            "no key {} under this tenant",
            input.key_id
        )));
    }
    tracing::info!(
        tenant_id = %ctx.tenant.tenant_id,
        key_id = %input.key_id,
        "API key revoked"
    );
    Ok(RevokeKeyOutput {
        key_id: input.key_id,
        revoked: true,
    })
}

impl Pack for IamPack {
    fn namespace(&self) -> &str {
        NAMESPACE
    }

    fn actions(&self) -> Vec<ActionDef> {
        let create = {
            let directory = self.directory.clone();
            let clock = self.clock.clone();
            typed_handler(move |ctx, input: CreateKeyInput| {
                create_key(directory.clone(), clock.clone(), ctx, input)
            })
        };
        let list = {
            let directory = self.directory.clone();
            typed_handler(move |ctx, input: ListKeysInput| {
                list_keys(directory.clone(), ctx, input)
            })
        };
        let revoke = {
            let directory = self.directory.clone();
            typed_handler(move |ctx, input: RevokeKeyInput| {
                revoke_key(directory.clone(), ctx, input)
            })
        };
        let verify = {
            let verification = self.verification.clone();
            typed_handler(move |ctx: ActionContext, input: VerifyTenantInput| {
                let verification = verification.clone();
                async move {
                    verification
                        .redeem(ctx.tenant.tenant_id, &input.token)
                        .await?;
                    Ok(VerifyTenantOutput {
                        tenant_id: ctx.tenant.tenant_id,
                        verified: true,
                    })
                }
            })
        };

        vec![
            ActionDef {
                name: "iam.keys.create".to_string(),
                required_scope: "iam.keys:write".to_string(),
                description: "Mint an API key scoped at or below the caller".to_string(),
                side_effecting: true,
                input_schema: json!({
                    "type": "object",
                    "required": ["label", "scopes"],
                    "properties": {
                        "label": {"type": "string", "minLength": 1, "maxLength": 100},
                        "scopes": {"type": "array", "items": {"type": "string"}, "minItems": 1},
                        "expires_in_secs": {"type": "integer", "minimum": 1}
                    }
                }),
                output_schema: json!({
                    "type": "object",
                    "properties": {
                        "key": {"type": "object"},
                        "secret": {"type": "string"}
                    }
                }),
                handler: create,
            },
            ActionDef {
                name: "iam.keys.list".to_string(),
                required_scope: "iam.keys:read".to_string(),
                description: "List this tenant's API keys (prefixes only, never secrets)"
                    .to_string(),
                side_effecting: false,
                input_schema: json!({"type": "object", "properties": {}}),
                output_schema: json!({
                    "type": "object",
                    "properties": {"keys": {"type": "array", "items": {"type": "object"}}}
                }),
                handler: list,
            },
            ActionDef {
                name: "iam.keys.revoke".to_string(),
                required_scope: "iam.keys:write".to_string(),
                description: "Revoke one of this tenant's API keys".to_string(),
                side_effecting: true,
                input_schema: json!({
                    "type": "object",
                    "required": ["key_id"],
                    "properties": {"key_id": {"type": "string", "format": "uuid"}}
                }),
                output_schema: json!({
                    "type": "object",
                    "properties": {
                        "key_id": {"type": "string", "format": "uuid"},
                        "revoked": {"type": "boolean"}
                    }
                }),
                handler: revoke,
            },
            ActionDef {
                name: "iam.tenant.verify".to_string(),
                required_scope: VERIFY_SCOPE.to_string(),
                description: "Redeem a verification token and widen this tenant's scopes"
                    .to_string(),
                side_effecting: true,
                input_schema: json!({
                    "type": "object",
                    "required": ["token"],
                    "properties": {"token": {"type": "string", "minLength": 1}}
                }),
                output_schema: json!({
                    "type": "object",
                    "properties": {
                        "tenant_id": {"type": "string", "format": "uuid"},
                        "verified": {"type": "boolean"}
                    }
                }),
                handler: verify,
            },
        ]
    }
}
