//! Shared harness for kernel integration tests: in-memory stores, a manual
//! clock, the iam pack, and a small side-effecting test pack whose handler
//! invocations are counted.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use validator::Validate;

use action_kernel::audit::MemoryAuditSink;
use action_kernel::clock::{Clock, ManualClock};
use action_kernel::config::KernelConfig;
use action_kernel::error::KernelError;
use action_kernel::models::{ApiKey, Tenant, Tier, VerificationToken};
use action_kernel::packs::IamPack;
use action_kernel::registry::{typed_handler, ActionDef, Pack, Registry};
use action_kernel::request::ActionRequest;
use action_kernel::router::ActionRouter;
use action_kernel::store::{Directory, MemoryDirectory, MemoryKv};
use action_kernel::verify::VerificationService;

pub struct TestKernel {
    pub router: Arc<ActionRouter>,
    pub directory: Arc<MemoryDirectory>,
    pub clock: Arc<ManualClock>,
    pub audit: Arc<MemoryAuditSink>,
    /// Invocations of the widget pack's side-effecting handlers.
    pub invocations: Arc<AtomicU32>,
    pub config: KernelConfig,
}

impl TestKernel {
    pub fn spawn() -> Self {
        Self::with_config(KernelConfig::default())
    }

    pub fn with_config(config: KernelConfig) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let kv = Arc::new(MemoryKv::new(clock.clone()));
        let directory = Arc::new(MemoryDirectory::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let invocations = Arc::new(AtomicU32::new(0));

        let verification = Arc::new(VerificationService::new(
            directory.clone(),
            clock.clone(),
            config.store_retry.clone(),
        ));
        let packs: Vec<Box<dyn Pack>> = vec![
            Box::new(IamPack::new(
                directory.clone(),
                verification,
                clock.clone(),
            )),
            Box::new(WidgetPack {
                invocations: invocations.clone(),
            }),
        ];
        let registry = Registry::build(packs).expect("registry must build");

        let router = Arc::new(ActionRouter::new(
            config.clone(),
            registry,
            directory.clone(),
            kv,
            audit.clone(),
            clock.clone(),
        ));

        Self {
            router,
            directory,
            clock,
            audit,
            invocations,
            config,
        }
    }

    /// Seed an unverified tenant with one credential carrying the given
    /// scopes. Returns the tenant and the raw secret.
    pub async fn seed_tenant(&self, slug: &str, scopes: &[&str]) -> (Tenant, String) {
        let tenant = Tenant::new(slug.to_string(), Tier::Free, self.clock.now());
        self.directory.insert_tenant(&tenant).await.unwrap();
        let raw = self.seed_key(&tenant, "root", scopes).await;
        (tenant, raw)
    }

    pub async fn seed_key(&self, tenant: &Tenant, label: &str, scopes: &[&str]) -> String {
        let (key, raw) = ApiKey::generate(
            tenant.tenant_id,
            label.to_string(),
            scopes.iter().map(|s| s.to_string()).collect(),
            None,
            self.clock.now(),
        )
        .unwrap();
        self.directory.insert_api_key(&key).await.unwrap();
        raw
    }

    /// Issue a verification token for the tenant, the way the external
    /// signup workflow would.
    pub async fn issue_token(&self, tenant: &Tenant) -> String {
        let (token, raw) = VerificationToken::issue(
            tenant.tenant_id,
            self.config.verification_token_ttl_secs,
            self.clock.now(),
        );
        self.directory.insert_verification_token(&token).await.unwrap();
        raw
    }

    pub fn invocation_count(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}

pub fn request(credential: &str, action: &str, payload: Value) -> ActionRequest {
    ActionRequest {
        credential: credential.to_string(),
        tenant_hint: None,
        action: action.to_string(),
        idempotency_key: None,
        payload,
        source_ip: "203.0.113.7".to_string(),
        timeout_ms: None,
    }
}

pub fn keyed_request(
    credential: &str,
    action: &str,
    payload: Value,
    idempotency_key: &str,
) -> ActionRequest {
    ActionRequest {
        idempotency_key: Some(idempotency_key.to_string()),
        ..request(credential, action, payload)
    }
}

/// Scope set that covers the whole widget + iam surface.
pub const FULL_SCOPES: &[&str] = &[
    "iam.keys:read",
    "iam.keys:write",
    "iam.tenant:verify",
    "meta.actions:read",
    "widget.items:read",
    "widget.items:write",
];

struct WidgetPack {
    invocations: Arc<AtomicU32>,
}

#[derive(Debug, Deserialize, Validate)]
struct CreateItemInput {
    #[validate(length(min = 1))]
    name: String,
    /// Handler sleep before completing, for deadline and race tests.
    #[serde(default)]
    delay_ms: u64,
    /// Fail after doing nothing, for reservation-release tests.
    #[serde(default)]
    fail: bool,
}

#[derive(Debug, Serialize)]
struct CreateItemOutput {
    name: String,
    sequence: u32,
}

#[derive(Debug, Deserialize, Validate)]
struct GetItemInput {
    #[validate(length(min = 1))]
    name: String,
}

impl Pack for WidgetPack {
    fn namespace(&self) -> &str {
        "widget"
    }

    fn actions(&self) -> Vec<ActionDef> {
        let create = {
            let invocations = self.invocations.clone();
            typed_handler(move |_ctx, input: CreateItemInput| {
                let invocations = invocations.clone();
                async move {
                    if input.fail {
                        return Err(KernelError::Internal(anyhow::anyhow!(
                            "widget backend rejected {}",
                            input.name
                        )));
                    }
                    if input.delay_ms > 0 {
                        tokio::time::sleep(std::time::Duration::from_millis(input.delay_ms))
                            .await;
                    }
                    let sequence = invocations.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(CreateItemOutput {
                        name: input.name,
                        sequence,
                    })
                }
            })
        };
        let get = typed_handler(|_ctx, input: GetItemInput| async move {
            Ok(json!({"name": input.name, "found": true}))
        });

        vec![
            ActionDef {
                name: "widget.items.create".to_string(),
                required_scope: "widget.items:write".to_string(),
                description: "Create a widget item".to_string(),
                side_effecting: true,
                input_schema: json!({
                    "type": "object",
                    "required": ["name"],
                    "properties": {"name": {"type": "string", "minLength": 1}}
                }),
                output_schema: json!({"type": "object"}),
                handler: create,
            },
            ActionDef {
                name: "widget.items.get".to_string(),
                required_scope: "widget.items:read".to_string(),
                description: "Fetch a widget item".to_string(),
                side_effecting: false,
                input_schema: json!({
                    "type": "object",
                    "required": ["name"],
                    "properties": {"name": {"type": "string", "minLength": 1}}
                }),
                output_schema: json!({"type": "object"}),
                handler: get,
            },
        ]
    }
}
