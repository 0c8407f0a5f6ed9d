//! Action router - the kernel entry point.
//!
//! Per request: resolve identity and scope, look the action up, enforce its
//! required scope, apply ceilings then configured rate limits, dedupe
//! side-effecting actions by idempotency key, validate input, invoke the
//! handler under a deadline, persist the idempotency record, and append an
//! audit entry for every exit path.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use crate::audit::{redact, AuditRecorder, AuditSink};
use crate::ceiling::CeilingEnforcer;
use crate::clock::Clock;
use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::identity::{Identity, IdentityResolver};
use crate::idempotency::{fingerprint, IdempotencyGuard};
use crate::models::{AuditEntry, AuditOutcome};
use crate::ratelimit::RateLimiter;
use crate::registry::{ActionContext, Registry};
use crate::request::{ActionRequest, ActionResponse, ResponseStatus};
use crate::store::{Directory, KvStore};

pub struct ActionRouter {
    registry: Arc<Registry>,
    identity: IdentityResolver,
    ceilings: CeilingEnforcer,
    limiter: RateLimiter,
    idempotency: IdempotencyGuard,
    audit: AuditRecorder,
    clock: Arc<dyn Clock>,
    default_handler_timeout: Duration,
}

impl ActionRouter {
    pub fn new(
        cfg: KernelConfig,
        registry: Registry,
        directory: Arc<dyn Directory>,
        kv: Arc<dyn KvStore>,
        audit_sink: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            identity: IdentityResolver::new(
                directory.clone(),
                clock.clone(),
                cfg.store_retry.clone(),
            ),
            ceilings: CeilingEnforcer::new(kv.clone(), clock.clone(), cfg.store_retry.clone()),
            limiter: RateLimiter::new(kv.clone(), clock.clone(), &cfg),
            idempotency: IdempotencyGuard::new(kv, &cfg),
            audit: AuditRecorder::new(
                audit_sink,
                Duration::from_millis(cfg.audit_flush_timeout_ms),
            ),
            clock,
            default_handler_timeout: Duration::from_secs(cfg.handler_timeout_secs),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Dispatch one request. Never returns a bare error: every outcome is a
    /// structured envelope, and every outcome is audited.
    pub async fn dispatch(&self, request: ActionRequest) -> ActionResponse {
        let request_id = Uuid::new_v4();
        let redacted_payload = redact(&request.payload);

        // 1. Identity & scope resolution.
        let identity = match self
            .identity
            .resolve(&request.credential, request.tenant_hint)
            .await
        {
            Ok(identity) => identity,
            Err(err) => {
                return self
                    .fail(request_id, None, &request, redacted_payload, err)
                    .await;
            }
        };

        // 2. Action lookup.
        let Some(action) = self.registry.get(&request.action) else {
            let err = KernelError::UnknownAction {
                name: request.action.clone(),
            };
            return self
                .fail(request_id, Some(&identity), &request, redacted_payload, err)
                .await;
        };

        // 3. Required scope.
        if !identity.permits(&action.required_scope) {
            let err = KernelError::Forbidden {
                missing_scope: action.required_scope.clone(),
            };
            return self
                .fail(request_id, Some(&identity), &request, redacted_payload, err)
                .await;
        }

        // 4. Replay probe before any quota is consumed: an already-accepted
        // request must not be charged twice.
        let request_fingerprint = fingerprint(&request.action, &request.payload);
        let idempotency_key = if action.side_effecting {
            request.idempotency_key.clone()
        } else {
            None
        };
        if let Some(key) = &idempotency_key {
            match self
                .idempotency
                .probe(identity.tenant.tenant_id, key, &request_fingerprint)
                .await
            {
                Ok(Some(cached)) => {
                    return self
                        .replay(request_id, &identity, &request, redacted_payload, cached)
                        .await;
                }
                Ok(None) => {}
                Err(err) => {
                    return self
                        .fail(request_id, Some(&identity), &request, redacted_payload, err)
                        .await;
                }
            }
        }

        // 5. Ceilings, then configured rate limits.
        let payload_bytes = request.payload.to_string().len();
        if let Err(err) = self
            .ceilings
            .check(identity.tenant.tenant_id, payload_bytes)
            .await
        {
            return self
                .fail(request_id, Some(&identity), &request, redacted_payload, err)
                .await;
        }
        if let Err(err) = self
            .limiter
            .check_request(
                identity.credential_id,
                identity.tenant.tenant_id,
                identity.tenant.tier,
                &request.source_ip,
            )
            .await
        {
            return self
                .fail(request_id, Some(&identity), &request, redacted_payload, err)
                .await;
        }

        // 6. Reservation for side-effecting actions.
        let mut reserved = false;
        if let Some(key) = &idempotency_key {
            match self
                .idempotency
                .reserve(identity.tenant.tenant_id, key, &request_fingerprint)
                .await
            {
                Ok(None) => reserved = true,
                Ok(Some(cached)) => {
                    return self
                        .replay(request_id, &identity, &request, redacted_payload, cached)
                        .await;
                }
                Err(err) => {
                    return self
                        .fail(request_id, Some(&identity), &request, redacted_payload, err)
                        .await;
                }
            }
        }

        // 7. Validate and invoke under the deadline. Input validation lives
        // in the typed handler adapter, so an InvalidInput error here means
        // the handler body never ran.
        let ctx = ActionContext {
            request_id,
            tenant: identity.tenant.clone(),
            credential_id: identity.credential_id,
            scopes: identity.scopes.clone(),
            source_ip: request.source_ip.clone(),
        };
        let deadline = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_handler_timeout);
        let invocation =
            tokio::time::timeout(deadline, action.handler.call(ctx, request.payload.clone()))
                .await;

        match invocation {
            Ok(Ok(data)) => {
                let response = ActionResponse::allowed(request_id, data);
                if let Some(key) = &idempotency_key {
                    if reserved {
                        self.idempotency
                            .complete(
                                identity.tenant.tenant_id,
                                key,
                                &request_fingerprint,
                                &response,
                            )
                            .await;
                    }
                }
                self.record(
                    request_id,
                    Some(&identity),
                    &request,
                    redacted_payload,
                    AuditOutcome::Allowed,
                    "ok",
                    None,
                    false,
                )
                .await;
                response
            }
            Ok(Err(err)) => {
                // A clean handler failure releases the reservation so the
                // caller may retry with the same key.
                if reserved {
                    if let Some(key) = &idempotency_key {
                        self.idempotency
                            .release(identity.tenant.tenant_id, key)
                            .await;
                    }
                }
                self.fail(request_id, Some(&identity), &request, redacted_payload, err)
                    .await
            }
            Err(_elapsed) => {
                // Execution state is unknown. Complete the record with the
                // timeout envelope so a same-key replay can never run the
                // handler a second time.
                let err = KernelError::Timeout;
                let response = ActionResponse::from_error(request_id, &err);
                if reserved {
                    if let Some(key) = &idempotency_key {
                        self.idempotency
                            .complete(
                                identity.tenant.tenant_id,
                                key,
                                &request_fingerprint,
                                &response,
                            )
                            .await;
                    }
                }
                tracing::warn!(action = %request.action, ?deadline, "Handler deadline elapsed");
                self.record(
                    request_id,
                    Some(&identity),
                    &request,
                    redacted_payload,
                    AuditOutcome::Error,
                    err.code(),
                    Some(err.to_string()),
                    false,
                )
                .await;
                response
            }
        }
    }

    /// Terminal rejection: audit, then convert to an envelope.
    async fn fail(
        &self,
        request_id: Uuid,
        identity: Option<&Identity>,
        request: &ActionRequest,
        redacted_payload: Value,
        err: KernelError,
    ) -> ActionResponse {
        let outcome = match err.status() {
            ResponseStatus::Denied => AuditOutcome::Denied,
            _ => AuditOutcome::Error,
        };
        self.record(
            request_id,
            identity,
            request,
            redacted_payload,
            outcome,
            err.code(),
            Some(err.to_string()),
            false,
        )
        .await;
        ActionResponse::from_error(request_id, &err)
    }

    /// Serve a cached envelope for an idempotent replay.
    async fn replay(
        &self,
        request_id: Uuid,
        identity: &Identity,
        request: &ActionRequest,
        redacted_payload: Value,
        cached: ActionResponse,
    ) -> ActionResponse {
        let outcome = match cached.status {
            ResponseStatus::Allowed => AuditOutcome::Allowed,
            ResponseStatus::Denied => AuditOutcome::Denied,
            ResponseStatus::Error => AuditOutcome::Error,
        };
        self.record(
            request_id,
            Some(identity),
            request,
            redacted_payload,
            outcome,
            &cached.code,
            None,
            true,
        )
        .await;
        cached
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        request_id: Uuid,
        identity: Option<&Identity>,
        request: &ActionRequest,
        payload: Value,
        outcome: AuditOutcome,
        code: &str,
        detail: Option<String>,
        replayed: bool,
    ) {
        self.audit
            .record(AuditEntry {
                entry_id: Uuid::new_v4(),
                timestamp: self.clock.now(),
                request_id,
                tenant_id: identity.map(|i| i.tenant.tenant_id),
                credential_id: identity.map(|i| i.credential_id),
                action: request.action.clone(),
                outcome,
                code: code.to_string(),
                detail,
                source_ip: request.source_ip.clone(),
                idempotency_key: request.idempotency_key.clone(),
                replayed,
                payload,
            })
            .await;
    }
}
