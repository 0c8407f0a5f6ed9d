//! Integration tests for the verification state machine under concurrency
//! and through the action surface.

mod common;

use std::sync::Arc;

use common::{request, TestKernel, FULL_SCOPES};
use serde_json::json;

use action_kernel::config::RetryPolicy;
use action_kernel::error::KernelError;
use action_kernel::models::{Tenant, Tier, VerificationToken};
use action_kernel::store::{Directory, MemoryDirectory};
use action_kernel::verify::VerificationService;

#[tokio::test]
async fn concurrent_redemptions_yield_exactly_one_success() {
    let directory = Arc::new(MemoryDirectory::new());
    let clock = Arc::new(action_kernel::clock::SystemClock);
    let tenant = Tenant::new("acme".to_string(), Tier::Free, chrono::Utc::now());
    directory.insert_tenant(&tenant).await.unwrap();

    let (token, raw) = VerificationToken::issue(tenant.tenant_id, 86_400, chrono::Utc::now());
    directory.insert_verification_token(&token).await.unwrap();

    let service = Arc::new(VerificationService::new(
        directory.clone(),
        clock,
        RetryPolicy::no_retry(),
    ));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = service.clone();
        let raw = raw.clone();
        let tenant_id = tenant.tenant_id;
        handles.push(tokio::spawn(async move {
            service.redeem(tenant_id, &raw).await
        }));
    }

    let mut successes = 0;
    let mut invalid = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => successes += 1,
            Err(KernelError::InvalidVerificationToken) => invalid += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(invalid, 7);
    assert!(directory
        .find_tenant(tenant.tenant_id)
        .await
        .unwrap()
        .unwrap()
        .verified);
}

#[tokio::test]
async fn a_consumed_token_fails_loudly_not_silently() {
    let kernel = TestKernel::spawn();
    let (tenant, raw) = kernel.seed_tenant("acme", FULL_SCOPES).await;
    let token = kernel.issue_token(&tenant).await;

    let first = kernel
        .router
        .dispatch(request(&raw, "iam.tenant.verify", json!({"token": token})))
        .await;
    assert!(first.is_allowed());

    // Without an idempotency key the second redemption re-runs and must
    // surface the consumed token, never a silent success.
    let second = kernel
        .router
        .dispatch(request(&raw, "iam.tenant.verify", json!({"token": token})))
        .await;
    assert_eq!(second.code, "invalid_verification_token");
}

#[tokio::test]
async fn an_expired_token_cannot_verify() {
    let kernel = TestKernel::spawn();
    let (tenant, raw) = kernel.seed_tenant("acme", FULL_SCOPES).await;
    let token = kernel.issue_token(&tenant).await;

    kernel.clock.advance(chrono::Duration::hours(25));
    let resp = kernel
        .router
        .dispatch(request(&raw, "iam.tenant.verify", json!({"token": token})))
        .await;
    assert_eq!(resp.code, "invalid_verification_token");

    // Still restricted to the minimal scope set.
    let write = kernel
        .router
        .dispatch(request(&raw, "widget.items.create", json!({"name": "w"})))
        .await;
    assert_eq!(write.code, "scope_denied");
}

#[tokio::test]
async fn another_tenants_token_is_rejected() {
    let kernel = TestKernel::spawn();
    let (_tenant, raw) = kernel.seed_tenant("acme", FULL_SCOPES).await;
    let (other, _other_raw) = kernel.seed_tenant("rival", FULL_SCOPES).await;
    let other_token = kernel.issue_token(&other).await;

    let resp = kernel
        .router
        .dispatch(request(&raw, "iam.tenant.verify", json!({"token": other_token})))
        .await;
    assert_eq!(resp.code, "invalid_verification_token");
}
