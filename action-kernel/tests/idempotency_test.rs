//! Integration tests for idempotency-keyed deduplication through the full
//! dispatch pipeline.

mod common;

use common::{keyed_request, request, TestKernel, FULL_SCOPES};
use serde_json::json;

use action_kernel::request::ResponseStatus;

/// Seed a verified tenant so side-effecting widget actions are in scope.
async fn verified_kernel() -> (TestKernel, String) {
    let kernel = TestKernel::spawn();
    let (tenant, raw) = kernel.seed_tenant("acme", FULL_SCOPES).await;
    let token = kernel.issue_token(&tenant).await;
    let resp = kernel
        .router
        .dispatch(request(&raw, "iam.tenant.verify", json!({"token": token})))
        .await;
    assert!(resp.is_allowed(), "verification failed: {resp:?}");
    (kernel, raw)
}

#[tokio::test]
async fn replaying_the_same_key_and_payload_returns_the_identical_envelope() {
    let (kernel, raw) = verified_kernel().await;

    let first = kernel
        .router
        .dispatch(keyed_request(&raw, "widget.items.create", json!({"name": "w"}), "abc"))
        .await;
    assert!(first.is_allowed());
    assert_eq!(kernel.invocation_count(), 1);

    let replay = kernel
        .router
        .dispatch(keyed_request(&raw, "widget.items.create", json!({"name": "w"}), "abc"))
        .await;

    // Identical envelope, original request_id included; no second execution.
    assert_eq!(replay, first);
    assert_eq!(kernel.invocation_count(), 1);

    // The replay is audited as such.
    let entries = kernel.audit.entries();
    let last = entries.last().unwrap();
    assert!(last.replayed);
    assert_eq!(last.idempotency_key.as_deref(), Some("abc"));
}

#[tokio::test]
async fn same_key_with_a_different_payload_conflicts() {
    let (kernel, raw) = verified_kernel().await;

    let first = kernel
        .router
        .dispatch(keyed_request(&raw, "widget.items.create", json!({"name": "w"}), "abc"))
        .await;
    assert!(first.is_allowed());

    let conflict = kernel
        .router
        .dispatch(keyed_request(&raw, "widget.items.create", json!({"name": "x"}), "abc"))
        .await;
    assert_eq!(conflict.status, ResponseStatus::Error);
    assert_eq!(conflict.code, "idempotency_conflict");
    assert_eq!(kernel.invocation_count(), 1);
}

#[tokio::test]
async fn idempotency_keys_are_tenant_scoped() {
    let (kernel, raw) = verified_kernel().await;
    let (other_tenant, other_raw) = kernel.seed_tenant("rival", FULL_SCOPES).await;
    let token = kernel.issue_token(&other_tenant).await;
    kernel
        .router
        .dispatch(request(&other_raw, "iam.tenant.verify", json!({"token": token})))
        .await;

    kernel
        .router
        .dispatch(keyed_request(&raw, "widget.items.create", json!({"name": "w"}), "abc"))
        .await;
    // The same key from another tenant is a fresh request, not a replay or
    // a conflict.
    let other = kernel
        .router
        .dispatch(keyed_request(&other_raw, "widget.items.create", json!({"name": "w"}), "abc"))
        .await;
    assert!(other.is_allowed());
    assert_eq!(kernel.invocation_count(), 2);
}

#[tokio::test]
async fn concurrent_identical_requests_execute_the_handler_once() {
    let (kernel, raw) = verified_kernel().await;

    let payload = json!({"name": "race", "delay_ms": 100});
    let req_a = keyed_request(&raw, "widget.items.create", payload.clone(), "abc");
    let req_b = keyed_request(&raw, "widget.items.create", payload, "abc");

    let router_a = kernel.router.clone();
    let router_b = kernel.router.clone();
    let (resp_a, resp_b) = tokio::join!(
        tokio::spawn(async move { router_a.dispatch(req_a).await }),
        tokio::spawn(async move { router_b.dispatch(req_b).await }),
    );
    let resp_a = resp_a.unwrap();
    let resp_b = resp_b.unwrap();

    assert_eq!(kernel.invocation_count(), 1);
    assert!(resp_a.is_allowed());
    // Both callers receive the same response envelope.
    assert_eq!(resp_a, resp_b);
}

#[tokio::test]
async fn a_failed_handler_releases_the_reservation_for_retry() {
    let (kernel, raw) = verified_kernel().await;

    let failed = kernel
        .router
        .dispatch(keyed_request(
            &raw,
            "widget.items.create",
            json!({"name": "w", "fail": true}),
            "abc",
        ))
        .await;
    assert_eq!(failed.status, ResponseStatus::Error);
    assert_eq!(failed.code, "internal_error");
    // Internal causes never leak into the envelope.
    assert_eq!(failed.error.unwrap().message, "Internal error");

    // Retrying the same key with a working payload executes.
    let retried = kernel
        .router
        .dispatch(keyed_request(&raw, "widget.items.create", json!({"name": "w"}), "abc"))
        .await;
    assert!(retried.is_allowed());
    assert_eq!(kernel.invocation_count(), 1);
}

#[tokio::test]
async fn a_timed_out_handler_pins_the_key_to_the_timeout_envelope() {
    let (kernel, raw) = verified_kernel().await;

    let mut req = keyed_request(
        &raw,
        "widget.items.create",
        json!({"name": "slow", "delay_ms": 5_000}),
        "abc",
    );
    req.timeout_ms = Some(50);
    let timed_out = kernel.router.dispatch(req).await;
    assert_eq!(timed_out.code, "timeout");

    // A same-key replay must not risk a second execution; it observes the
    // stored timeout envelope instead.
    let mut retry = keyed_request(
        &raw,
        "widget.items.create",
        json!({"name": "slow", "delay_ms": 5_000}),
        "abc",
    );
    retry.timeout_ms = Some(50);
    let replay = kernel.router.dispatch(retry).await;
    assert_eq!(replay, timed_out);
    assert_eq!(kernel.invocation_count(), 0);
}

#[tokio::test]
async fn records_expire_after_the_retention_window() {
    let (kernel, raw) = verified_kernel().await;

    kernel
        .router
        .dispatch(keyed_request(&raw, "widget.items.create", json!({"name": "w"}), "abc"))
        .await;
    assert_eq!(kernel.invocation_count(), 1);

    kernel.clock.advance(chrono::Duration::hours(25));
    let after = kernel
        .router
        .dispatch(keyed_request(&raw, "widget.items.create", json!({"name": "w"}), "abc"))
        .await;
    assert!(after.is_allowed());
    assert_eq!(kernel.invocation_count(), 2);
}
