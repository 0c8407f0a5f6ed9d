//! Integration tests for rate limiting and ceiling enforcement through the
//! dispatch pipeline, driven by the injected clock.

mod common;

use common::{keyed_request, request, TestKernel, FULL_SCOPES};
use serde_json::json;

use action_kernel::ceiling::TENANT_ACTIONS_PER_SECOND;
use action_kernel::config::KernelConfig;
use action_kernel::ratelimit::{single_window_config, Dimension};
use action_kernel::request::ResponseStatus;

fn kernel_with_limit(limit: u64, period_secs: u64) -> TestKernel {
    TestKernel::with_config(KernelConfig {
        rate_limits: single_window_config("burst", period_secs, limit),
        ..Default::default()
    })
}

#[tokio::test]
async fn the_n_plus_first_request_in_a_window_is_rejected() {
    let kernel = kernel_with_limit(3, 300);
    let (_tenant, raw) = kernel.seed_tenant("acme", FULL_SCOPES).await;

    for i in 0..3 {
        let resp = kernel
            .router
            .dispatch(request(&raw, "widget.items.get", json!({"name": "w"})))
            .await;
        assert!(resp.is_allowed(), "request {i} should pass: {resp:?}");
    }

    let rejected = kernel
        .router
        .dispatch(request(&raw, "widget.items.get", json!({"name": "w"})))
        .await;
    assert_eq!(rejected.status, ResponseStatus::Denied);
    assert_eq!(rejected.code, "rate_limited");
    let detail = rejected.error.unwrap();
    assert_eq!(detail.dimension, Some(Dimension::ApiKey));
    let retry_after = detail.retry_after_secs.unwrap();
    assert!(retry_after > 0 && retry_after <= 300);
}

#[tokio::test]
async fn counters_reset_when_the_window_elapses() {
    let kernel = kernel_with_limit(1, 300);
    let (_tenant, raw) = kernel.seed_tenant("acme", FULL_SCOPES).await;

    assert!(kernel
        .router
        .dispatch(request(&raw, "widget.items.get", json!({"name": "w"})))
        .await
        .is_allowed());
    assert_eq!(
        kernel
            .router
            .dispatch(request(&raw, "widget.items.get", json!({"name": "w"})))
            .await
            .code,
        "rate_limited"
    );

    kernel.clock.advance(chrono::Duration::seconds(301));
    assert!(kernel
        .router
        .dispatch(request(&raw, "widget.items.get", json!({"name": "w"})))
        .await
        .is_allowed());
}

#[tokio::test]
async fn an_idempotent_replay_does_not_consume_quota() {
    let kernel = kernel_with_limit(2, 300);
    let (tenant, raw) = kernel.seed_tenant("acme", FULL_SCOPES).await;
    let token = kernel.issue_token(&tenant).await;
    // Verification consumes one request; lift the limit for it by resetting
    // the window afterwards.
    kernel
        .router
        .dispatch(request(&raw, "iam.tenant.verify", json!({"token": token})))
        .await;
    kernel.clock.advance(chrono::Duration::seconds(301));

    // First create consumes quota slot 1 of 2.
    let first = kernel
        .router
        .dispatch(keyed_request(&raw, "widget.items.create", json!({"name": "w"}), "abc"))
        .await;
    assert!(first.is_allowed());

    // Replays are served from the cache and charged nothing.
    for _ in 0..5 {
        let replay = kernel
            .router
            .dispatch(keyed_request(&raw, "widget.items.create", json!({"name": "w"}), "abc"))
            .await;
        assert_eq!(replay, first);
    }

    // Slot 2 of 2 is still available for a fresh request.
    let fresh = kernel
        .router
        .dispatch(request(&raw, "widget.items.get", json!({"name": "w"})))
        .await;
    assert!(fresh.is_allowed());

    // And the window is now genuinely exhausted.
    let rejected = kernel
        .router
        .dispatch(request(&raw, "widget.items.get", json!({"name": "w"})))
        .await;
    assert_eq!(rejected.code, "rate_limited");
}

#[tokio::test]
async fn any_breached_window_blocks_independently() {
    // Burst allows 2 in 5 minutes, the hourly window only 3 in the hour.
    let mut cfg = single_window_config("burst", 300, 2);
    cfg.api_key.push(action_kernel::config::WindowLimit::new("hourly", 3_600, 3));
    let kernel = TestKernel::with_config(KernelConfig {
        rate_limits: cfg,
        ..Default::default()
    });
    let (_tenant, raw) = kernel.seed_tenant("acme", FULL_SCOPES).await;

    for _ in 0..2 {
        assert!(kernel
            .router
            .dispatch(request(&raw, "widget.items.get", json!({"name": "w"})))
            .await
            .is_allowed());
    }
    // Burst breached.
    assert_eq!(
        kernel
            .router
            .dispatch(request(&raw, "widget.items.get", json!({"name": "w"})))
            .await
            .code,
        "rate_limited"
    );

    // A burst-window reset is not enough once the hourly window is spent.
    kernel.clock.advance(chrono::Duration::seconds(301));
    assert!(kernel
        .router
        .dispatch(request(&raw, "widget.items.get", json!({"name": "w"})))
        .await
        .is_allowed());
    kernel.clock.advance(chrono::Duration::seconds(301));
    let rejected = kernel
        .router
        .dispatch(request(&raw, "widget.items.get", json!({"name": "w"})))
        .await;
    assert_eq!(rejected.code, "rate_limited");
    assert_eq!(rejected.error.unwrap().dimension, Some(Dimension::ApiKey));
}

#[tokio::test]
async fn ceilings_hold_even_when_configured_limits_are_higher() {
    // Configured limits far above the ceiling: the ceiling still binds.
    let kernel = kernel_with_limit(100_000, 300);
    let (_tenant, raw) = kernel.seed_tenant("acme", FULL_SCOPES).await;

    // The clock is frozen, so every request lands in the same second.
    for i in 0..TENANT_ACTIONS_PER_SECOND {
        let resp = kernel
            .router
            .dispatch(request(&raw, "widget.items.get", json!({"name": "w"})))
            .await;
        assert!(resp.is_allowed(), "request {i} should pass: {resp:?}");
    }

    let rejected = kernel
        .router
        .dispatch(request(&raw, "widget.items.get", json!({"name": "w"})))
        .await;
    assert_eq!(rejected.status, ResponseStatus::Denied);
    assert_eq!(rejected.code, "ceiling_exceeded");

    // The next second is clean.
    kernel.clock.advance(chrono::Duration::seconds(1));
    assert!(kernel
        .router
        .dispatch(request(&raw, "widget.items.get", json!({"name": "w"})))
        .await
        .is_allowed());
}

#[tokio::test]
async fn oversized_payloads_hit_the_payload_ceiling() {
    let kernel = TestKernel::spawn();
    let (_tenant, raw) = kernel.seed_tenant("acme", FULL_SCOPES).await;

    let resp = kernel
        .router
        .dispatch(request(
            &raw,
            "widget.items.get",
            json!({"name": "x".repeat(2 * 1024 * 1024)}),
        ))
        .await;
    assert_eq!(resp.code, "ceiling_exceeded");
}

#[tokio::test]
async fn source_ip_is_limited_across_credentials() {
    let kernel = kernel_with_limit(3, 300);
    let (_t1, raw1) = kernel.seed_tenant("acme", FULL_SCOPES).await;
    let (_t2, raw2) = kernel.seed_tenant("rival", FULL_SCOPES).await;

    // Two tenants, one source address: together they exhaust the ip window
    // before either exhausts its own key window.
    assert!(kernel
        .router
        .dispatch(request(&raw1, "widget.items.get", json!({"name": "w"})))
        .await
        .is_allowed());
    assert!(kernel
        .router
        .dispatch(request(&raw2, "widget.items.get", json!({"name": "w"})))
        .await
        .is_allowed());
    assert!(kernel
        .router
        .dispatch(request(&raw1, "widget.items.get", json!({"name": "w"})))
        .await
        .is_allowed());

    let rejected = kernel
        .router
        .dispatch(request(&raw2, "widget.items.get", json!({"name": "w"})))
        .await;
    assert_eq!(rejected.code, "rate_limited");
    assert_eq!(
        rejected.error.unwrap().dimension,
        Some(Dimension::SourceIp)
    );
}
