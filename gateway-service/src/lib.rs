pub mod config;
pub mod error;
pub mod handlers;
pub mod observability;
pub mod store;

use std::sync::Arc;

use axum::{
    http::HeaderValue,
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use action_kernel::router::ActionRouter;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::store::{PgDirectory, RedisKv};

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub kernel: Arc<ActionRouter>,
    pub directory: Arc<PgDirectory>,
    pub redis: Arc<RedisKv>,
}

pub async fn build_router(state: AppState) -> Result<Router, GatewayError> {
    let allowed_origins = state
        .config
        .allowed_origins
        .iter()
        .map(|o| {
            o.parse::<HeaderValue>().map_err(|e| {
                GatewayError::Config(anyhow::anyhow!("Invalid CORS origin '{}': {}", o, e))
            })
        })
        .collect::<Result<Vec<HeaderValue>, GatewayError>>()?;

    let app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/v1/actions", post(handlers::actions::invoke))
        .route("/v1/admin/tenants", post(handlers::admin::create_tenant))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers([
                    axum::http::header::AUTHORIZATION,
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::HeaderName::from_static("x-admin-api-key"),
                ]),
        );

    Ok(app)
}

async fn security_headers_middleware(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "cache-control",
        HeaderValue::from_static("no-store, max-age=0"),
    );
    response
}
