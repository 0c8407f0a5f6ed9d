use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;

use action_kernel::clock::SystemClock;
use action_kernel::packs::IamPack;
use action_kernel::registry::{Pack, Registry};
use action_kernel::router::ActionRouter;
use action_kernel::verify::VerificationService;

use gateway_service::config::GatewayConfig;
use gateway_service::error::GatewayError;
use gateway_service::observability::init_tracing;
use gateway_service::store::{create_pool, run_migrations, PgAuditSink, PgDirectory, RedisKv};
use gateway_service::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<(), GatewayError> {
    dotenvy::dotenv().ok();

    // Load configuration - fail fast if invalid.
    let config = GatewayConfig::from_env()?;
    init_tracing(&config.log_level);

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting gateway service"
    );

    let pool = create_pool(&config.database)
        .await
        .map_err(GatewayError::Database)?;
    run_migrations(&pool)
        .await
        .map_err(|e| GatewayError::Internal(anyhow::anyhow!(e)))?;

    let directory = Arc::new(PgDirectory::new(pool.clone()));
    let redis = Arc::new(RedisKv::new(&config.redis).await.map_err(GatewayError::Internal)?);
    let audit_sink = Arc::new(PgAuditSink::new(pool));

    let clock = Arc::new(SystemClock);
    let verification = Arc::new(VerificationService::new(
        directory.clone(),
        clock.clone(),
        config.kernel.store_retry.clone(),
    ));

    // The registry is assembled once; duplicate action names abort startup.
    let packs: Vec<Box<dyn Pack>> = vec![Box::new(IamPack::new(
        directory.clone(),
        verification,
        clock.clone(),
    ))];
    let registry = Registry::build(packs)
        .map_err(|e| GatewayError::Config(anyhow::anyhow!(e)))?;

    let kernel = Arc::new(ActionRouter::new(
        config.kernel.clone(),
        registry,
        directory.clone(),
        redis.clone(),
        audit_sink,
        clock,
    ));
    tracing::info!(actions = kernel.registry().len(), "Kernel initialized");

    let state = AppState {
        config: config.clone(),
        kernel,
        directory,
        redis,
    };
    let app = build_router(state).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
