use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use subscription_sync::adapters::http::{subscription_router, SubscriptionAppState};
use subscription_sync::adapters::postgres::{
    PostgresPlanCatalog, PostgresSubscriptionLedger, PostgresWebhookEventRepository,
};
use subscription_sync::adapters::stripe::{RetryPolicy, StripeConfig, StripeGateway};
use subscription_sync::application::{
    CheckoutUrls, MaintenanceConfig, MaintenanceWorker, UserLocks,
};
use subscription_sync::config::{AppConfig, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration - fail fast if invalid
    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.server);
    config.validate().context("Invalid configuration")?;

    tracing::info!(
        environment = ?config.server.environment,
        test_mode = config.payment.is_test_mode(),
        require_livemode = config.payment.require_livemode,
        "Starting subscription sync service"
    );

    let pool = config
        .database
        .connect()
        .await
        .context("Failed to connect to PostgreSQL")?;

    if config.database.run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        tracing::info!("Database migrations applied");
    }

    let stripe = StripeConfig::new(
        config.payment.stripe_api_key.clone(),
        config.payment.stripe_webhook_secret.clone(),
    )
    .with_base_url(config.payment.api_base_url.clone())
    .with_require_livemode(config.payment.require_livemode)
    .with_timeout(config.payment.request_timeout())
    .with_retry(RetryPolicy::with_max_attempts(config.payment.max_read_attempts));
    let gateway = StripeGateway::new(stripe).context("Failed to build Stripe client")?;

    let webhook_events = Arc::new(PostgresWebhookEventRepository::new(pool.clone()));
    let user_locks = Arc::new(UserLocks::new());

    let state = SubscriptionAppState {
        plan_catalog: Arc::new(PostgresPlanCatalog::new(pool.clone())),
        ledger: Arc::new(PostgresSubscriptionLedger::new(pool.clone())),
        payment_gateway: Arc::new(gateway),
        webhook_events: webhook_events.clone(),
        user_locks: user_locks.clone(),
        checkout_urls: CheckoutUrls {
            success_url: config.payment.checkout_success_url.clone(),
            cancel_url: config.payment.checkout_cancel_url.clone(),
        },
    };

    // Background maintenance
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let maintenance = MaintenanceWorker::new(
        webhook_events,
        user_locks,
        MaintenanceConfig::default()
            .with_interval(config.server.maintenance_interval())
            .with_webhook_retention(config.payment.webhook_retention()),
    );
    let maintenance_handle = tokio::spawn(async move { maintenance.run(shutdown_rx).await });

    let app = subscription_router()
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(
                    |request: &axum::http::Request<_>| {
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
                    },
                ))
                .layer(TimeoutLayer::new(config.server.request_timeout()))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(cors_layer(&config.server)),
        )
        .with_state(state);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(address = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = maintenance_handle.await {
        tracing::warn!(error = %e, "Maintenance worker did not stop cleanly");
    }
    pool.close().await;

    tracing::info!("Service shutdown complete");
    Ok(())
}

fn init_tracing(server: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(server.log_level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);
    if server.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = server
        .cors_origins_list()
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
}

async fn shutdown_signal() {
    let ctrl_c = wait_for_signal("SIGINT", signal::ctrl_c());

    #[cfg(unix)]
    let terminate = wait_for_signal("SIGTERM", async {
        signal::unix::signal(signal::unix::SignalKind::terminate())?
            .recv()
            .await;
        Ok::<(), std::io::Error>(())
    });

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

/// Resolves when `listener` reports the signal.
///
/// A listener that could not be installed never resolves, so a broken
/// handler cannot trigger a shutdown on its own.
async fn wait_for_signal<F>(name: &'static str, listener: F)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    if let Err(e) = listener.await {
        tracing::error!(signal = name, error = %e, "Failed to install signal handler");
        std::future::pending::<()>().await;
    }
}
