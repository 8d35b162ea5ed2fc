//! API server entry point.

use std::sync::Arc;

use api::{AppState, Config};
use fulfillment::{ProvisioningCoordinator, TracingNotifier};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
use provider::SignedClient;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Builds the application around `store` and serves it until shutdown.
async fn serve<S>(store: S, config: &Config, metrics_handle: PrometheusHandle)
where
    S: OrderStore + Clone + 'static,
{
    let client =
        SignedClient::new(config.provider_config()).expect("failed to build provider client");
    let coordinator = ProvisioningCoordinator::new(
        store,
        client,
        Arc::new(TracingNotifier),
        config.fulfillment_config(),
    );
    let state = AppState::new(
        coordinator,
        config.webhook_auth(),
        config.payment_webhook_secret.clone(),
    );
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env().expect("invalid configuration");

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    if config.esim_secret_key.is_none() {
        tracing::warn!("ESIM_SECRET_KEY is not set; provider calls and webhooks are unsigned");
    }
    if config.payment_webhook_secret.is_none() {
        tracing::warn!("PAYMENT_WEBHOOK_SECRET is not set; every payment event will be rejected");
    }

    // 3. Pick the order store and serve
    match config.database_url.as_deref() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("failed to connect to PostgreSQL");
            let store = PostgresOrderStore::new(pool);
            store.run_migrations().await.expect("migrations failed");
            tracing::info!("using PostgreSQL order store");
            serve(store, &config, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL is not set; using the in-memory order store");
            serve(InMemoryOrderStore::new(), &config, metrics_handle).await;
        }
    }

    tracing::info!("server shut down gracefully");
}
