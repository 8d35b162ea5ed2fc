//! HTTP API for the eSIM fulfillment orchestrator.
//!
//! Exposes checkout and order lifecycle endpoints, profile usage alerts,
//! referral registration and the provider and payment webhook receivers,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use fulfillment::ProvisioningProvider;
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::OrderStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, P>(state: Arc<AppState<S, P>>, metrics_handle: PrometheusHandle) -> Router
where
    S: OrderStore + Clone + 'static,
    P: ProvisioningProvider + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::ops::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::ops::health))
        .route("/checkout", post(routes::orders::checkout::<S, P>))
        .route("/orders/{id}", get(routes::orders::get::<S, P>))
        .route("/orders/{id}/provision", post(routes::orders::provision::<S, P>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S, P>))
        .route("/users/{user_id}/orders", get(routes::orders::list_for_user::<S, P>))
        .route("/users/{user_id}/account", get(routes::orders::account::<S, P>))
        .route("/profiles/{esim_tran_no}", get(routes::profiles::get::<S, P>))
        .route(
            "/profiles/{esim_tran_no}/alerts",
            post(routes::profiles::create_alert::<S, P>).get(routes::profiles::list_alerts::<S, P>),
        )
        .route("/referrals", post(routes::referrals::create::<S, P>))
        .route("/webhooks/esim", post(routes::webhooks::provider::<S, P>))
        .route("/webhooks/payment", post(routes::webhooks::payment::<S, P>))
        .route("/admin/webhooks/replay", post(routes::webhooks::replay::<S, P>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
