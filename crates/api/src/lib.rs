//! HTTP API server for the stock reservation engine.
//!
//! Exposes the reservation repository as REST endpoints, with structured
//! logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use reservation_store::ReservationStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::stock::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/stock/reserve", post(routes::stock::reserve))
        .route("/stock/release", post(routes::stock::release))
        .route("/stock/confirm", post(routes::stock::confirm))
        .route("/stock/expire", post(routes::stock::expire))
        .route(
            "/stock/available/{product_id}",
            get(routes::stock::available),
        )
        .route("/stock/reservation", put(routes::stock::update_quantity))
        .route(
            "/stock/reservations/{session_id}",
            get(routes::stock::session_reservations),
        )
        .route(
            "/stock/confirmations/pending",
            get(routes::stock::pending_confirmations),
        )
        .route(
            "/stock/confirmations/{reservation_id}/settle",
            post(routes::stock::settle_confirmation),
        )
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

/// Wraps a reservation store into the shared handler state.
pub fn create_state(
    store: Arc<dyn ReservationStore>,
    default_ttl_minutes: i64,
    backend: &'static str,
) -> Arc<AppState> {
    Arc::new(AppState {
        store,
        default_ttl_minutes,
        backend,
    })
}
