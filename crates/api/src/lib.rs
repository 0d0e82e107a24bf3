//! HTTP API server with observability for the cart reservation service.
//!
//! Provides REST endpoints for carts, coupons and the guest-to-user merge,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod seed;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, patch, post};
use cart_store::Store;
use metrics_exporter_prometheus::PrometheusHandle;
use reservation::{
    EngineConfig, InMemoryCouponBook, InMemorySessionRegistry, MergeCoordinator,
    ReservationEngine,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::cart::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/cart",
            get(routes::cart::get::<S>).delete(routes::cart::clear::<S>),
        )
        .route("/cart/items", post(routes::cart::set_item::<S>))
        .route("/cart/items/{sku}", delete(routes::cart::remove_item::<S>))
        .route("/cart/coupon", post(routes::cart::apply_coupon::<S>))
        .route("/cart/merge", patch(routes::cart::merge::<S>))
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

/// Creates the application state with in-memory coupon and session services.
pub fn create_default_state<S: Store + Clone + 'static>(
    store: S,
    config: EngineConfig,
) -> Arc<AppState<S>> {
    let coupons = InMemoryCouponBook::new();
    let sessions = InMemorySessionRegistry::new();

    let engine = ReservationEngine::new(
        store.clone(),
        coupons.clone(),
        sessions.clone(),
        config.clone(),
    );
    let merger = MergeCoordinator::new(store, coupons.clone(), sessions.clone(), config);

    Arc::new(AppState {
        engine,
        merger,
        coupons,
        sessions,
    })
}
