//! Route configuration.

use crate::auth::require_admin;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route(
            "/v1/admin/deletion/jobs",
            post(handlers::trigger_deletion).get(handlers::list_deletion_jobs),
        )
        .route(
            "/v1/admin/deletion/jobs/{job_id}",
            get(handlers::get_deletion_job),
        )
        .route("/v1/admin/deletion/stats", get(handlers::get_deletion_stats))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    // Health stays unauthenticated for probes
    let mut router = Router::new()
        .route("/v1/health", get(handlers::health_check))
        .merge(admin_routes);

    // When enabled, /metrics must be network-restricted to scrapers.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
