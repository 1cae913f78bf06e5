use std::sync::Arc;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{routes, state::AppState};

/// Construct the Axum [`Router`] with all routes and middleware attached.
///
/// `TraceLayer` is outermost, so every request is logged including CORS
/// preflights. Origins are restricted to `PIXELOPS_CORS_ORIGINS` when it is
/// set, otherwise any origin may call the API.
pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/events", post(routes::events::create_event))
        .route("/api/events/bulk", post(routes::events::bulk_create_events))
        .route(
            "/api/events/reprocess",
            post(routes::events::reprocess_failed_events),
        )
        .route(
            "/api/pixels/{pixel_id}/diagnostics/run",
            post(routes::diagnostics::run_diagnostics),
        )
        .route(
            "/api/workspaces/{workspace_id}/diagnostics/summary",
            get(routes::diagnostics::diagnostics_summary),
        )
        .route(
            "/api/workspaces/{workspace_id}/diagnostics/export",
            get(routes::diagnostics::export_diagnostics),
        )
        .route(
            "/api/workspaces/{workspace_id}/analytics/events",
            get(routes::analytics::events_analytics),
        )
        .route(
            "/api/workspaces/{workspace_id}/analytics/conversions",
            get(routes::analytics::conversions_analytics),
        )
        .route(
            "/api/workspaces/{workspace_id}/analytics/funnel",
            post(routes::analytics::funnel_analytics),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .map(|o| o.trim())
        .filter(|o| !o.is_empty())
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(allowed))
    }
}
