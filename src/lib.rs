pub mod audit;
pub mod auth;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod filter;
pub mod folio;
pub mod handlers;
pub mod identity;
pub mod inventory;
pub mod middleware;
pub mod record;
pub mod service;
pub mod session;
pub mod state;
pub mod storage;

use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use state::AppState;

/// Multipart overhead allowed on top of the configured upload limit.
const MULTIPART_SLACK_BYTES: usize = 256 * 1024;

pub fn app(state: AppState) -> Router {
    let body_limit = state.config.inventory.max_upload_bytes + MULTIPART_SLACK_BYTES;
    let enable_cors = state.config.security.enable_cors;

    let router = Router::new()
        // Public
        .route("/health", get(handlers::public::health))
        // Protected API
        .merge(protected_routes(state.clone()).layer(DefaultBodyLimit::max(body_limit)))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if enable_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

fn protected_routes(state: AppState) -> Router<AppState> {
    use handlers::protected::{articles, audit, inventory};

    Router::new()
        .route("/api/inventory/alta", post(inventory::alta))
        .route("/api/inventory/baja", post(inventory::baja))
        .route("/api/articles", get(articles::list).post(articles::create))
        .route(
            "/api/articles/:id",
            get(articles::show).patch(articles::update).delete(articles::delete),
        )
        .route("/api/audit/:table/:id", get(audit::history))
        .route_layer(from_fn_with_state(state, middleware::jwt_auth_middleware))
}
