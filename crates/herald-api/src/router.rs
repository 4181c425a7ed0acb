use axum::{
    Json, Router, middleware,
    routing::{get, post},
};

use herald_types::api::HealthResponse;

use crate::auth::{self, AppState};
use crate::middleware::require_auth;
use crate::whatsapp;

/// All API routes, nested under `/api`. Cross-cutting layers (CORS, tracing,
/// static files) are added by the server binary.
pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        // older clients post here
        .route("/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/auth/profile", get(auth::profile))
        .route("/whatsapp/initialize", post(whatsapp::initialize))
        .route("/whatsapp/send", post(whatsapp::send))
        .route("/whatsapp/status", get(whatsapp::status))
        .route("/whatsapp/qr", get(whatsapp::qr))
        .route("/whatsapp/history", get(whatsapp::history))
        .route("/whatsapp/reset", post(whatsapp::reset))
        .route("/whatsapp/number-info/{number}", get(whatsapp::number_info))
        .route("/whatsapp/groups", get(whatsapp::groups))
        .route("/whatsapp/groups/{group_id}", get(whatsapp::group_info))
        .route(
            "/whatsapp/settings",
            get(whatsapp::get_settings).post(whatsapp::update_settings),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .nest("/api", public_routes.merge(protected_routes))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
