use axum::Router;
use axum::routing::{get, patch};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;

use crate::routes;
use crate::state::AppState;

pub(crate) fn build_app(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/locations",
            get(routes::api::list_locations).post(routes::api::create_location),
        )
        .route(
            "/api/locations/{id}",
            patch(routes::api::update_location).delete(routes::api::delete_location),
        )
        .route(
            "/api/profiles",
            get(routes::api::list_profiles).post(routes::api::create_profile),
        )
        .route(
            "/api/profiles/{id}",
            get(routes::api::get_profile)
                .patch(routes::api::update_profile)
                .delete(routes::api::delete_profile),
        )
        .route(
            "/api/profiles/by-number/{number}",
            get(routes::api::get_profile_by_number),
        )
        .route("/api/events", get(routes::sse::change_events))
        .route("/api/health", get(routes::api::health))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
