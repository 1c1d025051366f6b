// routes.rs
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use http::{header, HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::handlers;
use crate::state::SharedState;

pub fn create_routes(state: SharedState) -> Router {
    let cors = cors_layer(state.config.cors_allowed_origin.as_deref());

    let api = Router::new()
        .route(
            "/polls",
            post(handlers::create_poll).get(handlers::list_polls),
        )
        .route("/polls/{id}", get(handlers::get_poll))
        .route("/polls/{id}/results", get(handlers::get_results))
        .route("/votes", post(handlers::vote));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(allowed_origin: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    match allowed_origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => cors.allow_origin(origin),
        Some(Err(e)) => {
            warn!("Ignoring invalid CORS_ALLOWED_ORIGIN: {e}");
            cors.allow_origin(Any)
        }
        None => cors.allow_origin(Any),
    }
}
