//! Axum router construction: CORS layer plus the capability, file and
//! smart-clipper route groups.

mod capability;
mod clipper;
mod files;

use std::sync::Arc;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

use crate::state::AppState;

pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/capability", capability::router())
        .nest("/api/smart_clipper", clipper::router())
        .merge(files::router())
        .layer(ServiceBuilder::new().layer(cors_layer(&state)))
        .with_state(state)
}

fn cors_layer(state: &Arc<AppState>) -> CorsLayer {
    if let Some(origins_raw) = &state.config.cors_allowed_origins {
        let origins: Vec<axum::http::HeaderValue> = origins_raw
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        if !origins.is_empty() {
            return CorsLayer::new()
                .allow_origin(origins)
                .allow_headers(Any)
                .allow_methods(Any);
        }
    }
    // Wildcard suits development; set REDUB_CORS_ORIGINS in production.
    CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any)
}
