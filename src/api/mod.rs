// API module - HTTP endpoints

pub mod health;
pub mod middleware;
pub mod promotions;
pub mod state;

use axum::{http::Uri, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use state::AppState;

async fn route_not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!(
        "The requested URL {} was not found on the server.",
        uri.path()
    ))
}

/// Builds the full application router around the given state.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(health::index))
        .route("/health", get(health::health_check))
        .merge(promotions::router())
        .fallback(route_not_found)
        .layer(axum::middleware::map_response(
            middleware::error_envelope::normalize_error_response,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
