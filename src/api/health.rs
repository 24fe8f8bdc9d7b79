use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Health check endpoint
pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    tracing::debug!("Health check");

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "OK".to_string(),
        }),
    )
}

/// Root URL response with service metadata
pub async fn index() -> Json<Value> {
    Json(json!({
        "name": "Promotion REST API Service",
        "version": env!("CARGO_PKG_VERSION"),
        "paths": {
            "list_promotions": "/promotions",
            "create_promotion": "/promotions",
            "get_promotion": "/promotions/{id}",
            "update_promotion": "/promotions/{id}",
            "delete_promotion": "/promotions/{id}",
            "apply_promotion": "/promotions/{id}/apply",
            "cancel_promotion": "/promotions/{id}/cancel",
            "health": "/health",
        },
    }))
}
