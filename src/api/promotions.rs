use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    routing::{get, put},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::api::state::AppState;
use crate::db::PromotionFilter;
use crate::error::{AppError, Result};
use crate::models::{Promotion, PromotionType};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Query keys accepted by `GET /promotions`.
const ALLOWED_FILTERS: [&str; 3] = ["promotion_id", "name", "promotion_type"];

/// Checks that the request declares a JSON body
fn check_content_type(headers: &HeaderMap) -> Result<()> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap_or_default());

    match content_type {
        None => {
            tracing::error!("No Content-Type specified");
        }
        Some(value) => {
            let essence = value.split(';').next().unwrap_or_default().trim();
            if essence.eq_ignore_ascii_case(JSON_CONTENT_TYPE) {
                return Ok(());
            }
            tracing::error!(content_type = %value, "Invalid Content-Type");
        }
    }

    Err(AppError::UnsupportedMediaType(format!(
        "Content-Type must be {}",
        JSON_CONTENT_TYPE
    )))
}

fn parse_body(body: &Bytes) -> Result<Value> {
    serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid JSON in request body: {}", e)))
}

fn parse_filter(params: &HashMap<String, String>) -> Result<PromotionFilter> {
    let mut unknown: Vec<&String> = params
        .keys()
        .filter(|key| !ALLOWED_FILTERS.contains(&key.as_str()))
        .collect();
    unknown.sort();
    if let Some(key) = unknown.first() {
        return Err(AppError::BadRequest(format!(
            "Invalid query parameter: {}",
            key
        )));
    }

    let value = |key: &str| {
        params
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    };

    Ok(PromotionFilter {
        promotion_id: value("promotion_id").map(str::to_string),
        name: value("name").map(str::to_string),
        promotion_type: value("promotion_type")
            .map(str::parse::<PromotionType>)
            .transpose()?,
    })
}

fn not_found(id: i64) -> AppError {
    AppError::NotFound(format!("Promotion with id '{}' was not found.", id))
}

// Handlers

/// Create a promotion from the JSON body
async fn create_promotion(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, [(HeaderName, String); 1], Json<Value>)> {
    tracing::info!("Request to create a promotion");
    check_content_type(&headers)?;

    let data = parse_body(&body)?;
    let mut promotion = Promotion::default().deserialize(&data)?;
    state.store.create(&mut promotion).await?;

    let id = promotion
        .id
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Store did not assign an id")))?;
    tracing::info!(id, promotion_id = %promotion.promotion_id, "Promotion saved");

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/promotions/{}", id))],
        Json(promotion.serialize()),
    ))
}

/// List promotions, optionally filtered
async fn list_promotions(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Value>>> {
    tracing::info!(?params, "Request for promotion list");

    let filter = parse_filter(&params)?;
    let store = &state.store;

    let promotions = match (&filter.promotion_id, &filter.name, filter.promotion_type) {
        (None, None, None) => store.all().await?,
        (None, Some(name), None) => store.find_by_name(name).await?,
        (None, None, Some(promotion_type)) => store.find_by_type(promotion_type).await?,
        (Some(promotion_id), None, None) => store
            .find_by_promotion_id(promotion_id)
            .await?
            .into_iter()
            .collect(),
        _ => store.filter(&filter).await?,
    };

    tracing::info!(count = promotions.len(), "Returning promotions");

    Ok(Json(promotions.iter().map(Promotion::serialize).collect()))
}

/// Get a single promotion
async fn get_promotion(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    tracing::info!(id, "Request to retrieve a promotion");

    let promotion = state.store.find(id).await?.ok_or_else(|| not_found(id))?;

    let mut body = promotion.serialize();
    if promotion.is_expired(Utc::now().naive_utc()) {
        body["status"] = json!("expired");
    }

    Ok(Json(body))
}

/// Replace every field of an existing promotion
async fn update_promotion(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    tracing::info!(id, "Request to update a promotion");
    check_content_type(&headers)?;

    let data = parse_body(&body)?;
    let promotion = state
        .store
        .replace(id, &data)
        .await?
        .ok_or_else(|| not_found(id))?;

    tracing::info!(id, "Promotion updated");

    Ok(Json(promotion.serialize()))
}

/// Delete a promotion; succeeds whether or not it exists
async fn delete_promotion(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    tracing::info!(id, "Request to delete a promotion");

    state.store.delete_by_id(id).await?;

    tracing::info!(id, "Promotion delete complete");

    Ok(StatusCode::NO_CONTENT)
}

/// Record one use of a promotion
async fn apply_promotion(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    tracing::info!(id, "Request to apply a promotion");

    let promotion = state.store.apply(id).await?.ok_or_else(|| not_found(id))?;

    tracing::info!(id, usage_count = promotion.usage_count, "Promotion applied");

    Ok(Json(promotion.serialize()))
}

/// Cancel an active promotion
async fn cancel_promotion(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    tracing::info!(id, "Request to cancel a promotion");

    let promotion = state.store.cancel(id).await?.ok_or_else(|| not_found(id))?;

    tracing::info!(id, "Promotion canceled");

    Ok(Json(promotion.serialize()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/promotions", get(list_promotions).post(create_promotion))
        .route(
            "/promotions/:id",
            get(get_promotion)
                .put(update_promotion)
                .delete(delete_promotion),
        )
        .route("/promotions/:id/apply", put(apply_promotion))
        .route("/promotions/:id/cancel", put(cancel_promotion))
}
