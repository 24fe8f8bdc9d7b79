use axum::{
    body::to_bytes,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};

use crate::error::{AppError, ErrorEnvelope};

/// Upper bound on rejection bodies read back for re-wrapping.
const MAX_REJECTION_BODY: usize = 64 * 1024;

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

/// Rewrites framework-generated error responses (unknown method, path
/// rejections, and similar) into the JSON error envelope. Responses that are
/// already JSON pass through untouched.
pub async fn normalize_error_response(response: Response) -> Response {
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) || is_json(response.headers()) {
        return response;
    }

    let (parts, body) = response.into_parts();
    let text = to_bytes(body, MAX_REJECTION_BODY)
        .await
        .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
        .unwrap_or_default();
    let message = |fallback: &str| {
        if text.is_empty() {
            fallback.to_string()
        } else {
            text.clone()
        }
    };

    let mut normalized = match status.as_u16() {
        400 => AppError::BadRequest(message("The request was malformed.")),
        404 => {
            AppError::NotFound(message("The requested URL was not found on the server."))
        }
        405 => AppError::MethodNotAllowed(message(
            "The method is not allowed for the requested URL.",
        )),
        415 => {
            AppError::UnsupportedMediaType(message("Content-Type must be application/json"))
        }
        _ => {
            let fallback = status.canonical_reason().unwrap_or("Error");
            return ErrorEnvelope::new(status, message(fallback)).into_logged_response();
        }
    }
    .into_response();

    if let Some(allow) = parts.headers.get(header::ALLOW) {
        normalized.headers_mut().insert(header::ALLOW, allow.clone());
    }

    normalized
}
