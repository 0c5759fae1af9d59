//! HTTP surface: health and metrics endpoints plus the route modules.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use http::{header, HeaderMap, StatusCode};

use crate::error::ApiError;
use crate::gate::credentials;
use crate::metrics::Metrics;
use crate::AppState;

pub mod files;
pub mod observability;
pub mod s3;
pub mod share;

pub async fn health() -> &'static str {
    "ok"
}

pub async fn ready(State(state): State<AppState>) -> Response {
    // Ready only when the serving root is still reachable.
    match tokio::fs::metadata(&state.cfg.root).await {
        Ok(meta) if meta.is_dir() => (StatusCode::OK, "ready").into_response(),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "root unavailable").into_response(),
    }
}

pub async fn metrics_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if !state.cfg.public_metrics {
        if let Some(expected) = &state.cfg.metrics_token {
            let presented = credentials::bearer_payload(&headers, "authorization");
            let ok = presented
                .map(|token| credentials::constant_time_eq(token, expected))
                .unwrap_or(false);
            if !ok {
                return Err(ApiError::Forbidden);
            }
        }
    }
    let body = state.metrics.encode().map_err(|_| ApiError::Internal)?;
    Ok((
        [(header::CONTENT_TYPE, Metrics::content_type())],
        body,
    )
        .into_response())
}
